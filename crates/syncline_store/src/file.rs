//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "syncline.lock";
const SET_EXTENSION: &str = "cbor";

/// A file-based storage backend.
///
/// Each record set is one CBOR file under the root directory, with the
/// set name mapped to a relative path (`base/orders` becomes
/// `<root>/base/orders.cbor`). Writes go to a temporary file first and
/// are renamed into place, so a crash leaves either the old or the new
/// snapshot. An exclusive lock file prevents two processes from opening
/// the same store.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    _lock: File,
}

impl FileBackend {
    /// Opens (or creates) a file backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process holds the lock,
    /// or an I/O error if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(root.join(LOCK_FILE))?;
        lock.try_lock_exclusive().map_err(|_| StoreError::Locked)?;

        Ok(Self { root, _lock: lock })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, set: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in set.split('/') {
            path.push(part);
        }
        path.set_extension(SET_EXTENSION);
        path
    }

    fn collect_sets(&self, dir: &Path, prefix: &str, out: &mut Vec<String>) -> StoreResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();

            if path.is_dir() {
                let nested = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };
                self.collect_sets(&path, &nested, out)?;
            } else if let Some(stem) = name.strip_suffix(&format!(".{SET_EXTENSION}")) {
                if prefix.is_empty() {
                    out.push(stem.to_owned());
                } else {
                    out.push(format!("{prefix}/{stem}"));
                }
            }
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn load(&self, set: &str) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(set)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, set: &str, bytes: &[u8]) -> StoreResult<()> {
        let path = self.path_for(set);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, set: &str) -> StoreResult<()> {
        match fs::remove_file(self.path_for(set)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> StoreResult<Vec<String>> {
        let mut out = Vec::new();
        self.collect_sets(&self.root, "", &mut out)?;
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_and_load() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.store("base/orders", b"snapshot").unwrap();
        assert_eq!(
            backend.load("base/orders").unwrap(),
            Some(b"snapshot".to_vec())
        );
    }

    #[test]
    fn file_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        assert_eq!(backend.load("base/missing").unwrap(), None);
    }

    #[test]
    fn file_store_replaces() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.store("ledger", b"v1").unwrap();
        backend.store("ledger", b"v2").unwrap();
        assert_eq!(backend.load("ledger").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn file_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.store("outbox", b"items").unwrap();
        backend.remove("outbox").unwrap();
        backend.remove("outbox").unwrap();
        assert_eq!(backend.load("outbox").unwrap(), None);
    }

    #[test]
    fn file_list_reports_nested_sets() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.store("base/orders", b"").unwrap();
        backend.store("overlay/orders", b"").unwrap();
        backend.store("ledger", b"").unwrap();

        assert_eq!(
            backend.list().unwrap(),
            vec![
                "base/orders".to_owned(),
                "ledger".to_owned(),
                "overlay/orders".to_owned(),
            ]
        );
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = TempDir::new().unwrap();
        let _first = FileBackend::open(dir.path()).unwrap();

        let second = FileBackend::open(dir.path());
        assert!(matches!(second, Err(StoreError::Locked)));
    }

    #[test]
    fn file_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.store("base/accounts", b"durable").unwrap();
        }

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(
            backend.load("base/accounts").unwrap(),
            Some(b"durable".to_vec())
        );
    }
}
