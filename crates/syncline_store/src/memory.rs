//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory storage backend.
///
/// Suitable for unit tests, integration tests, and ephemeral engines
/// that do not need persistence.
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    sets: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored record sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.read().len()
    }

    /// Returns true if no record sets are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.read().is_empty()
    }

    /// Clears all record sets.
    pub fn clear(&self) {
        self.sets.write().clear();
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self, set: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.sets.read().get(set).cloned())
    }

    fn store(&self, set: &str, bytes: &[u8]) -> StoreResult<()> {
        self.sets.write().insert(set.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, set: &str) -> StoreResult<()> {
        self.sets.write().remove(set);
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<String>> {
        Ok(self.sets.read().keys().cloned().collect())
    }
}
