//! Storage backend trait definition.

use crate::error::StoreResult;

/// A durable store of named record sets.
///
/// Backends are **opaque byte stores**: each record set is a named
/// snapshot that is loaded and stored whole. The store owns all format
/// interpretation — backends do not understand entities, overlays, or
/// queue items.
///
/// # Invariants
///
/// - `load` returns exactly the bytes most recently passed to `store`
///   for that name, or `None` if the set was never stored or removed
/// - `store` is atomic: a crash mid-write leaves either the old or the
///   new snapshot, never a torn one
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`crate::MemoryBackend`] - for tests and ephemeral engines
/// - [`crate::FileBackend`] - for persistent storage
pub trait StorageBackend: Send + Sync {
    /// Loads a record set snapshot, or `None` if it does not exist.
    fn load(&self, set: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores a record set snapshot, replacing any previous one.
    fn store(&self, set: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Removes a record set. Removing a missing set is not an error.
    fn remove(&self, set: &str) -> StoreResult<()>;

    /// Lists the names of all stored record sets.
    fn list(&self) -> StoreResult<Vec<String>>;
}
