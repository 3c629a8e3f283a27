//! Error types for the sync engine.

use syncline_model::{CollectionName, EntityId, ModelError};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for remote adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors reported by the remote sync adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Network failure or remote 5xx; the operation can be retried.
    #[error("transient remote error: {message}")]
    Transient {
        /// Error message.
        message: String,
    },

    /// The remote store rejected the payload; retrying cannot help.
    #[error("permanent remote error: {message}")]
    Permanent {
        /// Error message.
        message: String,
    },

    /// A step referenced an entity not yet present remotely.
    #[error("missing remote dependency: {entity_id} in {collection}")]
    MissingDependency {
        /// The collection of the missing entity.
        collection: CollectionName,
        /// The missing entity.
        entity_id: EntityId,
    },

    /// The transport is offline.
    #[error("remote store unreachable")]
    Offline,
}

impl AdapterError {
    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Returns true if the call can be retried later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::Transient { .. }
                | AdapterError::Offline
                | AdapterError::MissingDependency { .. }
        )
    }
}

/// Errors that can occur in engine operations.
///
/// Local-apply errors (`Validation`, `Unauthorized`, `Store`) are
/// synchronous and surfaced to the caller before any mutation persists.
/// Sync errors are asynchronous: they only show up in the sync status
/// and the dead-letter lane, never blocking a local write.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The payload violates the collection's schema. Nothing was
    /// mutated.
    #[error("validation failed: {0}")]
    Validation(#[from] ModelError),

    /// The authorization gate denied the command.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Denial reason from the gate.
        reason: String,
    },

    /// Local store failure.
    #[error(transparent)]
    Store(#[from] syncline_store::StoreError),

    /// Transient sync failure; retried with backoff.
    #[error("transient sync error: {message}")]
    TransientSync {
        /// Error message.
        message: String,
    },

    /// The remote store rejected an operation; moved to dead letter.
    #[error("permanent sync error: {message}")]
    PermanentSync {
        /// Error message.
        message: String,
    },

    /// A bundle step references an entity not yet present remotely.
    #[error("missing dependency: {entity_id} in {collection}")]
    MissingDependency {
        /// The collection of the missing entity.
        collection: CollectionName,
        /// The missing entity.
        entity_id: EntityId,
    },

    /// `flush_and_confirm` could not drain the queue.
    #[error("sync queue not drained: {remaining} item(s) still pending")]
    QueueNotDrained {
        /// Items left in the queue.
        remaining: usize,
    },

    /// An operation with the wrong origin was handed to an apply path.
    #[error("invalid origin: {message}")]
    InvalidOrigin {
        /// What was expected.
        message: String,
    },

    /// The engine is shutting down.
    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Returns true if this is a retryable sync-side error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TransientSync { .. } | EngineError::MissingDependency { .. }
        )
    }
}

impl From<AdapterError> for EngineError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Transient { message } => EngineError::TransientSync { message },
            AdapterError::Offline => EngineError::TransientSync {
                message: "remote store unreachable".into(),
            },
            AdapterError::Permanent { message } => EngineError::PermanentSync { message },
            AdapterError::MissingDependency {
                collection,
                entity_id,
            } => EngineError::MissingDependency {
                collection,
                entity_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_adapter_errors() {
        assert!(AdapterError::transient("connection reset").is_retryable());
        assert!(AdapterError::Offline.is_retryable());
        assert!(!AdapterError::permanent("schema rejected").is_retryable());
    }

    #[test]
    fn adapter_errors_map_onto_engine_taxonomy() {
        let e: EngineError = AdapterError::transient("timeout").into();
        assert!(e.is_retryable());

        let e: EngineError = AdapterError::permanent("rejected").into();
        assert!(!e.is_retryable());
        assert!(matches!(e, EngineError::PermanentSync { .. }));
    }
}
