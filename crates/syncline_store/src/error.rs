//! Error types for the local store.

use std::io;
use syncline_model::{ModelError, OpId};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error from the storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    Locked,

    /// The operation was already applied or is already pending.
    #[error("duplicate operation: {op_id}")]
    DuplicateOperation {
        /// The duplicated operation ID.
        op_id: OpId,
    },

    /// The operation referenced an op_id with no pending overlay entry.
    #[error("no pending overlay entry for operation {op_id}")]
    NotPending {
        /// The operation ID.
        op_id: OpId,
    },

    /// Model-level validation error.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl StoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}
