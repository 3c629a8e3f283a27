//! Error types for the data model.

use crate::id::CollectionName;
use crate::value::ValueType;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Validation errors raised before any mutation occurs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// The collection has no registered schema.
    #[error("unknown collection: {name}")]
    UnknownCollection {
        /// The collection name.
        name: CollectionName,
    },

    /// The payload references a field the schema does not declare.
    #[error("unknown field {field:?} in collection {collection}")]
    UnknownField {
        /// The collection.
        collection: CollectionName,
        /// The offending field.
        field: String,
    },

    /// The payload value does not match the declared field type.
    #[error("type mismatch for {field:?} in {collection}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The collection.
        collection: CollectionName,
        /// The field.
        field: String,
        /// The declared type.
        expected: ValueType,
        /// The provided type.
        actual: ValueType,
    },

    /// A required field is missing or null at creation.
    #[error("missing required field {field:?} in {collection}")]
    MissingRequiredField {
        /// The collection.
        collection: CollectionName,
        /// The field.
        field: String,
    },

    /// A patch attempted to overwrite a counter field with an absolute
    /// value. Counters change only through deltas (or a rebase, which
    /// emits a synthetic delta).
    #[error("counter field {field:?} in {collection} cannot be overwritten; use a delta")]
    CounterOverwrite {
        /// The collection.
        collection: CollectionName,
        /// The field.
        field: String,
    },

    /// An adjust targeted a field that is not a counter.
    #[error("field {field:?} in {collection} is not a counter")]
    NotACounter {
        /// The collection.
        collection: CollectionName,
        /// The field.
        field: String,
    },

    /// A bundle with no steps was submitted.
    #[error("bundle has no steps")]
    EmptyBundle,
}
