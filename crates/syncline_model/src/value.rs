//! Field values and per-field state.

use crate::id::DeviceId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The type of a field value, as declared by a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    /// UTF-8 text.
    Text,
    /// Signed 64-bit integer. Monetary amounts are integer minor units.
    Integer,
    /// Boolean flag.
    Bool,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Text => "text",
            ValueType::Integer => "integer",
            ValueType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A single field value.
///
/// This is a closed union: there is no catch-all variant, so every
/// consumer matches exhaustively. No floats; monetary amounts are
/// integer minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Boolean flag.
    Bool(bool),
    /// Explicit absence.
    Null,
}

impl FieldValue {
    /// Returns the declared type this value satisfies, or `None` for null.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            FieldValue::Text(_) => Some(ValueType::Text),
            FieldValue::Integer(_) => Some(ValueType::Integer),
            FieldValue::Bool(_) => Some(ValueType::Bool),
            FieldValue::Null => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns true if this is the null value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// A field value together with its write provenance.
///
/// The conflict rules are stated per field: critical fields merge by
/// field timestamp, concurrent non-delta writes use last-writer-wins
/// with a lexical device tie-break. That requires knowing, per field,
/// when it was written and by whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldState {
    /// The current value.
    pub value: FieldValue,
    /// Milliseconds since the Unix epoch at write time.
    pub updated_at_ms: u64,
    /// The device that wrote the value.
    pub writer: DeviceId,
}

impl FieldState {
    /// Creates a new field state.
    pub fn new(value: impl Into<FieldValue>, updated_at_ms: u64, writer: DeviceId) -> Self {
        Self {
            value: value.into(),
            updated_at_ms,
            writer,
        }
    }

    /// Returns true if `self` wins a last-writer-wins race against `other`.
    ///
    /// Higher timestamp wins; exact ties break on lexical device order
    /// (documented, deterministic, arbitrary).
    #[must_use]
    pub fn wins_over(&self, other: &FieldState) -> bool {
        match self.updated_at_ms.cmp(&other.updated_at_ms) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.writer > other.writer,
        }
    }
}
