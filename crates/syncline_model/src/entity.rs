//! Materialized entity view.

use crate::clock::VectorClock;
use crate::id::EntityId;
use crate::value::{FieldState, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A materialized entity: base fields plus version metadata.
///
/// Entities are produced by folding the committed base state with the
/// provisional overlay. They are values, not handles: mutating an
/// `Entity` does not write anything back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// The entity's identity.
    pub id: EntityId,
    /// Per-field state, keyed by field name.
    pub fields: BTreeMap<String, FieldState>,
    /// Causal version of this entity.
    pub version: VectorClock,
    /// Most recent field write, milliseconds since the Unix epoch.
    pub updated_at_ms: u64,
}

impl Entity {
    /// Creates an empty entity with the given identity.
    #[must_use]
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
            version: VectorClock::new(),
            updated_at_ms: 0,
        }
    }

    /// Returns the value of a field, if present.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).map(|state| &state.value)
    }

    /// Returns the integer value of a field, defaulting to 0.
    ///
    /// Counter fields that have never been touched read as zero.
    #[must_use]
    pub fn integer(&self, name: &str) -> i64 {
        self.field(name).and_then(FieldValue::as_integer).unwrap_or(0)
    }

    /// Returns the text value of a field, if present.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_text)
    }

    /// Returns the boolean value of a field, defaulting to false.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.field(name).and_then(FieldValue::as_bool).unwrap_or(false)
    }

    /// Writes a field, keeping `updated_at_ms` as the max field write time.
    pub fn set_field(&mut self, name: impl Into<String>, state: FieldState) {
        self.updated_at_ms = self.updated_at_ms.max(state.updated_at_ms);
        self.fields.insert(name.into(), state);
    }
}
