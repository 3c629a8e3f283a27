//! Operations: the single unit of change.

use crate::clock::VectorClock;
use crate::id::{CollectionName, DeviceId, EntityId, OpId};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where an operation was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Created on this device; goes through the provisional overlay.
    Local,
    /// Received from the remote store; bypasses the overlay and is
    /// merged directly into the base state.
    Remote,
}

/// What produced a counter delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaSource {
    /// An ordinary business mutation (sale, receipt, adjustment).
    Direct,
    /// A synthetic delta emitted by a rebase, reconciling a physical
    /// recount with deltas concurrent to it.
    Recount,
}

/// The payload of an operation.
///
/// This is a closed union matched exhaustively everywhere; an unknown
/// kind cannot silently no-op. Counter fields never appear in `Patch`:
/// they change only through `Adjust` deltas, and a recount is expressed
/// as a synthetic `Adjust` computed by the rebase path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Creates an entity with an initial set of fields.
    Create {
        /// Initial field values (counters allowed here, once).
        fields: BTreeMap<String, FieldValue>,
    },
    /// Overwrites whole-record (non-counter) fields.
    Patch {
        /// New field values.
        fields: BTreeMap<String, FieldValue>,
    },
    /// Applies a signed delta to a counter field.
    ///
    /// Deltas are commutative and associative: applying the same set of
    /// deltas in any order yields the same materialized value.
    Adjust {
        /// The counter field.
        field: String,
        /// The signed change.
        amount: i64,
        /// What produced the delta.
        source: DeltaSource,
    },
}

impl OperationKind {
    /// Returns true if this is a counter delta.
    #[must_use]
    pub fn is_delta(&self) -> bool {
        matches!(self, OperationKind::Adjust { .. })
    }
}

/// A single change to a single entity.
///
/// Operations are immutable once created. The `op_id` is caller-supplied
/// and deterministic for the logical action, so a retried call is
/// recognized as a duplicate rather than re-executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique, deterministic operation ID.
    pub op_id: OpId,
    /// The collection this operation affects.
    pub collection: CollectionName,
    /// The entity being modified.
    pub entity_id: EntityId,
    /// The payload.
    pub kind: OperationKind,
    /// Causal clock at creation time.
    pub vector_clock: VectorClock,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Where the operation was created.
    pub origin: Origin,
    /// The device that created the operation.
    pub device: DeviceId,
}

impl Operation {
    /// Returns true if this operation is a counter delta.
    #[must_use]
    pub fn is_delta(&self) -> bool {
        self.kind.is_delta()
    }

    /// Returns the delta view of this operation, if it is one.
    #[must_use]
    pub fn delta(&self) -> Option<Delta> {
        match &self.kind {
            OperationKind::Adjust {
                field,
                amount,
                source,
            } => Some(Delta {
                op_id: self.op_id,
                target_id: self.entity_id,
                field: field.clone(),
                amount: *amount,
                source: *source,
                timestamp_ms: self.timestamp_ms,
            }),
            _ => None,
        }
    }
}

/// A counter change, extracted from an [`OperationKind::Adjust`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// The operation that carries this delta.
    pub op_id: OpId,
    /// The entity whose counter changes.
    pub target_id: EntityId,
    /// The counter field.
    pub field: String,
    /// The signed change.
    pub amount: i64,
    /// What produced the delta.
    pub source: DeltaSource,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}
