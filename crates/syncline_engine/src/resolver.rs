//! Conflict resolution between local base state and remote operations.
//!
//! Resolution order:
//! 1. A remote operation that is newer (its clock dominates, or it is
//!    concurrent with a higher timestamp) replaces the fields it
//!    carries — except critical fields, which merge by per-field
//!    max-timestamp, and counter fields, which are never overwritten
//!    with absolute values.
//! 2. Concurrent deltas on a counter are retained and summed; no
//!    information is discarded.
//! 3. Concurrent non-delta writes use the higher field timestamp;
//!    exact ties break on lexical device order.
//!
//! "Remote wins" is deliberately scoped to non-delta, non-critical
//! fields; a remote absolute write must not clobber local deltas.

use syncline_model::{
    ClockOrdering, Entity, FieldState, Operation, OperationKind, Schema,
};
use tracing::trace;

/// Merges a remote-origin operation into the committed base state.
///
/// Pure: returns the merged entity without touching any store. The
/// caller is responsible for the idempotency check (operation ledger)
/// and for persisting the result.
#[must_use]
pub fn merge_remote(local: Option<&Entity>, op: &Operation, schema: &Schema) -> Entity {
    match local {
        None => apply_to_fresh(op),
        Some(local) => merge_into_existing(local, op, schema),
    }
}

/// Builds an entity from a remote operation when nothing exists
/// locally. A create's counter fields are absolute here, once.
fn apply_to_fresh(op: &Operation) -> Entity {
    let mut entity = Entity::new(op.entity_id);
    match &op.kind {
        OperationKind::Create { fields } | OperationKind::Patch { fields } => {
            for (name, value) in fields {
                entity.set_field(
                    name.clone(),
                    FieldState::new(value.clone(), op.timestamp_ms, op.device.clone()),
                );
            }
        }
        OperationKind::Adjust { field, amount, .. } => {
            entity.set_field(
                field.clone(),
                FieldState::new(*amount, op.timestamp_ms, op.device.clone()),
            );
        }
    }
    entity.version.merge(&op.vector_clock);
    entity
}

fn merge_into_existing(local: &Entity, op: &Operation, schema: &Schema) -> Entity {
    let mut merged = local.clone();

    match &op.kind {
        // Deltas always sum into the committed value, whatever the
        // clock relationship: concurrent deltas both survive.
        OperationKind::Adjust { field, amount, .. } => {
            let current = merged.integer(field);
            let timestamp = merged
                .fields
                .get(field)
                .map_or(op.timestamp_ms, |f| f.updated_at_ms.max(op.timestamp_ms));
            merged.set_field(
                field.clone(),
                FieldState::new(current + amount, timestamp, op.device.clone()),
            );
        }

        OperationKind::Create { fields } | OperationKind::Patch { fields } => {
            let ordering = op.vector_clock.compare(&local.version);
            match ordering {
                ClockOrdering::DominatedBy | ClockOrdering::Equal => {
                    // Stale: the local base already saw this history.
                    trace!(op_id = %op.op_id, "remote operation is stale, keeping local");
                    return merged;
                }
                ClockOrdering::Dominates | ClockOrdering::Concurrent => {
                    for (name, value) in fields {
                        if schema.is_counter(name) {
                            // Rule: an absolute remote write never
                            // clobbers a counter on an existing entity.
                            continue;
                        }
                        let incoming =
                            FieldState::new(value.clone(), op.timestamp_ms, op.device.clone());
                        let write = match merged.fields.get(name) {
                            None => true,
                            Some(current) => {
                                if ordering == ClockOrdering::Dominates
                                    && !schema.is_critical(name)
                                {
                                    true
                                } else {
                                    incoming.wins_over(current)
                                }
                            }
                        };
                        if write {
                            merged.set_field(name.clone(), incoming);
                        }
                    }
                }
            }
        }
    }

    merged.version.merge(&op.vector_clock);
    merged
}
