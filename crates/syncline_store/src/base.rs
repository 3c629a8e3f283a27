//! Committed base state per collection.

use std::collections::BTreeMap;
use syncline_model::{Entity, EntityId, FieldState, Operation, OperationKind, Schema};

/// The committed entities of one collection.
///
/// Base state only changes in two places: the scheduler's commit step
/// (a confirmed local operation folded in) and the resolver's merge of
/// remote-origin operations. Everything else reads through the fold.
#[derive(Debug, Default)]
pub struct BaseStore {
    entities: BTreeMap<EntityId, Entity>,
}

impl BaseStore {
    /// Creates an empty base store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a base store from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(entities: Vec<Entity>) -> Self {
        Self {
            entities: entities.into_iter().map(|e| (e.id, e)).collect(),
        }
    }

    /// Returns a persistable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Entity> {
        self.entities.values().cloned().collect()
    }

    /// Returns a committed entity.
    #[must_use]
    pub fn get(&self, entity_id: &EntityId) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    /// Inserts or replaces a committed entity (resolver output).
    pub fn upsert(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    /// Returns all committed entity IDs.
    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.entities.keys()
    }

    /// Returns the number of committed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if no entities are committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Folds a confirmed local operation into the base state.
    ///
    /// Whole-record fields overwrite unconditionally: the operation was
    /// already visible through the overlay, and commit must not change
    /// what reads return. Counter fields always add, including a
    /// create's initial value, which is a delta from zero; the base may
    /// already carry remote accumulation that must survive.
    pub fn apply_committed(&mut self, op: &Operation, schema: &Schema) {
        let entity = self
            .entities
            .entry(op.entity_id)
            .or_insert_with(|| Entity::new(op.entity_id));

        match &op.kind {
            OperationKind::Create { fields } | OperationKind::Patch { fields } => {
                for (name, value) in fields {
                    if schema.is_counter(name) {
                        add_to_counter(
                            entity,
                            name,
                            value.as_integer().unwrap_or(0),
                            op.timestamp_ms,
                            &op.device,
                        );
                        continue;
                    }
                    entity.set_field(
                        name.clone(),
                        FieldState::new(value.clone(), op.timestamp_ms, op.device.clone()),
                    );
                }
            }
            OperationKind::Adjust { field, amount, .. } => {
                add_to_counter(entity, field, *amount, op.timestamp_ms, &op.device);
            }
        }
        entity.version.merge(&op.vector_clock);
    }
}

fn add_to_counter(
    entity: &mut Entity,
    field: &str,
    amount: i64,
    timestamp_ms: u64,
    device: &syncline_model::DeviceId,
) {
    let current = entity.integer(field);
    let timestamp = entity
        .fields
        .get(field)
        .map_or(timestamp_ms, |f| f.updated_at_ms.max(timestamp_ms));
    entity.set_field(
        field.to_owned(),
        FieldState::new(current + amount, timestamp, device.clone()),
    );
}
