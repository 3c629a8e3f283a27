//! Provisional overlay of unconfirmed local operations.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use syncline_model::{
    Entity, EntityId, FieldState, OpId, Operation, OperationKind, Origin, Schema,
};

/// Unconfirmed local operations for one collection, keyed by target
/// entity.
///
/// The overlay holds every locally-applied operation that has not yet
/// been confirmed by the remote store. Reads fold it over the base
/// state; a successful commit moves the operation out of the overlay
/// and into the base.
#[derive(Debug, Default)]
pub struct Overlay {
    pending: BTreeMap<EntityId, Vec<Operation>>,
    by_op: HashSet<OpId>,
}

impl Overlay {
    /// Creates an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores an overlay from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(ops: Vec<Operation>) -> Self {
        let mut overlay = Self::new();
        for op in ops {
            overlay.insert(op);
        }
        overlay
    }

    /// Returns a persistable snapshot in insertion order per entity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Operation> {
        self.pending.values().flatten().cloned().collect()
    }

    /// Adds a pending operation.
    ///
    /// Only local-origin operations belong in the overlay; remote
    /// operations merge directly into the base.
    pub fn insert(&mut self, op: Operation) {
        debug_assert_eq!(op.origin, Origin::Local);
        if !self.by_op.insert(op.op_id) {
            return;
        }
        self.pending.entry(op.entity_id).or_default().push(op);
    }

    /// Returns true if the operation is pending.
    #[must_use]
    pub fn contains(&self, op_id: &OpId) -> bool {
        self.by_op.contains(op_id)
    }

    /// Removes and returns a pending operation.
    pub fn take(&mut self, op_id: &OpId) -> Option<Operation> {
        if !self.by_op.remove(op_id) {
            return None;
        }
        for (entity_id, ops) in &mut self.pending {
            if let Some(pos) = ops.iter().position(|op| op.op_id == *op_id) {
                let op = ops.remove(pos);
                if ops.is_empty() {
                    let entity_id = *entity_id;
                    self.pending.remove(&entity_id);
                }
                return Some(op);
            }
        }
        None
    }

    /// Returns the pending operations for an entity, in apply order.
    #[must_use]
    pub fn pending_for(&self, entity_id: &EntityId) -> &[Operation] {
        self.pending
            .get(entity_id)
            .map_or(&[], |ops| ops.as_slice())
    }

    /// Returns the entities that have pending operations.
    pub fn entity_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.pending.keys()
    }

    /// Returns the total number of pending operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_op.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_op.is_empty()
    }
}

/// Materializes an entity from base state plus pending overlay
/// operations.
///
/// Folding rules:
/// - counter fields: `materialized = base + Σ(pending deltas)`; a
///   create's initial counter value is itself a delta from zero, so it
///   sums with accumulation the base may already carry
/// - whole-record fields: last-writer-wins by timestamp within the
///   overlay, and the overlay wins over the base for fields it touches
/// - the materialized version is the base version merged with every
///   pending clock
///
/// Returns `None` only when there is neither base state nor anything
/// pending.
#[must_use]
pub fn fold(base: Option<&Entity>, pending: &[Operation], schema: &Schema) -> Option<Entity> {
    if pending.is_empty() {
        return base.cloned();
    }

    let mut entity = base
        .cloned()
        .unwrap_or_else(|| Entity::new(pending[0].entity_id));
    let mut touched: BTreeSet<&str> = BTreeSet::new();

    for op in pending {
        match &op.kind {
            OperationKind::Create { fields } | OperationKind::Patch { fields } => {
                for (name, value) in fields {
                    if schema.is_counter(name) {
                        // Patches cannot carry counters (validation);
                        // this is a create's initial value.
                        add_to_counter(
                            &mut entity,
                            name,
                            value.as_integer().unwrap_or(0),
                            op.timestamp_ms,
                            &op.device,
                        );
                        continue;
                    }
                    let incoming =
                        FieldState::new(value.clone(), op.timestamp_ms, op.device.clone());
                    let write = if touched.contains(name.as_str()) {
                        // Competing overlay writes: last writer wins.
                        entity
                            .fields
                            .get(name)
                            .is_none_or(|current| incoming.wins_over(current))
                    } else {
                        // First overlay touch beats whatever the base had.
                        true
                    };
                    if write {
                        entity.set_field(name.clone(), incoming);
                    }
                    touched.insert(name.as_str());
                }
            }
            OperationKind::Adjust { field, amount, .. } => {
                add_to_counter(&mut entity, field, *amount, op.timestamp_ms, &op.device);
            }
        }
        entity.version.merge(&op.vector_clock);
    }

    Some(entity)
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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap as Fields;
    use syncline_model::{
        CollectionName, DeltaSource, DeviceId, FieldSpec, FieldValue, ValueType, VectorClock,
    };

    fn schema() -> Schema {
        Schema::new("inventory")
            .field("name", FieldSpec::plain(ValueType::Text))
            .field("stock", FieldSpec::counter())
    }

    fn entity_with_stock(id: EntityId, stock: i64) -> Entity {
        let mut entity = Entity::new(id);
        entity.set_field("stock", FieldState::new(stock, 50, DeviceId::new("base")));
        entity.set_field(
            "name",
            FieldState::new("espresso", 50, DeviceId::new("base")),
        );
        entity
    }

    fn adjust(id: EntityId, op_id: u8, amount: i64, ts: u64) -> Operation {
        Operation {
            op_id: OpId::from_bytes([op_id; 16]),
            collection: CollectionName::new("inventory"),
            entity_id: id,
            kind: OperationKind::Adjust {
                field: "stock".into(),
                amount,
                source: DeltaSource::Direct,
            },
            vector_clock: VectorClock::new(),
            timestamp_ms: ts,
            origin: Origin::Local,
            device: DeviceId::new("pos-1"),
        }
    }

    fn patch(id: EntityId, op_id: u8, name: &str, ts: u64, device: &str) -> Operation {
        let mut fields: Fields<String, FieldValue> = Fields::new();
        fields.insert("name".into(), name.into());
        Operation {
            op_id: OpId::from_bytes([op_id; 16]),
            collection: CollectionName::new("inventory"),
            entity_id: id,
            kind: OperationKind::Patch { fields },
            vector_clock: VectorClock::new(),
            timestamp_ms: ts,
            origin: Origin::Local,
            device: DeviceId::new(device),
        }
    }

    #[test]
    fn fold_sums_pending_deltas_over_base() {
        let id = EntityId::new();
        let base = entity_with_stock(id, 10);
        let pending = vec![adjust(id, 1, -3, 100), adjust(id, 2, -2, 110)];

        let folded = fold(Some(&base), &pending, &schema()).unwrap();
        assert_eq!(folded.integer("stock"), 5);
    }

    #[test]
    fn fold_without_base_counts_from_zero() {
        let id = EntityId::new();
        let pending = vec![adjust(id, 1, 4, 100)];

        let folded = fold(None, &pending, &schema()).unwrap();
        assert_eq!(folded.integer("stock"), 4);
    }

    #[test]
    fn fold_nothing_is_none() {
        assert!(fold(None, &[], &schema()).is_none());
    }

    #[test]
    fn overlay_write_beats_base_even_when_older() {
        let id = EntityId::new();
        let base = entity_with_stock(id, 10);
        // Base "name" was written at ts 50; this overlay patch is older
        // (ts 10) but still wins because the overlay beats the base.
        let pending = vec![patch(id, 1, "ristretto", 10, "pos-1")];

        let folded = fold(Some(&base), &pending, &schema()).unwrap();
        assert_eq!(folded.text("name"), Some("ristretto"));
    }

    #[test]
    fn competing_overlay_writes_use_lww() {
        let id = EntityId::new();
        let pending = vec![
            patch(id, 1, "first", 200, "pos-1"),
            patch(id, 2, "second", 100, "pos-1"),
        ];

        // The second op is applied later but has an older timestamp.
        let folded = fold(None, &pending, &schema()).unwrap();
        assert_eq!(folded.text("name"), Some("first"));
    }

    #[test]
    fn overlay_lww_tie_breaks_on_device() {
        let id = EntityId::new();
        let pending = vec![
            patch(id, 1, "from-b", 100, "pos-b"),
            patch(id, 2, "from-a", 100, "pos-a"),
        ];

        let folded = fold(None, &pending, &schema()).unwrap();
        assert_eq!(folded.text("name"), Some("from-b"));
    }

    #[test]
    fn take_removes_pending_op() {
        let id = EntityId::new();
        let mut overlay = Overlay::new();
        overlay.insert(adjust(id, 1, -3, 100));
        overlay.insert(adjust(id, 2, -2, 110));

        let taken = overlay.take(&OpId::from_bytes([1u8; 16])).unwrap();
        assert_eq!(taken.delta().unwrap().amount, -3);
        assert_eq!(overlay.len(), 1);
        assert!(!overlay.contains(&OpId::from_bytes([1u8; 16])));
        assert!(overlay.take(&OpId::from_bytes([1u8; 16])).is_none());
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let id = EntityId::new();
        let mut overlay = Overlay::new();
        overlay.insert(adjust(id, 1, -3, 100));
        overlay.insert(adjust(id, 1, -3, 100));

        assert_eq!(overlay.len(), 1);
        assert_eq!(overlay.pending_for(&id).len(), 1);
    }

    #[test]
    fn snapshot_roundtrip() {
        let id = EntityId::new();
        let mut overlay = Overlay::new();
        overlay.insert(adjust(id, 1, -3, 100));
        overlay.insert(patch(id, 2, "renamed", 120, "pos-1"));

        let restored = Overlay::from_snapshot(overlay.snapshot());
        assert_eq!(restored.len(), 2);
        assert!(restored.contains(&OpId::from_bytes([2u8; 16])));
    }

    proptest! {
        // Delta commutativity: the materialized value is invariant
        // under reordering of the same delta set.
        #[test]
        fn fold_is_order_independent_for_deltas(
            amounts in proptest::collection::vec(-20i64..20, 1..8),
            seed in 0u64..1_000,
        ) {
            let id = EntityId::from_bytes([9u8; 16]);
            let base = entity_with_stock(id, 100);

            let ops: Vec<Operation> = amounts
                .iter()
                .enumerate()
                .map(|(i, &a)| adjust(id, u8::try_from(i + 1).unwrap(), a, 100 + i as u64))
                .collect();

            let mut shuffled = ops.clone();
            // Deterministic pseudo-shuffle driven by the seed.
            let len = shuffled.len();
            for i in 0..len {
                let j = (seed as usize + i * 7) % len;
                shuffled.swap(i, j);
            }

            let a = fold(Some(&base), &ops, &schema()).unwrap();
            let b = fold(Some(&base), &shuffled, &schema()).unwrap();
            prop_assert_eq!(a.integer("stock"), b.integer("stock"));
        }
    }
}
