//! Local store facade: base + overlay + ledger behind per-collection
//! locks.

use crate::backend::StorageBackend;
use crate::base::BaseStore;
use crate::codec::{decode, encode};
use crate::error::{StoreError, StoreResult};
use crate::ledger::{LedgerSnapshot, OperationLedger};
use crate::overlay::{fold, Overlay};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use syncline_model::{
    CollectionName, Entity, EntityId, OpId, Operation, Origin, SchemaRegistry,
};
use tracing::debug;

const LEDGER_SET: &str = "ledger";

struct CollectionState {
    base: BaseStore,
    overlay: Overlay,
}

/// Durable local state: one base + overlay pair per collection, plus
/// the operation ledger.
///
/// Writes persist through the storage backend as they happen; reads
/// fold base and overlay and never block on the network. Each
/// collection is guarded by its own lock; the ledger has its own.
pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
    schemas: SchemaRegistry,
    collections: HashMap<CollectionName, RwLock<CollectionState>>,
    ledger: Mutex<OperationLedger>,
}

impl LocalStore {
    /// Opens the local store, loading persisted state for every
    /// registered collection.
    pub fn open(
        backend: Arc<dyn StorageBackend>,
        schemas: SchemaRegistry,
        ledger_capacity: usize,
    ) -> StoreResult<Self> {
        let mut collections = HashMap::new();
        for collection in schemas.collections() {
            let base = match backend.load(&base_set(collection))? {
                Some(bytes) => BaseStore::from_snapshot(decode(&bytes)?),
                None => BaseStore::new(),
            };
            let overlay = match backend.load(&overlay_set(collection))? {
                Some(bytes) => Overlay::from_snapshot(decode(&bytes)?),
                None => Overlay::new(),
            };
            collections.insert(collection.clone(), RwLock::new(CollectionState { base, overlay }));
        }

        let ledger = match backend.load(LEDGER_SET)? {
            Some(bytes) => {
                let snapshot: LedgerSnapshot = decode(&bytes)?;
                OperationLedger::from_snapshot(snapshot, ledger_capacity)
            }
            None => OperationLedger::with_capacity(ledger_capacity),
        };

        Ok(Self {
            backend,
            schemas,
            collections,
            ledger: Mutex::new(ledger),
        })
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Returns the storage backend (shared with the outbox).
    #[must_use]
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    /// Returns true if the operation was already applied or is pending.
    #[must_use]
    pub fn is_known(&self, op_id: &OpId) -> bool {
        if self.ledger.lock().contains(op_id) {
            return true;
        }
        self.collections
            .values()
            .any(|state| state.read().overlay.contains(op_id))
    }

    /// Materializes every entity of a collection (base + overlay fold).
    pub fn read(&self, collection: &CollectionName) -> StoreResult<Vec<Entity>> {
        let schema = self.schemas.get(collection)?;
        let state = self.state(collection)?.read();

        let mut ids: Vec<EntityId> = state.base.entity_ids().copied().collect();
        for id in state.overlay.entity_ids() {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids.sort();

        Ok(ids
            .into_iter()
            .filter_map(|id| fold(state.base.get(&id), state.overlay.pending_for(&id), schema))
            .collect())
    }

    /// Materializes one entity.
    pub fn get(
        &self,
        collection: &CollectionName,
        entity_id: &EntityId,
    ) -> StoreResult<Option<Entity>> {
        let schema = self.schemas.get(collection)?;
        let state = self.state(collection)?.read();
        Ok(fold(
            state.base.get(entity_id),
            state.overlay.pending_for(entity_id),
            schema,
        ))
    }

    /// Returns the committed (base-only) view of one entity.
    pub fn get_base(
        &self,
        collection: &CollectionName,
        entity_id: &EntityId,
    ) -> StoreResult<Option<Entity>> {
        let state = self.state(collection)?.read();
        Ok(state.base.get(entity_id).cloned())
    }

    /// Applies a local-origin operation to the provisional overlay.
    ///
    /// The caller is responsible for validation and duplicate checks;
    /// a duplicate here is still rejected as a final guard.
    pub fn apply_local(&self, op: &Operation) -> StoreResult<()> {
        debug_assert_eq!(op.origin, Origin::Local);
        if self.is_known(&op.op_id) {
            return Err(StoreError::DuplicateOperation { op_id: op.op_id });
        }

        let collection = op.collection.clone();
        {
            let mut state = self.state(&collection)?.write();
            state.overlay.insert(op.clone());
            self.persist_overlay(&collection, &state.overlay)?;
        }
        debug!(op_id = %op.op_id, collection = %collection, "applied to overlay");
        Ok(())
    }

    /// Commits a confirmed operation: overlay entry moves into the
    /// base, the op is recorded in the ledger, and the overlay entry is
    /// pruned. Committing an already-committed operation is a no-op.
    pub fn commit_local(&self, op: &Operation) -> StoreResult<()> {
        let collection = op.collection.clone();
        {
            let schema = self.schemas.get(&collection)?;
            let mut state = self.state(&collection)?.write();
            let Some(pending) = state.overlay.take(&op.op_id) else {
                if self.ledger.lock().contains(&op.op_id) {
                    return Ok(());
                }
                return Err(StoreError::NotPending { op_id: op.op_id });
            };
            state.base.apply_committed(&pending, schema);
            self.persist_base(&collection, &state.base)?;
            self.persist_overlay(&collection, &state.overlay)?;
        }
        self.record_applied(op.op_id)?;
        debug!(op_id = %op.op_id, collection = %collection, "committed to base");
        Ok(())
    }

    /// Drops a pending operation without committing it (manual
    /// dead-letter reconciliation). Unknown ops are a no-op.
    pub fn discard_local(&self, op: &Operation) -> StoreResult<()> {
        let collection = op.collection.clone();
        let mut state = self.state(&collection)?.write();
        if state.overlay.take(&op.op_id).is_some() {
            self.persist_overlay(&collection, &state.overlay)?;
            debug!(op_id = %op.op_id, collection = %collection, "discarded pending op");
        }
        Ok(())
    }

    /// Writes a resolver-merged entity into the base state and records
    /// the remote operation as applied.
    pub fn put_base(
        &self,
        collection: &CollectionName,
        entity: Entity,
        op_id: OpId,
    ) -> StoreResult<()> {
        {
            let mut state = self.state(collection)?.write();
            state.base.upsert(entity);
            self.persist_base(collection, &state.base)?;
        }
        self.record_applied(op_id)?;
        Ok(())
    }

    /// Sums the pending overlay deltas for one counter field of an
    /// entity.
    pub fn pending_delta_sum(
        &self,
        collection: &CollectionName,
        entity_id: &EntityId,
        field: &str,
    ) -> StoreResult<i64> {
        let state = self.state(collection)?.read();
        Ok(state
            .overlay
            .pending_for(entity_id)
            .iter()
            .filter_map(Operation::delta)
            .filter(|d| d.field == field)
            .map(|d| d.amount)
            .sum())
    }

    /// Returns the number of pending overlay operations.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.collections
            .values()
            .map(|state| state.read().overlay.len())
            .sum()
    }

    fn state(&self, collection: &CollectionName) -> StoreResult<&RwLock<CollectionState>> {
        self.collections.get(collection).ok_or_else(|| {
            StoreError::Model(syncline_model::ModelError::UnknownCollection {
                name: collection.clone(),
            })
        })
    }

    fn record_applied(&self, op_id: OpId) -> StoreResult<()> {
        let snapshot = {
            let mut ledger = self.ledger.lock();
            ledger.record(op_id);
            ledger.snapshot()
        };
        self.backend.store(LEDGER_SET, &encode(&snapshot)?)
    }

    fn persist_base(&self, collection: &CollectionName, base: &BaseStore) -> StoreResult<()> {
        self.backend
            .store(&base_set(collection), &encode(&base.snapshot())?)
    }

    fn persist_overlay(&self, collection: &CollectionName, overlay: &Overlay) -> StoreResult<()> {
        self.backend
            .store(&overlay_set(collection), &encode(&overlay.snapshot())?)
    }
}

fn base_set(collection: &CollectionName) -> String {
    format!("base/{collection}")
}

fn overlay_set(collection: &CollectionName) -> String {
    format!("overlay/{collection}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use std::collections::BTreeMap;
    use syncline_model::{
        DeltaSource, DeviceId, FieldSpec, FieldValue, OperationKind, Schema, ValueType,
        VectorClock,
    };

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.register(
            Schema::new("inventory")
                .field("name", FieldSpec::plain(ValueType::Text))
                .field("stock", FieldSpec::counter()),
        );
        registry
    }

    fn open_store(backend: Arc<dyn StorageBackend>) -> LocalStore {
        LocalStore::open(backend, registry(), 100).unwrap()
    }

    fn create_op(op_id: u8, entity_id: EntityId) -> Operation {
        let mut fields: BTreeMap<String, FieldValue> = BTreeMap::new();
        fields.insert("name".into(), "espresso".into());
        fields.insert("stock".into(), 10i64.into());
        Operation {
            op_id: OpId::from_bytes([op_id; 16]),
            collection: CollectionName::new("inventory"),
            entity_id,
            kind: OperationKind::Create { fields },
            vector_clock: VectorClock::new(),
            timestamp_ms: 100,
            origin: Origin::Local,
            device: DeviceId::new("pos-1"),
        }
    }

    fn adjust_op(op_id: u8, entity_id: EntityId, amount: i64) -> Operation {
        Operation {
            op_id: OpId::from_bytes([op_id; 16]),
            collection: CollectionName::new("inventory"),
            entity_id,
            kind: OperationKind::Adjust {
                field: "stock".into(),
                amount,
                source: DeltaSource::Direct,
            },
            vector_clock: VectorClock::new(),
            timestamp_ms: 200,
            origin: Origin::Local,
            device: DeviceId::new("pos-1"),
        }
    }

    #[test]
    fn reads_fold_base_and_overlay() {
        let store = open_store(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();

        store.apply_local(&create_op(1, id)).unwrap();
        store.apply_local(&adjust_op(2, id, -3)).unwrap();

        let entity = store
            .get(&CollectionName::new("inventory"), &id)
            .unwrap()
            .unwrap();
        assert_eq!(entity.integer("stock"), 7);

        // Nothing is committed yet.
        assert!(store
            .get_base(&CollectionName::new("inventory"), &id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_apply_is_rejected() {
        let store = open_store(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();

        store.apply_local(&create_op(1, id)).unwrap();
        assert!(matches!(
            store.apply_local(&create_op(1, id)),
            Err(StoreError::DuplicateOperation { .. })
        ));
    }

    #[test]
    fn commit_moves_overlay_to_base() {
        let store = open_store(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();
        let collection = CollectionName::new("inventory");

        let create = create_op(1, id);
        let adjust = adjust_op(2, id, -3);
        store.apply_local(&create).unwrap();
        store.apply_local(&adjust).unwrap();

        store.commit_local(&create).unwrap();

        // Materialized view is unchanged by the commit.
        let entity = store.get(&collection, &id).unwrap().unwrap();
        assert_eq!(entity.integer("stock"), 7);

        // Base now holds the create but not the pending delta.
        let base = store.get_base(&collection, &id).unwrap().unwrap();
        assert_eq!(base.integer("stock"), 10);

        store.commit_local(&adjust).unwrap();
        let base = store.get_base(&collection, &id).unwrap().unwrap();
        assert_eq!(base.integer("stock"), 7);
        assert_eq!(store.pending_count(), 0);

        // Re-committing is a no-op.
        store.commit_local(&adjust).unwrap();
        assert!(store.is_known(&adjust.op_id));
    }

    #[test]
    fn commit_unknown_op_fails() {
        let store = open_store(Arc::new(MemoryBackend::new()));
        let op = adjust_op(9, EntityId::new(), 1);

        assert!(matches!(
            store.commit_local(&op),
            Err(StoreError::NotPending { .. })
        ));
    }

    #[test]
    fn state_survives_reopen() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let id = EntityId::new();

        {
            let store = open_store(Arc::clone(&backend));
            let create = create_op(1, id);
            store.apply_local(&create).unwrap();
            store.commit_local(&create).unwrap();
            store.apply_local(&adjust_op(2, id, -4)).unwrap();
        }

        let store = open_store(backend);
        let entity = store
            .get(&CollectionName::new("inventory"), &id)
            .unwrap()
            .unwrap();
        assert_eq!(entity.integer("stock"), 6);
        assert!(store.is_known(&OpId::from_bytes([1u8; 16])));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn pending_delta_sum_only_counts_matching_field() {
        let store = open_store(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();
        let collection = CollectionName::new("inventory");

        store.apply_local(&adjust_op(1, id, -3)).unwrap();
        store.apply_local(&adjust_op(2, id, -2)).unwrap();

        assert_eq!(store.pending_delta_sum(&collection, &id, "stock").unwrap(), -5);
        assert_eq!(store.pending_delta_sum(&collection, &id, "other").unwrap(), 0);
    }

    #[test]
    fn unknown_collection_is_an_error() {
        let store = open_store(Arc::new(MemoryBackend::new()));
        assert!(store.read(&CollectionName::new("missing")).is_err());
    }

    #[test]
    fn discard_removes_pending_without_commit() {
        let store = open_store(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();
        let op = adjust_op(1, id, -3);

        store.apply_local(&op).unwrap();
        store.discard_local(&op).unwrap();

        assert_eq!(store.pending_count(), 0);
        assert!(!store.is_known(&op.op_id));
        // Discarding again is harmless.
        store.discard_local(&op).unwrap();
    }
}
