//! Remote sync adapter abstraction.

use crate::error::{AdapterError, AdapterResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use syncline_model::{CollectionName, EntityId, OpId, Operation, OperationKind};

/// The narrow interface to the authoritative remote store.
///
/// The engine never assumes the remote store can run arbitrary
/// multi-document transactions: when [`supports_transactions`] is
/// false, it degrades to per-step [`upsert`] calls guarded by
/// [`applied_marker`] idempotency checks.
///
/// Adapter calls are the only blocking operations in the engine; real
/// implementations carry a timeout and fail with
/// [`AdapterError::Offline`] when the transport is down.
///
/// [`supports_transactions`]: RemoteAdapter::supports_transactions
/// [`upsert`]: RemoteAdapter::upsert
/// [`applied_marker`]: RemoteAdapter::applied_marker
pub trait RemoteAdapter: Send + Sync {
    /// Applies one operation to the remote store.
    fn upsert(&self, op: &Operation) -> AdapterResult<()>;

    /// Returns true if the remote store has already applied this
    /// operation.
    fn applied_marker(&self, op_id: &OpId) -> AdapterResult<bool>;

    /// Applies a group of operations in one remote transaction.
    ///
    /// Only called when [`RemoteAdapter::supports_transactions`] is
    /// true.
    fn run_transaction(&self, ops: &[Operation]) -> AdapterResult<()>;

    /// Returns true if the remote store supports multi-document
    /// transactions.
    fn supports_transactions(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct MockState {
    applied: HashSet<OpId>,
    received: Vec<Operation>,
    known_entities: HashSet<(CollectionName, EntityId)>,
    fail_next: u32,
    permanent_failure: bool,
    offline: bool,
    require_existing: bool,
    upsert_calls: u64,
}

/// A scripted in-memory adapter for testing.
///
/// Behaves like a remote store with an applied-marker table: repeated
/// upserts of the same operation are accepted but recorded once.
#[derive(Debug, Default)]
pub struct MockRemoteAdapter {
    state: Mutex<MockState>,
    transactions: bool,
}

impl MockRemoteAdapter {
    /// Creates a per-document mock (no transaction support).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock that accepts multi-document transactions.
    #[must_use]
    pub fn with_transactions() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            transactions: true,
        }
    }

    /// Makes the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Makes every call fail with a permanent error.
    pub fn set_permanent_failure(&self, enabled: bool) {
        self.state.lock().permanent_failure = enabled;
    }

    /// Simulates the transport being down.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// When enabled, non-create operations on entities the remote has
    /// never seen fail with `MissingDependency`.
    pub fn set_require_existing(&self, enabled: bool) {
        self.state.lock().require_existing = enabled;
    }

    /// Returns every distinct operation applied, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<Operation> {
        self.state.lock().received.clone()
    }

    /// Returns the number of upsert calls made (including duplicates
    /// and failures).
    #[must_use]
    pub fn upsert_calls(&self) -> u64 {
        self.state.lock().upsert_calls
    }

    /// Returns true if the operation was applied.
    #[must_use]
    pub fn has_applied(&self, op_id: &OpId) -> bool {
        self.state.lock().applied.contains(op_id)
    }

    fn check_failures(state: &mut MockState) -> AdapterResult<()> {
        if state.offline {
            return Err(AdapterError::Offline);
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(AdapterError::transient("scripted transient failure"));
        }
        if state.permanent_failure {
            return Err(AdapterError::permanent("scripted permanent failure"));
        }
        Ok(())
    }

    fn apply(state: &mut MockState, op: &Operation) -> AdapterResult<()> {
        let key = (op.collection.clone(), op.entity_id);
        if state.require_existing
            && !matches!(op.kind, OperationKind::Create { .. })
            && !state.known_entities.contains(&key)
        {
            return Err(AdapterError::MissingDependency {
                collection: op.collection.clone(),
                entity_id: op.entity_id,
            });
        }

        if state.applied.insert(op.op_id) {
            state.received.push(op.clone());
        }
        state.known_entities.insert(key);
        Ok(())
    }
}

impl RemoteAdapter for MockRemoteAdapter {
    fn upsert(&self, op: &Operation) -> AdapterResult<()> {
        let mut state = self.state.lock();
        state.upsert_calls += 1;
        Self::check_failures(&mut state)?;
        Self::apply(&mut state, op)
    }

    fn applied_marker(&self, op_id: &OpId) -> AdapterResult<bool> {
        let mut state = self.state.lock();
        Self::check_failures(&mut state)?;
        Ok(state.applied.contains(op_id))
    }

    fn run_transaction(&self, ops: &[Operation]) -> AdapterResult<()> {
        let mut state = self.state.lock();
        state.upsert_calls += 1;
        Self::check_failures(&mut state)?;

        // All-or-nothing: check dependencies before applying anything.
        let mut creates: HashMap<(CollectionName, EntityId), ()> = HashMap::new();
        for op in ops {
            let key = (op.collection.clone(), op.entity_id);
            if matches!(op.kind, OperationKind::Create { .. }) {
                creates.insert(key, ());
            } else if state.require_existing
                && !state.known_entities.contains(&key)
                && !creates.contains_key(&key)
            {
                return Err(AdapterError::MissingDependency {
                    collection: op.collection.clone(),
                    entity_id: op.entity_id,
                });
            }
        }
        for op in ops {
            Self::apply(&mut state, op)?;
        }
        Ok(())
    }

    fn supports_transactions(&self) -> bool {
        self.transactions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use syncline_model::{DeltaSource, DeviceId, Origin, VectorClock};

    fn create_op(op_id: u8, entity_id: EntityId) -> Operation {
        Operation {
            op_id: OpId::from_bytes([op_id; 16]),
            collection: CollectionName::new("inventory"),
            entity_id,
            kind: OperationKind::Create {
                fields: BTreeMap::new(),
            },
            vector_clock: VectorClock::new(),
            timestamp_ms: 100,
            origin: Origin::Local,
            device: DeviceId::new("pos-1"),
        }
    }

    fn adjust_op(op_id: u8, entity_id: EntityId) -> Operation {
        Operation {
            kind: OperationKind::Adjust {
                field: "stock".into(),
                amount: -1,
                source: DeltaSource::Direct,
            },
            ..create_op(op_id, entity_id)
        }
    }

    #[test]
    fn duplicate_upserts_apply_once() {
        let adapter = MockRemoteAdapter::new();
        let op = create_op(1, EntityId::new());

        adapter.upsert(&op).unwrap();
        adapter.upsert(&op).unwrap();

        assert_eq!(adapter.received().len(), 1);
        assert_eq!(adapter.upsert_calls(), 2);
        assert!(adapter.applied_marker(&op.op_id).unwrap());
    }

    #[test]
    fn scripted_transient_failures() {
        let adapter = MockRemoteAdapter::new();
        adapter.fail_next(2);
        let op = create_op(1, EntityId::new());

        assert!(matches!(
            adapter.upsert(&op),
            Err(AdapterError::Transient { .. })
        ));
        assert!(matches!(
            adapter.upsert(&op),
            Err(AdapterError::Transient { .. })
        ));
        adapter.upsert(&op).unwrap();
    }

    #[test]
    fn offline_rejects_everything() {
        let adapter = MockRemoteAdapter::new();
        adapter.set_offline(true);

        let op = create_op(1, EntityId::new());
        assert!(matches!(adapter.upsert(&op), Err(AdapterError::Offline)));
        assert!(matches!(
            adapter.applied_marker(&op.op_id),
            Err(AdapterError::Offline)
        ));
    }

    #[test]
    fn missing_dependency_reported_when_required() {
        let adapter = MockRemoteAdapter::new();
        adapter.set_require_existing(true);
        let entity = EntityId::new();

        assert!(matches!(
            adapter.upsert(&adjust_op(2, entity)),
            Err(AdapterError::MissingDependency { .. })
        ));

        adapter.upsert(&create_op(1, entity)).unwrap();
        adapter.upsert(&adjust_op(2, entity)).unwrap();
    }

    #[test]
    fn transaction_applies_all_or_nothing() {
        let adapter = MockRemoteAdapter::with_transactions();
        assert!(adapter.supports_transactions());
        adapter.set_require_existing(true);

        let entity = EntityId::new();
        // Create then adjust inside one transaction is fine.
        adapter
            .run_transaction(&[create_op(1, entity), adjust_op(2, entity)])
            .unwrap();
        assert_eq!(adapter.received().len(), 2);

        // Adjust on an unknown entity fails without applying anything.
        let other = EntityId::new();
        assert!(adapter.run_transaction(&[adjust_op(3, other)]).is_err());
        assert_eq!(adapter.received().len(), 2);
    }
}
