//! The engine facade: command API, remote apply, status, lifecycle.

use crate::auth::{AccessDecision, AuthorizationGate, CommandAction};
use crate::clock::Clock;
use crate::command::{Command, OpRequest};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::network::ConnectivityState;
use crate::outbox::{DeadLetterItem, DeadLetterSnapshot, Outbox, Priority, QueueSnapshot};
use crate::scheduler;
use crate::adapter::RemoteAdapter;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use syncline_store::{decode, encode, LocalStore, StorageBackend};
use syncline_model::{
    Bundle, BundleId, CollectionName, Entity, EntityId, Operation, Origin, SchemaRegistry,
    VectorClock,
};
use tracing::{debug, info, warn};

const OUTBOX_SET: &str = "outbox";
const DEAD_LETTER_SET: &str = "dead_letter";
const DEVICE_CLOCK_SET: &str = "device_clock";

/// Result of a local apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The operation (or bundle) was applied and enqueued.
    Applied,
    /// The operation was already known; treated as success, nothing
    /// was mutated.
    Duplicate,
}

/// Receipt returned by `apply_bundle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReceipt {
    /// The bundle's identity (caller-supplied, deterministic).
    pub bundle_id: BundleId,
    /// Whether the bundle was applied or recognized as a replay.
    pub outcome: ApplyOutcome,
}

/// Snapshot of the sync pipeline for status surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    /// Bundles waiting in the main lanes.
    pub queue_len: usize,
    /// Bundles parked in the dead-letter lane.
    pub dead_letter_len: usize,
    /// Current connectivity belief.
    pub is_online: bool,
}

/// Counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Bundles confirmed by the remote store.
    pub bundles_committed: u64,
    /// Operations pushed and committed locally.
    pub operations_pushed: u64,
    /// Remote-origin operations merged into the base.
    pub operations_applied: u64,
    /// Retry attempts recorded.
    pub retries: u64,
    /// Items moved to the dead-letter lane.
    pub dead_lettered: u64,
    /// Last completed flush, milliseconds since the Unix epoch.
    pub last_flush_at_ms: Option<u64>,
    /// Most recent sync error message.
    pub last_error: Option<String>,
}

/// Shared engine internals, owned behind an `Arc` so the scheduler
/// thread and the facade see the same state.
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) store: LocalStore,
    pub(crate) outbox: Mutex<Outbox>,
    pub(crate) adapter: Arc<dyn RemoteAdapter>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) auth: Arc<dyn AuthorizationGate>,
    pub(crate) connectivity: ConnectivityState,
    pub(crate) device_clock: Mutex<VectorClock>,
    pub(crate) apply_lock: Mutex<()>,
    pub(crate) stats: RwLock<SyncStats>,
    pub(crate) lane_locks: [Mutex<()>; 3],
    pub(crate) wake_flag: Mutex<bool>,
    pub(crate) wake_cv: Condvar,
    pub(crate) shutdown: AtomicBool,
    pub(crate) flush_all_now: AtomicBool,
}

impl EngineInner {
    pub(crate) fn wake(&self) {
        let mut flag = self.wake_flag.lock();
        *flag = true;
        self.wake_cv.notify_all();
    }

    pub(crate) fn persist_outbox(&self, outbox: &Outbox) -> EngineResult<()> {
        let backend = self.store.backend();
        backend.store(OUTBOX_SET, &encode(&outbox.queue_snapshot())?)?;
        backend.store(DEAD_LETTER_SET, &encode(&outbox.dead_letter_snapshot())?)?;
        Ok(())
    }

    fn persist_device_clock(&self, clock: &VectorClock) -> EngineResult<()> {
        self.store
            .backend()
            .store(DEVICE_CLOCK_SET, &encode(clock)?)?;
        Ok(())
    }

    fn authorize(&self, action: &CommandAction) -> EngineResult<()> {
        match self.auth.authorize(action) {
            AccessDecision::Granted => Ok(()),
            AccessDecision::Denied { reason } => Err(EngineError::Unauthorized { reason }),
        }
    }

    fn check_running(&self) -> EngineResult<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        Ok(())
    }

    fn enqueue(&self, bundle: Bundle, priority: Priority) -> EngineResult<()> {
        let mut outbox = self.outbox.lock();
        outbox.enqueue(bundle, priority, self.clock.now_ms());
        self.persist_outbox(&outbox)
    }
}

/// The sync engine: the single write entry point for a device.
///
/// One `SyncEngine` is constructed per process and passed by reference
/// to callers; there is no global instance. Local applies are
/// synchronous and never touch the network; delivery to the remote
/// store happens on the background scheduler.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Opens an engine with the system clock and an allow-all gate.
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn StorageBackend>,
        schemas: SchemaRegistry,
        adapter: Arc<dyn RemoteAdapter>,
    ) -> EngineResult<Self> {
        Self::with_parts(
            config,
            backend,
            schemas,
            adapter,
            Arc::new(crate::clock::SystemClock),
            Arc::new(crate::auth::AllowAll),
        )
    }

    /// Opens an engine with explicit clock and authorization gate.
    pub fn with_parts(
        config: EngineConfig,
        backend: Arc<dyn StorageBackend>,
        schemas: SchemaRegistry,
        adapter: Arc<dyn RemoteAdapter>,
        clock: Arc<dyn Clock>,
        auth: Arc<dyn AuthorizationGate>,
    ) -> EngineResult<Self> {
        let store = LocalStore::open(Arc::clone(&backend), schemas, config.ledger_capacity)?;

        let queue: Option<QueueSnapshot> = match backend.load(OUTBOX_SET)? {
            Some(bytes) => Some(decode(&bytes)?),
            None => None,
        };
        let dead: Option<DeadLetterSnapshot> = match backend.load(DEAD_LETTER_SET)? {
            Some(bytes) => Some(decode(&bytes)?),
            None => None,
        };
        let outbox = Outbox::from_snapshots(queue, dead);

        let device_clock: VectorClock = match backend.load(DEVICE_CLOCK_SET)? {
            Some(bytes) => decode(&bytes)?,
            None => VectorClock::new(),
        };

        info!(
            device = %config.device_id,
            queued = outbox.queue_len(),
            dead = outbox.dead_letter_len(),
            "engine opened"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                outbox: Mutex::new(outbox),
                adapter,
                clock,
                auth,
                connectivity: ConnectivityState::default(),
                device_clock: Mutex::new(device_clock),
                apply_lock: Mutex::new(()),
                stats: RwLock::new(SyncStats::default()),
                lane_locks: [Mutex::new(()), Mutex::new(()), Mutex::new(())],
                wake_flag: Mutex::new(false),
                wake_cv: Condvar::new(),
                shutdown: AtomicBool::new(false),
                flush_all_now: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Applies a single caller-built operation.
    ///
    /// Synchronously updates the overlay and enqueues the operation for
    /// delivery. A replayed `op_id` is a non-fatal duplicate.
    pub fn apply_op(&self, request: OpRequest) -> EngineResult<ApplyOutcome> {
        self.inner.check_running()?;
        self.inner.authorize(&CommandAction::ApplyOp {
            collection: request.collection.clone(),
        })?;

        let schema = self.inner.store.schemas().get(&request.collection)?;
        schema.validate(&request.kind)?;

        let _apply = self.inner.apply_lock.lock();

        if self.inner.store.is_known(&request.op_id) {
            debug!(op_id = %request.op_id, "duplicate operation, treating as success");
            return Ok(ApplyOutcome::Duplicate);
        }

        let op = {
            let mut clock = self.inner.device_clock.lock();
            clock.tick(&self.inner.config.device_id);
            let op = Operation {
                op_id: request.op_id,
                collection: request.collection,
                entity_id: request.entity_id,
                kind: request.kind,
                vector_clock: clock.clone(),
                timestamp_ms: self.inner.clock.now_ms(),
                origin: Origin::Local,
                device: self.inner.config.device_id.clone(),
            };
            self.inner.persist_device_clock(&clock)?;
            op
        };

        self.inner.store.apply_local(&op)?;

        let bundle_id = BundleId::from_bytes(*op.op_id.as_bytes());
        let bundle = Bundle::new(
            bundle_id,
            vec![op],
            self.inner.device_clock.lock().clone(),
            self.inner.clock.now_ms(),
        );
        self.inner.enqueue(bundle, Priority::Normal)?;
        self.inner.wake();

        Ok(ApplyOutcome::Applied)
    }

    /// Expands a business command into a bundle, applies it atomically
    /// to the local state, and enqueues it for delivery.
    ///
    /// The `bundle_id` must be deterministic for the logical action so
    /// a retried call is recognized as a replay. Either every step is
    /// visible in reads after this returns, or none is.
    pub fn apply_bundle(
        &self,
        bundle_id: BundleId,
        command: &Command,
    ) -> EngineResult<BundleReceipt> {
        self.inner.check_running()?;

        let _apply = self.inner.apply_lock.lock();
        let mut clock_guard = self.inner.device_clock.lock();

        // Expand against a scratch clock; nothing is published until
        // validation and duplicate checks pass.
        let mut working = clock_guard.clone();
        let bundle = command.expand(
            bundle_id,
            &self.inner.config.device_id,
            &mut working,
            self.inner.clock.now_ms(),
        );
        if bundle.is_empty() {
            return Err(syncline_model::ModelError::EmptyBundle.into());
        }

        self.inner.authorize(&CommandAction::ApplyBundle {
            collections: bundle.collections().into_iter().cloned().collect(),
        })?;

        // Validate every step before any mutation.
        for step in &bundle.steps {
            let schema = self.inner.store.schemas().get(&step.collection)?;
            schema.validate(&step.kind)?;
        }

        // A retried bundle reproduces the same step IDs.
        let replayed = self.inner.outbox.lock().contains(&bundle_id)
            || bundle
                .steps
                .iter()
                .any(|step| self.inner.store.is_known(&step.op_id));
        if replayed {
            debug!(bundle_id = %bundle_id, "duplicate bundle, treating as success");
            return Ok(BundleReceipt {
                bundle_id,
                outcome: ApplyOutcome::Duplicate,
            });
        }

        // All-or-nothing local apply.
        let mut applied: Vec<&Operation> = Vec::new();
        for step in &bundle.steps {
            match self.inner.store.apply_local(step) {
                Ok(()) => applied.push(step),
                Err(e) => {
                    for done in applied {
                        if let Err(rollback) = self.inner.store.discard_local(done) {
                            warn!(op_id = %done.op_id, error = %rollback, "rollback failed");
                        }
                    }
                    return Err(e.into());
                }
            }
        }

        *clock_guard = working;
        self.inner.persist_device_clock(&clock_guard)?;
        drop(clock_guard);

        let priority = command.priority();
        self.inner.enqueue(bundle, priority)?;
        self.inner.wake();

        Ok(BundleReceipt {
            bundle_id,
            outcome: ApplyOutcome::Applied,
        })
    }

    /// Merges a remote-origin operation into the committed base state.
    ///
    /// Bypasses the overlay: conflict resolution decides the surviving
    /// value against the current base, and the operation ledger
    /// guarantees at-most-once application.
    pub fn apply_remote(&self, op: &Operation) -> EngineResult<ApplyOutcome> {
        self.inner.check_running()?;
        if op.origin != Origin::Remote {
            return Err(EngineError::InvalidOrigin {
                message: "apply_remote requires a remote-origin operation".into(),
            });
        }

        let schema = self.inner.store.schemas().get(&op.collection)?;
        schema.validate(&op.kind)?;

        let _apply = self.inner.apply_lock.lock();

        if self.inner.store.is_known(&op.op_id) {
            debug!(op_id = %op.op_id, "remote operation already applied");
            return Ok(ApplyOutcome::Duplicate);
        }

        let local = self.inner.store.get_base(&op.collection, &op.entity_id)?;
        let merged = crate::resolver::merge_remote(local.as_ref(), op, schema);
        self.inner.store.put_base(&op.collection, merged, op.op_id)?;

        {
            let mut clock = self.inner.device_clock.lock();
            clock.merge(&op.vector_clock);
            self.inner.persist_device_clock(&clock)?;
        }
        self.inner.stats.write().operations_applied += 1;

        Ok(ApplyOutcome::Applied)
    }

    /// Materializes every entity of a collection. Never blocks on the
    /// network.
    pub fn read(&self, collection: &CollectionName) -> EngineResult<Vec<Entity>> {
        self.inner.authorize(&CommandAction::Read {
            collection: collection.clone(),
        })?;
        Ok(self.inner.store.read(collection)?)
    }

    /// Materializes one entity.
    pub fn get(
        &self,
        collection: &CollectionName,
        entity_id: &EntityId,
    ) -> EngineResult<Option<Entity>> {
        self.inner.authorize(&CommandAction::Read {
            collection: collection.clone(),
        })?;
        Ok(self.inner.store.get(collection, entity_id)?)
    }

    /// Returns the current sync pipeline status.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        let outbox = self.inner.outbox.lock();
        SyncStatus {
            queue_len: outbox.queue_len(),
            dead_letter_len: outbox.dead_letter_len(),
            is_online: self.inner.connectivity.is_online(),
        }
    }

    /// Returns lifetime counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Records a connectivity transition from the platform's network
    /// monitor. Going online triggers an immediate flush attempt.
    pub fn notify_connectivity(&self, online: bool) {
        if self.inner.connectivity.set_online(online) {
            info!(online, "connectivity changed");
            if online {
                self.inner.flush_all_now.store(true, Ordering::SeqCst);
                self.inner.wake();
            }
        }
    }

    /// Synchronously drains every lane, ignoring backoff deadlines.
    ///
    /// Used before destructive actions (session teardown): unlike the
    /// background path, this fails loudly when the queue cannot be
    /// drained.
    pub fn flush_and_confirm(&self) -> EngineResult<()> {
        self.inner.authorize(&CommandAction::Flush)?;

        let dead_before = self.inner.outbox.lock().dead_letter_len();
        for lane in Priority::ALL {
            scheduler::flush_lane(&self.inner, lane, true);
        }
        scheduler::flush_dead_letters(&self.inner);

        // An item that dead-lettered during this drain is still
        // unconfirmed data; count it against the caller.
        let (queued, dead_after) = {
            let outbox = self.inner.outbox.lock();
            (outbox.queue_len(), outbox.dead_letter_len())
        };
        let remaining = queued + dead_after.saturating_sub(dead_before);
        if remaining > 0 {
            return Err(EngineError::QueueNotDrained { remaining });
        }
        Ok(())
    }

    /// Runs one scheduler pass over every due lane without a worker
    /// thread. Respects backoff deadlines; intended for tests and
    /// host-driven scheduling.
    pub fn run_once(&self) {
        for lane in Priority::ALL {
            scheduler::flush_lane(&self.inner, lane, false);
        }
        scheduler::flush_dead_letters(&self.inner);
    }

    /// Returns the dead-letter items for inspection.
    pub fn dead_letters(&self) -> EngineResult<Vec<DeadLetterItem>> {
        self.inner.authorize(&CommandAction::ReconcileDeadLetters)?;
        Ok(self.inner.outbox.lock().dead_letters().to_vec())
    }

    /// Manually re-queues a dead-lettered bundle with a fresh retry
    /// budget.
    pub fn retry_dead_letter(&self, bundle_id: &BundleId) -> EngineResult<bool> {
        self.inner.authorize(&CommandAction::ReconcileDeadLetters)?;
        let retried = {
            let mut outbox = self.inner.outbox.lock();
            let retried = outbox.retry_dead_letter(bundle_id, self.inner.clock.now_ms());
            self.inner.persist_outbox(&outbox)?;
            retried
        };
        if retried {
            self.inner.wake();
        }
        Ok(retried)
    }

    /// Drops a dead-lettered bundle and reverts its provisional local
    /// effects.
    pub fn discard_dead_letter(&self, bundle_id: &BundleId) -> EngineResult<bool> {
        self.inner.authorize(&CommandAction::ReconcileDeadLetters)?;
        let mut outbox = self.inner.outbox.lock();
        let Some(bundle) = outbox.remove_dead_letter(bundle_id) else {
            return Ok(false);
        };
        for step in &bundle.steps {
            self.inner.store.discard_local(step)?;
        }
        self.inner.persist_outbox(&outbox)?;
        info!(bundle_id = %bundle_id, "dead letter discarded");
        Ok(true)
    }

    /// Starts the background scheduler thread. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *worker = Some(std::thread::spawn(move || scheduler::run_loop(&inner)));
        debug!("scheduler started");
    }

    /// Stops the scheduler and abandons any in-flight batch.
    ///
    /// Partially-sent batches are safe to resume later: the operation
    /// ledger and remote applied markers make re-sends idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("scheduler thread panicked during shutdown");
            }
        }
        info!("engine shut down");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.wake();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
