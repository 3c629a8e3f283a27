//! Background scheduler: drains the outbox to the remote adapter.
//!
//! The scheduler is timer-driven, not polling: the worker thread waits
//! on a condvar with the shortest lane cadence as its timeout and is
//! woken early by enqueues, connectivity transitions, explicit flushes,
//! and shutdown. Each lane's batch processing is serialized (one
//! in-flight batch per lane); lanes themselves are independent.

use crate::engine::EngineInner;
use crate::error::{AdapterError, AdapterResult};
use crate::outbox::Priority;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use syncline_model::{
    Bundle, BundleId, CollectionName, EntityId, OpId, Operation, OperationKind, Origin,
    VectorClock,
};
use tracing::{debug, info, warn};

/// The worker loop. Runs until shutdown is requested.
pub(crate) fn run_loop(inner: &Arc<EngineInner>) {
    let mut last_flush: HashMap<Priority, u64> = HashMap::new();
    let mut last_dead_flush: u64 = 0;
    let tick = inner.config.lanes.shortest();

    loop {
        {
            let mut woken = inner.wake_flag.lock();
            if !*woken {
                inner.wake_cv.wait_for(&mut woken, tick);
            }
            *woken = false;
        }

        if inner.shutdown.load(Ordering::SeqCst) {
            debug!("scheduler stopping");
            return;
        }
        if !inner.connectivity.is_online() {
            continue;
        }

        let flush_everything = inner.flush_all_now.swap(false, Ordering::SeqCst);
        let now = inner.clock.now_ms();

        for lane in Priority::ALL {
            let cadence = inner.config.lanes.cadence(lane).as_millis() as u64;
            let elapsed = now.saturating_sub(*last_flush.get(&lane).unwrap_or(&0));
            if flush_everything || elapsed >= cadence {
                flush_lane(inner, lane, false);
                last_flush.insert(lane, now);
            }
        }

        let dead_interval = inner.config.dead_letter_interval.as_millis() as u64;
        if now.saturating_sub(last_dead_flush) >= dead_interval {
            flush_dead_letters(inner);
            last_dead_flush = now;
        }
    }
}

/// Flushes one lane until it has no due work or an attempt fails.
///
/// With `force` set, backoff deadlines are ignored (used by
/// `flush_and_confirm`). Returns the number of bundles committed.
pub(crate) fn flush_lane(inner: &EngineInner, lane: Priority, force: bool) -> usize {
    let lane_index = lane_index(lane);
    let _serialize = inner.lane_locks[lane_index].lock();
    let mut committed = 0;

    'outer: loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if !force && !inner.connectivity.is_online() {
            break;
        }

        let now = inner.clock.now_ms();
        let due_horizon = if force { u64::MAX } else { now };
        let batch = {
            let mut outbox = inner.outbox.lock();
            outbox.take_due(lane, due_horizon, inner.config.batch_size)
        };
        if batch.is_empty() {
            break;
        }
        debug!(lane = ?lane, batch = batch.len(), "flushing lane");

        for bundle in batch {
            if inner.shutdown.load(Ordering::SeqCst) {
                // Abandon the in-flight batch; idempotent resend later.
                let mut outbox = inner.outbox.lock();
                outbox.reschedule(&bundle.bundle_id, now, false, "shutdown");
                let _ = inner.persist_outbox(&outbox);
                break 'outer;
            }

            let result = send_bundle(inner, &bundle);
            let failed = result.is_err();
            settle_attempt(inner, &bundle.bundle_id, result, &mut committed);
            if failed {
                // A failure parks the lane until the next cadence; the
                // items behind keep their order.
                break 'outer;
            }
        }
    }

    committed
}

/// Retries due dead-letter items on their slow cadence. Failures only
/// push the next attempt out; the retry budget no longer applies.
pub(crate) fn flush_dead_letters(inner: &EngineInner) {
    let now = inner.clock.now_ms();
    let due = {
        let outbox = inner.outbox.lock();
        outbox.due_dead_letters(now)
    };

    for bundle in due {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        match send_bundle(inner, &bundle) {
            Ok(()) => {
                info!(bundle_id = %bundle.bundle_id, "dead-letter item recovered");
                let mut outbox = inner.outbox.lock();
                outbox.remove_dead_letter(&bundle.bundle_id);
                inner.stats.write().bundles_committed += 1;
                let _ = inner.persist_outbox(&outbox);
            }
            Err(e) => {
                let interval = inner.config.dead_letter_interval.as_millis() as u64;
                let mut outbox = inner.outbox.lock();
                outbox.defer_dead_letter(&bundle.bundle_id, inner.clock.now_ms() + interval);
                let _ = inner.persist_outbox(&outbox);
                debug!(bundle_id = %bundle.bundle_id, error = %e, "dead-letter retry failed");
            }
        }
    }
}

/// Records the outcome of one bundle attempt in the outbox.
fn settle_attempt(
    inner: &EngineInner,
    bundle_id: &BundleId,
    result: AdapterResult<()>,
    committed: &mut usize,
) {
    let now = inner.clock.now_ms();
    let mut outbox = inner.outbox.lock();

    match result {
        Ok(()) => {
            outbox.complete(bundle_id);
            *committed += 1;
            let mut stats = inner.stats.write();
            stats.bundles_committed += 1;
            stats.last_flush_at_ms = Some(now);
            stats.last_error = None;
            info!(bundle_id = %bundle_id, "bundle committed");
        }
        Err(AdapterError::Offline) => {
            // Not a real attempt; keep the retry budget intact.
            let delay = inner.config.retry.base_delay.as_millis() as u64;
            outbox.reschedule(bundle_id, now + delay, false, "remote store unreachable");
        }
        Err(e) if e.is_retryable() => {
            let failures = outbox.retry_count(bundle_id).unwrap_or(0) + 1;
            inner.stats.write().retries += 1;
            if failures > inner.config.retry.max_retries {
                warn!(bundle_id = %bundle_id, error = %e, "retry budget exhausted, dead-lettering");
                let interval = inner.config.dead_letter_interval.as_millis() as u64;
                outbox.dead_letter(bundle_id, e.to_string(), now, now + interval);
                let mut stats = inner.stats.write();
                stats.dead_lettered += 1;
                stats.last_error = Some(e.to_string());
            } else {
                let delay = inner
                    .config
                    .retry
                    .delay_for_retry(failures.saturating_sub(1))
                    .as_millis() as u64;
                debug!(bundle_id = %bundle_id, failures, delay_ms = delay, "rescheduling");
                outbox.reschedule(bundle_id, now + delay, true, e.to_string());
                inner.stats.write().last_error = Some(e.to_string());
            }
        }
        Err(e) => {
            warn!(bundle_id = %bundle_id, error = %e, "permanent failure, dead-lettering");
            let interval = inner.config.dead_letter_interval.as_millis() as u64;
            outbox.dead_letter(bundle_id, e.to_string(), now, now + interval);
            let mut stats = inner.stats.write();
            stats.dead_lettered += 1;
            stats.last_error = Some(e.to_string());
        }
    }

    let _ = inner.persist_outbox(&outbox);
}

/// Delivers one bundle to the remote store.
///
/// Uses a single remote transaction when the adapter supports one;
/// otherwise degrades to per-step upserts, re-checking each step's
/// applied marker so a resumed partial send never double-applies.
/// Every step confirmed remotely is committed locally on the spot, so
/// a failure partway leaves the committed prefix committed (the ledger
/// makes the resend of the rest safe).
fn send_bundle(inner: &EngineInner, bundle: &Bundle) -> AdapterResult<()> {
    if inner.adapter.supports_transactions() {
        inner.adapter.run_transaction(&bundle.steps)?;
        for step in &bundle.steps {
            commit_step(inner, step);
        }
        return Ok(());
    }

    for step in &bundle.steps {
        if inner.shutdown.load(Ordering::SeqCst) {
            return Err(AdapterError::Offline);
        }

        if inner.adapter.applied_marker(&step.op_id)? {
            // Applied on a previous attempt that died before the local
            // commit; finish the bookkeeping.
            commit_step(inner, step);
            continue;
        }

        match inner.adapter.upsert(step) {
            Ok(()) => commit_step(inner, step),
            Err(AdapterError::MissingDependency {
                collection,
                entity_id,
            }) => {
                upsert_dependency(inner, &collection, &entity_id)?;
                inner.adapter.upsert(step)?;
                commit_step(inner, step);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Folds a remotely-confirmed step into the base state.
fn commit_step(inner: &EngineInner, step: &Operation) {
    match inner.store.commit_local(step) {
        Ok(()) => {
            inner.stats.write().operations_pushed += 1;
        }
        Err(e) => {
            // The remote effect stands; only local bookkeeping failed.
            warn!(op_id = %step.op_id, error = %e, "local commit failed");
        }
    }
}

/// Establishes a missing remote record before retrying the step that
/// needed it.
///
/// Uses the committed base state, never the folded view: the pending
/// deltas that are still in the overlay will be delivered as their own
/// steps and must not be baked into the dependency payload too.
fn upsert_dependency(
    inner: &EngineInner,
    collection: &CollectionName,
    entity_id: &EntityId,
) -> AdapterResult<()> {
    let base = inner
        .store
        .get_base(collection, entity_id)
        .map_err(|e| AdapterError::transient(e.to_string()))?;

    let (fields, version, timestamp_ms) = match base {
        Some(entity) => {
            let fields: BTreeMap<String, _> = entity
                .fields
                .iter()
                .map(|(name, state)| (name.clone(), state.value.clone()))
                .collect();
            (fields, entity.version.clone(), entity.updated_at_ms)
        }
        // Nothing committed yet: establish an empty record and let the
        // queued steps fill it in.
        None => (BTreeMap::new(), VectorClock::new(), inner.clock.now_ms()),
    };

    let dependency = Operation {
        op_id: OpId::derive(BundleId::from_bytes(*entity_id.as_bytes()), "dependency-upsert"),
        collection: collection.clone(),
        entity_id: *entity_id,
        kind: OperationKind::Create { fields },
        vector_clock: version,
        timestamp_ms,
        origin: Origin::Local,
        device: inner.config.device_id.clone(),
    };

    debug!(entity_id = %entity_id, collection = %collection, "upserting missing dependency");
    inner.adapter.upsert(&dependency)
}

fn lane_index(priority: Priority) -> usize {
    match priority {
        Priority::High => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}
