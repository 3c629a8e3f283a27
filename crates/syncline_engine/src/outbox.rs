//! Priority-ordered sync queue with retry metadata and a dead-letter
//! lane.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use syncline_model::{Bundle, BundleId};

/// Priority lane for queued bundles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// User-facing financial operations.
    High,
    /// Everything else.
    Normal,
    /// Maintenance work (recounts, compaction output).
    Low,
}

impl Priority {
    /// All lanes in flush order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];
}

/// Lifecycle of a queued bundle.
///
/// `Pending -> InFlight -> {Committed | Pending (retry) | DeadLettered}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Waiting for its next attempt.
    Pending,
    /// Currently being sent.
    InFlight,
    /// Confirmed by the remote store and removed from the queue.
    Committed,
    /// Retry budget exhausted; parked in the dead-letter lane.
    DeadLettered,
}

/// A queued bundle with its retry metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// The bundle this item delivers.
    pub bundle_id: BundleId,
    /// Lane assignment.
    pub priority: Priority,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Earliest time of the next attempt.
    pub next_attempt_at_ms: u64,
    /// Current lifecycle state.
    pub status: QueueStatus,
    /// Last failure, for status surfaces.
    pub last_error: Option<String>,
}

/// A queue item that exhausted its retry budget.
///
/// Dead letters are retried on a slow fixed cadence and surfaced for
/// manual reconciliation; they never block the main lanes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterItem {
    /// The parked item.
    pub item: QueueItem,
    /// Why it was dead-lettered.
    pub reason: String,
    /// When it was parked.
    pub dead_lettered_at_ms: u64,
}

/// Persistable snapshot of the main queue record set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Queue items in lane order.
    pub items: Vec<QueueItem>,
    /// Bundles referenced by those items.
    pub bundles: Vec<Bundle>,
}

/// Persistable snapshot of the dead-letter record set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterSnapshot {
    /// Parked items.
    pub dead: Vec<DeadLetterItem>,
    /// Bundles referenced by those items.
    pub bundles: Vec<Bundle>,
}

/// The outbox: per-lane FIFO queues of bundles awaiting delivery.
///
/// Items in one lane are flushed in enqueue order, which preserves
/// per-collection creation order for operations from this device (lane
/// assignment is fixed per command kind).
#[derive(Debug, Default)]
pub struct Outbox {
    lanes: HashMap<Priority, VecDeque<QueueItem>>,
    dead: Vec<DeadLetterItem>,
    bundles: HashMap<BundleId, Bundle>,
}

impl Outbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores an outbox from the persisted queue and dead-letter
    /// record sets.
    ///
    /// Items that were in flight when the process died return to
    /// `Pending`; the operation ledger makes the re-send safe.
    #[must_use]
    pub fn from_snapshots(
        queue: Option<QueueSnapshot>,
        dead: Option<DeadLetterSnapshot>,
    ) -> Self {
        let mut outbox = Self::new();
        if let Some(queue) = queue {
            for bundle in queue.bundles {
                outbox.bundles.insert(bundle.bundle_id, bundle);
            }
            for mut item in queue.items {
                if item.status == QueueStatus::InFlight {
                    item.status = QueueStatus::Pending;
                }
                outbox.lanes.entry(item.priority).or_default().push_back(item);
            }
        }
        if let Some(dead) = dead {
            for bundle in dead.bundles {
                outbox.bundles.insert(bundle.bundle_id, bundle);
            }
            outbox.dead = dead.dead;
        }
        outbox
    }

    /// Returns a persistable snapshot of the main queue.
    #[must_use]
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        let items: Vec<QueueItem> = Priority::ALL
            .iter()
            .filter_map(|p| self.lanes.get(p))
            .flatten()
            .cloned()
            .collect();
        let bundles = items
            .iter()
            .filter_map(|item| self.bundles.get(&item.bundle_id).cloned())
            .collect();
        QueueSnapshot { items, bundles }
    }

    /// Returns a persistable snapshot of the dead-letter lane.
    #[must_use]
    pub fn dead_letter_snapshot(&self) -> DeadLetterSnapshot {
        let bundles = self
            .dead
            .iter()
            .filter_map(|d| self.bundles.get(&d.item.bundle_id).cloned())
            .collect();
        DeadLetterSnapshot {
            dead: self.dead.clone(),
            bundles,
        }
    }

    /// Enqueues a bundle.
    pub fn enqueue(&mut self, bundle: Bundle, priority: Priority, now_ms: u64) {
        let item = QueueItem {
            bundle_id: bundle.bundle_id,
            priority,
            retry_count: 0,
            next_attempt_at_ms: now_ms,
            status: QueueStatus::Pending,
            last_error: None,
        };
        self.bundles.insert(bundle.bundle_id, bundle);
        self.lanes.entry(priority).or_default().push_back(item);
    }

    /// Returns true if a bundle is queued (pending, in flight, or dead).
    #[must_use]
    pub fn contains(&self, bundle_id: &BundleId) -> bool {
        self.bundles.contains_key(bundle_id)
    }

    /// Takes up to `limit` due pending items from a lane, marking them
    /// in flight. FIFO: an item whose backoff has not elapsed blocks
    /// the ones behind it, preserving delivery order.
    pub fn take_due(&mut self, priority: Priority, now_ms: u64, limit: usize) -> Vec<Bundle> {
        let Some(lane) = self.lanes.get_mut(&priority) else {
            return Vec::new();
        };

        let mut due = Vec::new();
        for item in lane.iter_mut() {
            if due.len() >= limit {
                break;
            }
            match item.status {
                QueueStatus::Pending if item.next_attempt_at_ms <= now_ms => {
                    item.status = QueueStatus::InFlight;
                    if let Some(bundle) = self.bundles.get(&item.bundle_id) {
                        due.push(bundle.clone());
                    }
                }
                // Order within the lane is delivery order; stop at the
                // first item that is not ready.
                _ => break,
            }
        }
        due
    }

    /// Removes a committed bundle from the queue.
    pub fn complete(&mut self, bundle_id: &BundleId) -> Option<Bundle> {
        if let Some(lane) = self.lane_of(bundle_id) {
            if let Some(queue) = self.lanes.get_mut(&lane) {
                queue.retain(|item| item.bundle_id != *bundle_id);
            }
        }
        self.bundles.remove(bundle_id)
    }

    /// Returns a failed in-flight item to `Pending` with backoff.
    pub fn reschedule(
        &mut self,
        bundle_id: &BundleId,
        next_attempt_at_ms: u64,
        count_retry: bool,
        error: impl Into<String>,
    ) {
        if let Some(item) = self.item_mut(bundle_id) {
            item.status = QueueStatus::Pending;
            if count_retry {
                item.retry_count += 1;
            }
            item.next_attempt_at_ms = next_attempt_at_ms;
            item.last_error = Some(error.into());
        }
    }

    /// Moves an item to the dead-letter lane. Its first slow-cadence
    /// retry happens at `next_attempt_at_ms`.
    pub fn dead_letter(
        &mut self,
        bundle_id: &BundleId,
        reason: impl Into<String>,
        now_ms: u64,
        next_attempt_at_ms: u64,
    ) {
        let Some(lane) = self.lane_of(bundle_id) else {
            return;
        };
        let Some(queue) = self.lanes.get_mut(&lane) else {
            return;
        };
        let Some(pos) = queue.iter().position(|item| item.bundle_id == *bundle_id) else {
            return;
        };
        let Some(mut item) = queue.remove(pos) else {
            return;
        };
        item.status = QueueStatus::DeadLettered;
        item.next_attempt_at_ms = next_attempt_at_ms;
        let reason = reason.into();
        item.last_error = Some(reason.clone());
        self.dead.push(DeadLetterItem {
            item,
            reason,
            dead_lettered_at_ms: now_ms,
        });
    }

    /// Returns the dead-letter items for inspection.
    #[must_use]
    pub fn dead_letters(&self) -> &[DeadLetterItem] {
        &self.dead
    }

    /// Returns the dead-lettered bundles due for a slow-cadence retry.
    #[must_use]
    pub fn due_dead_letters(&self, now_ms: u64) -> Vec<Bundle> {
        self.dead
            .iter()
            .filter(|d| d.item.next_attempt_at_ms <= now_ms)
            .filter_map(|d| self.bundles.get(&d.item.bundle_id).cloned())
            .collect()
    }

    /// Pushes a dead letter's next slow-cadence attempt out.
    pub fn defer_dead_letter(&mut self, bundle_id: &BundleId, next_attempt_at_ms: u64) {
        if let Some(dead) = self.dead.iter_mut().find(|d| d.item.bundle_id == *bundle_id) {
            dead.item.next_attempt_at_ms = next_attempt_at_ms;
        }
    }

    /// Removes a resolved dead letter and its bundle.
    pub fn remove_dead_letter(&mut self, bundle_id: &BundleId) -> Option<Bundle> {
        let pos = self
            .dead
            .iter()
            .position(|d| d.item.bundle_id == *bundle_id)?;
        self.dead.remove(pos);
        self.bundles.remove(bundle_id)
    }

    /// Manually re-queues a dead letter with a fresh retry budget.
    pub fn retry_dead_letter(&mut self, bundle_id: &BundleId, now_ms: u64) -> bool {
        let Some(pos) = self
            .dead
            .iter()
            .position(|d| d.item.bundle_id == *bundle_id)
        else {
            return false;
        };
        let dead = self.dead.remove(pos);
        let mut item = dead.item;
        item.status = QueueStatus::Pending;
        item.retry_count = 0;
        item.next_attempt_at_ms = now_ms;
        self.lanes.entry(item.priority).or_default().push_back(item);
        true
    }

    /// Returns the bundle payload for a queued item.
    #[must_use]
    pub fn bundle(&self, bundle_id: &BundleId) -> Option<&Bundle> {
        self.bundles.get(bundle_id)
    }

    /// Returns the failure count of a queued item.
    #[must_use]
    pub fn retry_count(&self, bundle_id: &BundleId) -> Option<u32> {
        self.lanes
            .values()
            .flatten()
            .find(|item| item.bundle_id == *bundle_id)
            .map(|item| item.retry_count)
    }

    /// Number of items waiting in the main lanes.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.lanes.values().map(VecDeque::len).sum()
    }

    /// Number of dead-lettered items.
    #[must_use]
    pub fn dead_letter_len(&self) -> usize {
        self.dead.len()
    }

    /// Earliest pending attempt time across all lanes, if any.
    #[must_use]
    pub fn next_attempt_at_ms(&self) -> Option<u64> {
        self.lanes
            .values()
            .flatten()
            .filter(|item| item.status == QueueStatus::Pending)
            .map(|item| item.next_attempt_at_ms)
            .min()
    }

    fn lane_of(&self, bundle_id: &BundleId) -> Option<Priority> {
        for (priority, queue) in &self.lanes {
            if queue.iter().any(|item| item.bundle_id == *bundle_id) {
                return Some(*priority);
            }
        }
        None
    }

    fn item_mut(&mut self, bundle_id: &BundleId) -> Option<&mut QueueItem> {
        self.lanes
            .values_mut()
            .flatten()
            .find(|item| item.bundle_id == *bundle_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncline_model::VectorClock;

    fn bundle(n: u8) -> Bundle {
        Bundle::new(
            BundleId::from_bytes([n; 16]),
            vec![],
            VectorClock::new(),
            u64::from(n),
        )
    }

    fn id(n: u8) -> BundleId {
        BundleId::from_bytes([n; 16])
    }

    #[test]
    fn take_due_is_fifo_and_marks_in_flight() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::Normal, 100);
        outbox.enqueue(bundle(2), Priority::Normal, 100);

        let due = outbox.take_due(Priority::Normal, 100, 10);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].bundle_id, id(1));
        assert_eq!(due[1].bundle_id, id(2));

        // Already in flight: nothing more to take.
        assert!(outbox.take_due(Priority::Normal, 100, 10).is_empty());
    }

    #[test]
    fn backoff_blocks_the_lane_to_preserve_order() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::Normal, 100);
        outbox.enqueue(bundle(2), Priority::Normal, 100);

        outbox.take_due(Priority::Normal, 100, 1);
        outbox.reschedule(&id(1), 500, true, "boom");

        // Item 2 is due, but item 1's backoff holds the lane.
        assert!(outbox.take_due(Priority::Normal, 200, 10).is_empty());

        let due = outbox.take_due(Priority::Normal, 500, 10);
        assert_eq!(due.len(), 2);
    }

    #[test]
    fn lanes_are_independent() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::High, 100);
        outbox.enqueue(bundle(2), Priority::Normal, 100);

        let high = outbox.take_due(Priority::High, 100, 10);
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].bundle_id, id(1));

        let normal = outbox.take_due(Priority::Normal, 100, 10);
        assert_eq!(normal.len(), 1);
        assert_eq!(normal[0].bundle_id, id(2));
    }

    #[test]
    fn complete_removes_item_and_bundle() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::Normal, 100);
        outbox.take_due(Priority::Normal, 100, 10);

        assert!(outbox.complete(&id(1)).is_some());
        assert_eq!(outbox.queue_len(), 0);
        assert!(!outbox.contains(&id(1)));
    }

    #[test]
    fn reschedule_counts_retries_when_asked() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::Normal, 100);
        outbox.take_due(Priority::Normal, 100, 10);

        outbox.reschedule(&id(1), 300, true, "transient");
        outbox.take_due(Priority::Normal, 300, 10);
        // An offline blip does not consume retry budget.
        outbox.reschedule(&id(1), 400, false, "offline");

        let snapshot = outbox.queue_snapshot();
        let item = &snapshot.items[0];
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.next_attempt_at_ms, 400);
        assert_eq!(item.last_error.as_deref(), Some("offline"));
    }

    #[test]
    fn dead_letter_leaves_main_lane_flowing() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::Normal, 100);
        outbox.enqueue(bundle(2), Priority::Normal, 100);

        outbox.take_due(Priority::Normal, 100, 1);
        outbox.dead_letter(&id(1), "retry budget exhausted", 150, 1_150);

        assert_eq!(outbox.queue_len(), 1);
        assert_eq!(outbox.dead_letter_len(), 1);
        assert_eq!(outbox.dead_letters()[0].reason, "retry budget exhausted");

        // The unrelated item behind it is now free to flush.
        let due = outbox.take_due(Priority::Normal, 150, 10);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].bundle_id, id(2));
    }

    #[test]
    fn dead_letters_retry_on_their_own_cadence() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::Normal, 100);
        outbox.take_due(Priority::Normal, 100, 10);
        outbox.dead_letter(&id(1), "permanent-ish", 150, 1_150);

        // Due immediately after parking (next_attempt unchanged).
        assert_eq!(outbox.due_dead_letters(150).len(), 1);

        outbox.defer_dead_letter(&id(1), 10_000);
        assert!(outbox.due_dead_letters(500).is_empty());
        assert_eq!(outbox.due_dead_letters(10_000).len(), 1);
    }

    #[test]
    fn manual_dead_letter_reconciliation() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::High, 100);
        outbox.take_due(Priority::High, 100, 10);
        outbox.dead_letter(&id(1), "rejected", 150, 1_150);

        assert!(outbox.retry_dead_letter(&id(1), 200));
        assert_eq!(outbox.dead_letter_len(), 0);
        assert_eq!(outbox.queue_len(), 1);

        let due = outbox.take_due(Priority::High, 200, 10);
        assert_eq!(due.len(), 1);

        outbox.dead_letter(&id(1), "rejected again", 250, 1_250);
        assert!(outbox.remove_dead_letter(&id(1)).is_some());
        assert!(!outbox.contains(&id(1)));
        assert!(!outbox.retry_dead_letter(&id(1), 300));
    }

    #[test]
    fn snapshot_resets_in_flight_items() {
        let mut outbox = Outbox::new();
        outbox.enqueue(bundle(1), Priority::Normal, 100);
        outbox.enqueue(bundle(2), Priority::High, 100);
        outbox.take_due(Priority::Normal, 100, 10);
        outbox.take_due(Priority::High, 100, 10);
        outbox.dead_letter(&id(2), "rejected", 120, 1_120);

        let restored = Outbox::from_snapshots(
            Some(outbox.queue_snapshot()),
            Some(outbox.dead_letter_snapshot()),
        );

        // The in-flight item came back as pending and can be retaken.
        let statuses: Vec<_> = restored
            .queue_snapshot()
            .items
            .iter()
            .map(|i| i.status)
            .collect();
        assert_eq!(statuses, vec![QueueStatus::Pending]);
        assert!(restored.contains(&id(1)));

        // The dead letter survived with its bundle payload.
        assert_eq!(restored.dead_letter_len(), 1);
        assert!(restored.bundle(&id(2)).is_some());
    }

    #[test]
    fn next_attempt_reports_earliest_pending() {
        let mut outbox = Outbox::new();
        assert_eq!(outbox.next_attempt_at_ms(), None);

        outbox.enqueue(bundle(1), Priority::Normal, 300);
        outbox.enqueue(bundle(2), Priority::High, 200);
        assert_eq!(outbox.next_attempt_at_ms(), Some(200));
    }
}
