//! Operation ledger for idempotency.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use syncline_model::OpId;

/// Default bound on retained ledger entries.
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

/// Persistable snapshot of a ledger, oldest entry first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Applied operation IDs in application order.
    pub applied: Vec<OpId>,
}

/// The record of applied operation IDs.
///
/// Existence of an ID in the ledger means the operation must not be
/// applied to the base state again. The ledger is insertion-ordered and
/// bounded: once the capacity is exceeded, the oldest entries are
/// compacted away. The capacity must comfortably exceed the replay
/// horizon (in-flight retries plus remote redelivery).
#[derive(Debug)]
pub struct OperationLedger {
    ids: HashSet<OpId>,
    order: VecDeque<OpId>,
    capacity: usize,
}

impl OperationLedger {
    /// Creates an empty ledger with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LEDGER_CAPACITY)
    }

    /// Creates an empty ledger with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Restores a ledger from a persisted snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: LedgerSnapshot, capacity: usize) -> Self {
        let mut ledger = Self::with_capacity(capacity);
        for op_id in snapshot.applied {
            ledger.record(op_id);
        }
        ledger
    }

    /// Returns a persistable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            applied: self.order.iter().copied().collect(),
        }
    }

    /// Records an applied operation.
    ///
    /// Returns `false` if the operation was already recorded (a replay).
    pub fn record(&mut self, op_id: OpId) -> bool {
        if !self.ids.insert(op_id) {
            return false;
        }
        self.order.push_back(op_id);
        self.compact();
        true
    }

    /// Returns true if the operation was already applied.
    #[must_use]
    pub fn contains(&self, op_id: &OpId) -> bool {
        self.ids.contains(op_id)
    }

    /// Returns the number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no operations have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drops the oldest entries beyond the capacity bound.
    fn compact(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

impl Default for OperationLedger {
    fn default() -> Self {
        Self::new()
    }
}
