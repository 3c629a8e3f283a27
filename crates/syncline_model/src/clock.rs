//! Vector clocks for causal ordering between operations.

use crate::id::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// The clocks are identical.
    Equal,
    /// This clock dominates the other (saw everything it saw, and more).
    Dominates,
    /// The other clock dominates this one.
    DominatedBy,
    /// Neither clock dominates; the histories are concurrent.
    Concurrent,
}

/// A map from device identifier to a monotonic counter.
///
/// Clock `A` dominates `B` iff `A[d] >= B[d]` for every device `d` and
/// `A != B`. If neither dominates, the clocks are concurrent and the
/// conflict resolver decides per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    counters: BTreeMap<DeviceId, u64>,
}

impl VectorClock {
    /// Creates an empty clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for a device (0 if the device is unknown).
    #[must_use]
    pub fn get(&self, device: &DeviceId) -> u64 {
        self.counters.get(device).copied().unwrap_or(0)
    }

    /// Increments the counter for a device and returns the new value.
    pub fn tick(&mut self, device: &DeviceId) -> u64 {
        let counter = self.counters.entry(device.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Raises the counter for a device to `counter` if it is higher.
    pub fn observe(&mut self, device: &DeviceId, counter: u64) {
        let entry = self.counters.entry(device.clone()).or_insert(0);
        if counter > *entry {
            *entry = counter;
        }
    }

    /// Merges another clock into this one (pointwise maximum).
    pub fn merge(&mut self, other: &VectorClock) {
        for (device, counter) in &other.counters {
            self.observe(device, *counter);
        }
    }

    /// Returns the pointwise maximum of two clocks.
    #[must_use]
    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Compares this clock with another.
    #[must_use]
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut self_ahead = false;
        let mut other_ahead = false;

        for (device, counter) in &self.counters {
            match counter.cmp(&other.get(device)) {
                std::cmp::Ordering::Greater => self_ahead = true,
                std::cmp::Ordering::Less => other_ahead = true,
                std::cmp::Ordering::Equal => {}
            }
        }
        for (device, counter) in &other.counters {
            if self.get(device) < *counter {
                other_ahead = true;
            }
        }

        match (self_ahead, other_ahead) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Dominates,
            (false, true) => ClockOrdering::DominatedBy,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Returns true if this clock dominates the other.
    #[must_use]
    pub fn dominates(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Dominates
    }

    /// Returns true if neither clock dominates the other.
    #[must_use]
    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        self.compare(other) == ClockOrdering::Concurrent
    }

    /// Returns true if no device has ever been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Iterates over `(device, counter)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, u64)> {
        self.counters.iter().map(|(d, c)| (d, *c))
    }
}
