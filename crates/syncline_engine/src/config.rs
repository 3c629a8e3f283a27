//! Configuration for the sync engine.

use crate::outbox::Priority;
use std::time::Duration;
use syncline_model::DeviceId;

/// Configuration for an engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// This device's identifier.
    pub device_id: DeviceId,
    /// Retry behavior for transient sync failures.
    pub retry: RetryConfig,
    /// Flush cadence per priority lane.
    pub lanes: LaneConfig,
    /// Fixed interval between dead-letter retry attempts.
    pub dead_letter_interval: Duration,
    /// Maximum bundles taken per lane per flush batch.
    pub batch_size: usize,
    /// Bound on retained operation-ledger entries.
    pub ledger_capacity: usize,
}

impl EngineConfig {
    /// Creates a configuration for a device with defaults.
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            retry: RetryConfig::default(),
            lanes: LaneConfig::default(),
            dead_letter_interval: Duration::from_secs(300),
            batch_size: 25,
            ledger_capacity: syncline_store::DEFAULT_LEDGER_CAPACITY,
        }
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the lane cadences.
    #[must_use]
    pub fn with_lanes(mut self, lanes: LaneConfig) -> Self {
        self.lanes = lanes;
        self
    }

    /// Sets the dead-letter retry interval.
    #[must_use]
    pub fn with_dead_letter_interval(mut self, interval: Duration) -> Self {
        self.dead_letter_interval = interval;
        self
    }

    /// Sets the per-lane batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the ledger capacity.
    #[must_use]
    pub fn with_ledger_capacity(mut self, capacity: usize) -> Self {
        self.ledger_capacity = capacity;
        self
    }
}

/// Configuration for retry backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base delay for the first retry.
    pub base_delay: Duration,
    /// Cap on the exponential backoff.
    pub max_delay: Duration,
    /// Retry budget before an item is dead-lettered.
    pub max_retries: u32,
}

impl RetryConfig {
    /// Creates a retry configuration with the given budget.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            max_retries,
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns the backoff delay after `retry_count` failed attempts:
    /// `min(base * 2^retry_count, cap)`.
    #[must_use]
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        let shift = retry_count.min(20);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Flush cadence per priority lane.
///
/// A lane with pending user-facing financial work flushes more
/// frequently than the maintenance lane.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    /// Cadence for the high-priority lane.
    pub high: Duration,
    /// Cadence for the normal lane.
    pub normal: Duration,
    /// Cadence for the low (maintenance) lane.
    pub low: Duration,
}

impl LaneConfig {
    /// Returns the cadence for a lane.
    #[must_use]
    pub fn cadence(&self, priority: Priority) -> Duration {
        match priority {
            Priority::High => self.high,
            Priority::Normal => self.normal,
            Priority::Low => self.low,
        }
    }

    /// Returns the shortest configured cadence.
    #[must_use]
    pub fn shortest(&self) -> Duration {
        self.high.min(self.normal).min(self.low)
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            high: Duration::from_secs(2),
            normal: Duration::from_secs(10),
            low: Duration::from_secs(60),
        }
    }
}
