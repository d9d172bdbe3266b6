//! Pregel runtime configuration
//!
//! Configuration for the coordinator and the workers including
//! superstep limits, checkpoint cadence, ack timeouts, partition
//! granularity and worker parallelism.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempts per request before an `Incomplete` result becomes final
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Pregel runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PregelConfig {
    /// Job halts once the superstep counter reaches this value
    pub max_supersteps: u64,

    /// Checkpoint frequency (every N supersteps, 0 = only on halt/rebalance)
    pub checkpoint_rate: u64,

    /// Longest wait for the next worker message while collecting acks
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// Average number of partitions per worker
    pub partitions_per_worker: usize,

    /// Largest fastest/slowest speed ratio still considered balanced
    pub max_optimal_ratio: f64,

    /// Number of sub-engines per worker
    pub parallelism: usize,

    /// Capacity of the bounded queues between tasks
    pub channel_capacity: usize,

    /// Scheduler back-off when there is no worker or no request
    #[serde(with = "humantime_serde")]
    pub idle_poll: Duration,

    /// Runs of one request before giving up on it
    pub max_attempts: usize,
}

impl Default for PregelConfig {
    fn default() -> Self {
        Self {
            max_supersteps: 20,
            checkpoint_rate: 10,
            ack_timeout: Duration::from_secs(5),
            partitions_per_worker: 10,
            max_optimal_ratio: 100.0,
            parallelism: num_cpus::get(),
            channel_capacity: 10_000,
            idle_poll: Duration::from_secs(1),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PregelConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum supersteps
    pub fn with_max_supersteps(mut self, max: u64) -> Self {
        self.max_supersteps = max;
        self
    }

    /// Set checkpoint rate (0 disables periodic checkpoints)
    pub fn with_checkpoint_rate(mut self, rate: u64) -> Self {
        self.checkpoint_rate = rate;
        self
    }

    /// Set the ack timeout
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the average partition count per worker
    pub fn with_partitions_per_worker(mut self, partitions: usize) -> Self {
        self.partitions_per_worker = partitions.max(1);
        self
    }

    /// Set the balance threshold
    pub fn with_max_optimal_ratio(mut self, ratio: f64) -> Self {
        self.max_optimal_ratio = ratio;
        self
    }

    /// Set parallelism level
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the capacity of inter-task queues
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the scheduler idle back-off
    pub fn with_idle_poll(mut self, poll: Duration) -> Self {
        self.idle_poll = poll;
        self
    }

    /// Set how many times a request may run before it is failed
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Check if periodic checkpointing is enabled
    pub fn checkpointing_enabled(&self) -> bool {
        self.checkpoint_rate > 0
    }

    /// Check if a periodic checkpoint is due after reaching this superstep
    #[allow(clippy::manual_is_multiple_of)]
    pub fn should_checkpoint(&self, superstep: u64) -> bool {
        self.checkpointing_enabled() && superstep > 0 && superstep % self.checkpoint_rate == 0
    }
}
