//! Engine Configuration
//!
//! Settings shared by every forwarding engine, plus the supervisor's
//! delivery and restart policies.

use std::time::Duration;

use serde::Deserialize;

/// How the destination partition of a forwarded record is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    /// Let the destination cluster assign the partition
    #[default]
    Broker,
    /// Reuse the partition number the record had on the source cluster
    Preserve,
}

/// Forwarding engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a single source poll (e.g., "1s", "500ms")
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Capacity of the shared delivery feedback channel
    pub feedback_capacity: usize,
    /// Destination partition selection
    pub partitioning: PartitionStrategy,
    /// How long a destination client may spend flushing on release
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            feedback_capacity: 1024,
            partitioning: PartitionStrategy::default(),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// What the supervisor does with delivery outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Drain and discard
    #[default]
    Ignore,
    /// Log failures at WARN and successes at DEBUG
    Log,
}

/// Delivery outcome handling
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub policy: DeliveryMode,
}

/// Whether terminated routes are started again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// A terminated route stays down until the process restarts
    #[default]
    Never,
    /// Restart with exponential backoff
    Backoff,
}

/// Route restart configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub policy: RestartMode,
    /// First delay before a restart (e.g., "1s")
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Cap for the doubling backoff (e.g., "1m")
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Maximum consecutive restarts that never reach `Running` (0 = unlimited)
    pub max_attempts: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: RestartMode::default(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            max_attempts: 0,
        }
    }
}
