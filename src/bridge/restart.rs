//! Route Restart Policy

use std::time::Duration;

use super::state::TerminationReason;
use crate::config::{RestartConfig, RestartMode};

/// Whether, and when, a terminated route is started again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    /// Terminated routes stay down
    #[default]
    Never,
    /// Restart after `initial`, doubling up to `max` while failures repeat.
    ///
    /// Failures are counted since the route last reached `Running`;
    /// `max_attempts == 0` is unlimited.
    Backoff {
        initial: Duration,
        max: Duration,
        max_attempts: u32,
    },
}

impl RestartPolicy {
    /// Delay before the next restart after `failures` consecutive failed
    /// restarts, or `None` to stay down
    pub fn next_delay(&self, failures: u32, reason: &TerminationReason) -> Option<Duration> {
        if *reason == TerminationReason::Shutdown {
            return None;
        }

        match *self {
            RestartPolicy::Never => None,
            RestartPolicy::Backoff {
                initial,
                max,
                max_attempts,
            } => {
                if max_attempts > 0 && failures >= max_attempts {
                    return None;
                }
                let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(max))
            }
        }
    }
}

impl From<&RestartConfig> for RestartPolicy {
    fn from(config: &RestartConfig) -> Self {
        match config.policy {
            RestartMode::Never => RestartPolicy::Never,
            RestartMode::Backoff => RestartPolicy::Backoff {
                initial: config.initial_backoff,
                max: config.max_backoff,
                max_attempts: config.max_attempts,
            },
        }
    }
}
