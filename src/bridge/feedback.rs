//! Delivery Feedback
//!
//! Every engine hands its destination client an [`OutcomeSink`]; the client
//! reports the final outcome of each publish through it onto one channel
//! shared by all routes. The supervisor drains that channel and applies a
//! [`DeliveryPolicy`].
//!
//! Reporting never waits: when the channel is full the outcome is dropped
//! and counted in [`FeedbackStats::dropped`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::config::DeliveryMode;
use crate::route::RouteId;

/// Where a record ended up on the destination cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Why a record was not delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub topic: String,
    pub error: String,
}

/// Outcome of one publish, tagged with the route that submitted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub route: RouteId,
    pub result: Result<Delivered, DeliveryFailure>,
}

/// Create the shared feedback channel
pub fn feedback_channel(capacity: usize) -> (FeedbackSender, mpsc::Receiver<DeliveryOutcome>) {
    let (tx, rx) = mpsc::channel(capacity);
    let sender = FeedbackSender {
        tx,
        stats: Arc::new(FeedbackStats::default()),
    };
    (sender, rx)
}

/// Sending half of the feedback channel, shared by every route
#[derive(Debug, Clone)]
pub struct FeedbackSender {
    tx: mpsc::Sender<DeliveryOutcome>,
    stats: Arc<FeedbackStats>,
}

impl FeedbackSender {
    /// Counters shared with every clone of this sender
    pub fn stats(&self) -> Arc<FeedbackStats> {
        self.stats.clone()
    }

    fn report(&self, outcome: DeliveryOutcome) {
        match self.tx.try_send(outcome) {
            Ok(()) => {}
            Err(TrySendError::Full(outcome)) => {
                self.stats.record_dropped();
                debug!("Route '{}': Feedback channel full, outcome dropped", outcome.route);
            }
            Err(TrySendError::Closed(outcome)) => {
                debug!("Route '{}': Feedback channel closed, outcome dropped", outcome.route);
            }
        }
    }
}

/// Per-route handle onto the feedback channel
#[derive(Debug, Clone)]
pub struct OutcomeSink {
    route: RouteId,
    feedback: FeedbackSender,
}

impl OutcomeSink {
    pub fn new(route: RouteId, feedback: FeedbackSender) -> Self {
        Self { route, feedback }
    }

    pub fn route(&self) -> &RouteId {
        &self.route
    }

    /// Report an outcome without waiting for channel capacity
    pub fn deliver(self, result: Result<Delivered, DeliveryFailure>) {
        self.feedback.report(DeliveryOutcome {
            route: self.route,
            result,
        });
    }
}

/// Counters over all drained outcomes, plus outcomes lost to a full channel
#[derive(Debug, Default)]
pub struct FeedbackStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl FeedbackStats {
    pub fn record(&self, outcome: &DeliveryOutcome) {
        match outcome.result {
            Ok(_) => self.delivered.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Reaction to a drained delivery outcome
pub trait DeliveryPolicy: Send + Sync {
    fn on_outcome(&self, outcome: &DeliveryOutcome);
}

/// Fire-and-forget: outcomes are drained and dropped
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreOutcomes;

impl DeliveryPolicy for IgnoreOutcomes {
    fn on_outcome(&self, _outcome: &DeliveryOutcome) {}
}

/// Log every outcome
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutcomes;

impl DeliveryPolicy for LogOutcomes {
    fn on_outcome(&self, outcome: &DeliveryOutcome) {
        match &outcome.result {
            Ok(delivered) => debug!(
                "Route '{}': Delivered to {} [{}] @ {}",
                outcome.route, delivered.topic, delivered.partition, delivered.offset
            ),
            Err(failure) => warn!(
                "Route '{}': Delivery to {} failed: {}",
                outcome.route, failure.topic, failure.error
            ),
        }
    }
}

/// Build the policy selected in configuration
pub fn delivery_policy(mode: DeliveryMode) -> Arc<dyn DeliveryPolicy> {
    match mode {
        DeliveryMode::Ignore => Arc::new(IgnoreOutcomes),
        DeliveryMode::Log => Arc::new(LogOutcomes),
    }
}
