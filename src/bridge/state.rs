//! Forwarding State
//!
//! `Idle -> Running -> Terminated(reason)`. Once an engine attempt has
//! terminated it cannot be terminated again or resume running; only the
//! supervisor's restart path puts a route back to `Idle`.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Why a route stopped forwarding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// A client could not be acquired
    Acquire(String),
    /// The source subscription failed
    Subscribe(String),
    /// The source reported an error while polling
    Consume(String),
    /// The process is shutting down
    Shutdown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Acquire(msg) => write!(f, "acquisition failed: {}", msg),
            TerminationReason::Subscribe(msg) => write!(f, "subscription failed: {}", msg),
            TerminationReason::Consume(msg) => write!(f, "consume error: {}", msg),
            TerminationReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// State of one route's forwarding engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ForwardingState {
    /// Not started yet, or waiting to be restarted
    #[default]
    Idle,
    /// Subscribed and forwarding
    Running,
    /// Stopped
    Terminated(TerminationReason),
}

impl ForwardingState {
    pub fn is_running(&self) -> bool {
        matches!(self, ForwardingState::Running)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, ForwardingState::Terminated(_))
    }
}

/// Shared, observable forwarding state
#[derive(Debug, Clone, Default)]
pub struct StateCell(Arc<RwLock<ForwardingState>>);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ForwardingState {
        self.0.read().clone()
    }

    /// `Idle -> Running`; false if the state was not `Idle`
    pub fn start(&self) -> bool {
        let mut state = self.0.write();
        if *state != ForwardingState::Idle {
            return false;
        }
        *state = ForwardingState::Running;
        true
    }

    /// Move to `Terminated`; false if already terminated
    pub fn terminate(&self, reason: TerminationReason) -> bool {
        let mut state = self.0.write();
        if state.is_terminated() {
            return false;
        }
        *state = ForwardingState::Terminated(reason);
        true
    }

    /// `Terminated -> Idle`, ahead of a restart
    pub(crate) fn reset(&self) {
        let mut state = self.0.write();
        if state.is_terminated() {
            *state = ForwardingState::Idle;
        }
    }

    /// Reason of the current termination, if any
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match &*self.0.read() {
            ForwardingState::Terminated(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}
