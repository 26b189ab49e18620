//! Client Identity Generation
//!
//! Every engine instance gets fresh client and consumer-group ids so that
//! concurrently running routes (and restarts of the same route) never share
//! a consumer group. The generator is injected so tests can use
//! deterministic ids.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::route::Endpoint;

/// Identity used when connecting one client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    /// `client.id`
    pub client_id: String,
    /// `group.id` (consumers only)
    pub group_id: Option<String>,
}

/// Source of unique identity tokens
pub trait IdentityGenerator: Send + Sync {
    /// Produce the next token; tokens should not repeat
    fn next_token(&self) -> u64;

    /// Identity for a consumer reading `endpoint`
    fn consumer(&self, endpoint: &Endpoint) -> ClientIdentity {
        let token = self.next_token();
        ClientIdentity {
            client_id: format!("{}-consumer-{}", endpoint.name(), token),
            group_id: Some(format!("{}-group-{}", endpoint.name(), token)),
        }
    }

    /// Identity for a producer writing `endpoint`
    fn producer(&self, endpoint: &Endpoint) -> ClientIdentity {
        ClientIdentity {
            client_id: format!("{}-producer-{}", endpoint.name(), self.next_token()),
            group_id: None,
        }
    }
}

/// Random 64-bit tokens, unique across processes with overwhelming probability
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdentities;

impl IdentityGenerator for RandomIdentities {
    fn next_token(&self) -> u64 {
        rand::random()
    }
}

/// Monotonic tokens starting at a fixed value
#[derive(Debug)]
pub struct SequentialIdentities {
    next: AtomicU64,
}

impl SequentialIdentities {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for SequentialIdentities {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdentityGenerator for SequentialIdentities {
    fn next_token(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
