//! VibeBridge - Kafka cluster-to-cluster topic bridge
//!
//! Forwards messages from a topic on one Kafka cluster to a topic on
//! another, for a static table of routes. Every route runs in its own
//! engine and fails independently.

pub mod bridge;
pub mod client;
pub mod config;
pub mod identity;
pub mod route;

pub use bridge::{ForwardingEngine, ForwardingState, RouteSupervisor};
pub use client::{ClientConnector, KafkaConnector};
#[cfg(any(test, feature = "test-util"))]
pub use client::MemoryBroker;
pub use config::Config;
pub use identity::{IdentityGenerator, RandomIdentities, SequentialIdentities};
pub use route::{Endpoint, Route, RouteId};
