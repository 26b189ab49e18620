//! Topic Bridge
//!
//! Forwards messages between topics on different Kafka clusters. Each
//! [`Route`](crate::route::Route) gets its own [`ForwardingEngine`], which
//! runs as an isolated task under a [`RouteSupervisor`]: a failing route
//! terminates alone and never disturbs the others.
//!
//! Publishing is fire-and-forget. Destination clients report each delivery
//! outcome on a channel shared by all routes, which the supervisor drains.
//!
//! # Example Configuration
//!
//! ```toml
//! [clusters]
//! kafka1 = "localhost:9092"
//! kafka2 = "localhost:9095"
//!
//! [routes]
//! "kafka1:push-topic" = "kafka2:push-topic"
//! "kafka2:pull-topic" = "kafka1:pull-topic"
//! ```

mod engine;
mod feedback;
mod restart;
mod state;
mod supervisor;


pub use engine::{rewrite, EngineError, EngineSettings, ForwardingEngine, Side};
pub use feedback::{
    delivery_policy, feedback_channel, Delivered, DeliveryFailure, DeliveryOutcome,
    DeliveryPolicy, FeedbackSender, FeedbackStats, IgnoreOutcomes, LogOutcomes, OutcomeSink,
};
pub use restart::RestartPolicy;
pub use state::{ForwardingState, StateCell, TerminationReason};
pub use supervisor::{RouteHandle, RouteSupervisor};
