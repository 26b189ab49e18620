//! Broker Client Capability
//!
//! The forwarding engine talks to brokers only through the traits in this
//! module. Two connectors are provided:
//! - [`KafkaConnector`]: librdkafka consumer/producer pairs
//! - `MemoryBroker`: in-process clusters for tests, behind the `test-util`
//!   feature
//!
//! Clients are owned exclusively by one engine and released through
//! [`SourceClient::close`] / [`SinkClient::close`] on every exit path.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::bridge::OutcomeSink;

mod kafka;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use kafka::KafkaConnector;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryBroker;

/// Error type for client operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Client could not be created or the cluster is unreachable
    Connect(String),
    /// Subscription request failed
    Subscribe(String),
    /// Error reported while polling for messages
    Consume(String),
    /// Record could not be submitted for publishing
    Publish(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Connect(msg) => write!(f, "Connect failed: {}", msg),
            ClientError::Subscribe(msg) => write!(f, "Subscribe failed: {}", msg),
            ClientError::Consume(msg) => write!(f, "Consume error: {}", msg),
            ClientError::Publish(msg) => write!(f, "Publish failed: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

/// Where a new consumer group starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    /// librdkafka `auto.offset.reset` value
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Producer acknowledgement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acks {
    None,
    Leader,
    All,
}

impl Acks {
    /// librdkafka `acks` value
    pub fn as_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

/// Settings for acquiring a consuming client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub address: String,
    pub client_id: String,
    pub group_id: String,
    pub offset_reset: OffsetReset,
}

/// Settings for acquiring a producing client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerSettings {
    pub address: String,
    pub client_id: String,
    pub acks: Acks,
}

/// A message header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: Option<Bytes>,
}

/// A message as read from the source cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    pub headers: Vec<Header>,
    /// Milliseconds since the epoch
    pub timestamp: Option<i64>,
}

/// A record ready to publish on the destination cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    /// `None` lets the destination cluster pick the partition
    pub partition: Option<i32>,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    pub headers: Vec<Header>,
    pub timestamp: Option<i64>,
}

/// Result of one bounded poll
#[derive(Debug)]
pub enum PollEvent {
    Message(InboundMessage),
    Error(ClientError),
    /// Nothing arrived before the timeout
    Empty,
}

/// Consuming side of a route
#[async_trait]
pub trait SourceClient: Send {
    /// Subscribe to a topic
    async fn subscribe(&mut self, topic: &str) -> Result<(), ClientError>;

    /// Wait at most `timeout` for the next event
    async fn poll(&mut self, timeout: Duration) -> PollEvent;

    /// Release the client
    async fn close(&mut self);
}

/// Producing side of a route
#[async_trait]
pub trait SinkClient: Send {
    /// Submit a record without waiting for acknowledgement.
    ///
    /// The delivery outcome, success or failure, is reported later on
    /// `outcomes`, which never blocks the caller.
    fn publish(&mut self, record: OutboundRecord, outcomes: OutcomeSink);

    /// Flush in-flight records and release the client
    async fn close(&mut self);
}

/// Factory for broker clients
#[async_trait]
pub trait ClientConnector: Send + Sync {
    /// Acquire a consuming client
    async fn connect_source(
        &self,
        settings: ConsumerSettings,
    ) -> Result<Box<dyn SourceClient>, ClientError>;

    /// Acquire a producing client
    async fn connect_sink(
        &self,
        settings: ProducerSettings,
    ) -> Result<Box<dyn SinkClient>, ClientError>;
}
