//! Forwarding Engine
//!
//! One engine serves one route: it acquires a consumer on the source
//! cluster and a producer on the destination cluster, then polls, rewrites
//! and republishes until the source reports an error or shutdown is
//! requested. Both clients are released on every exit path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::feedback::{FeedbackSender, OutcomeSink};
use super::state::{StateCell, TerminationReason};
use crate::client::{
    ClientConnector, ClientError, InboundMessage, OutboundRecord, PollEvent, SinkClient,
    SourceClient,
};
use crate::config::{EngineConfig, PartitionStrategy};
use crate::identity::IdentityGenerator;
use crate::route::{Endpoint, Route};

/// Per-engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Upper bound on one source poll
    pub poll_timeout: Duration,
    /// Destination partition selection
    pub partitioning: PartitionStrategy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            partitioning: PartitionStrategy::default(),
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            poll_timeout: config.poll_timeout,
            partitioning: config.partitioning,
        }
    }
}

/// Which client of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Destination => write!(f, "destination"),
        }
    }
}

/// Why an engine stopped with an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A client could not be acquired; the route never ran
    Acquire { side: Side, error: ClientError },
    /// The source subscription failed
    Subscribe(ClientError),
    /// The source reported an error while polling
    Consume(ClientError),
}

impl EngineError {
    pub fn reason(&self) -> TerminationReason {
        match self {
            EngineError::Acquire { side, error } => {
                TerminationReason::Acquire(format!("{} client: {}", side, error))
            }
            EngineError::Subscribe(e) => TerminationReason::Subscribe(e.to_string()),
            EngineError::Consume(e) => TerminationReason::Consume(e.to_string()),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Acquire { side, error } => {
                write!(f, "Failed to acquire {} client: {}", side, error)
            }
            EngineError::Subscribe(e) => write!(f, "Subscription failed: {}", e),
            EngineError::Consume(e) => write!(f, "Source failed: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Acquire { error, .. } => Some(error),
            EngineError::Subscribe(e) | EngineError::Consume(e) => Some(e),
        }
    }
}

/// Turn a source message into a record for `destination`.
///
/// Only the topic is rewritten. The source offset is never carried over;
/// the source partition is kept only under [`PartitionStrategy::Preserve`].
pub fn rewrite(
    message: InboundMessage,
    destination: &Endpoint,
    partitioning: PartitionStrategy,
) -> OutboundRecord {
    let partition = match partitioning {
        PartitionStrategy::Broker => None,
        PartitionStrategy::Preserve => Some(message.partition),
    };

    OutboundRecord {
        topic: destination.topic().to_string(),
        partition,
        key: message.key,
        payload: message.payload,
        headers: message.headers,
        timestamp: message.timestamp,
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Forwards one route
pub struct ForwardingEngine {
    route: Route,
    settings: EngineSettings,
    connector: Arc<dyn ClientConnector>,
    identities: Arc<dyn IdentityGenerator>,
    feedback: FeedbackSender,
    state: StateCell,
}

impl ForwardingEngine {
    pub fn new(
        route: Route,
        settings: EngineSettings,
        connector: Arc<dyn ClientConnector>,
        identities: Arc<dyn IdentityGenerator>,
        feedback: FeedbackSender,
    ) -> Self {
        Self {
            route,
            settings,
            connector,
            identities,
            feedback,
            state: StateCell::new(),
        }
    }

    /// Report state transitions into an existing cell
    pub fn with_state(mut self, state: StateCell) -> Self {
        self.state = state;
        self
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    /// Run until the source fails or `shutdown` turns true.
    ///
    /// Returns `Ok(())` only for a requested shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        let id = self.route.id().clone();
        info!("Route '{}': Starting engine ({})", id, self.route);

        let (mut source, mut sink) = match self.acquire().await {
            Ok(clients) => clients,
            Err(e) => {
                error!("Route '{}': {}", id, e);
                self.state.terminate(e.reason());
                return Err(e);
            }
        };

        let result = self
            .forward(source.as_mut(), sink.as_mut(), &mut shutdown)
            .await;

        source.close().await;
        sink.close().await;

        match result {
            Ok(()) => {
                self.state.terminate(TerminationReason::Shutdown);
                info!("Route '{}': Stopped", id);
                Ok(())
            }
            Err(e) => {
                self.state.terminate(e.reason());
                Err(e)
            }
        }
    }

    /// Acquire the source client, then the destination client
    async fn acquire(&self) -> Result<(Box<dyn SourceClient>, Box<dyn SinkClient>), EngineError> {
        let source_endpoint = self.route.source();
        let destination_endpoint = self.route.destination();

        let consumer_identity = self.identities.consumer(source_endpoint);
        let producer_identity = self.identities.producer(destination_endpoint);
        debug!(
            "Route '{}': Consumer '{}', producer '{}'",
            self.route.id(),
            consumer_identity.client_id,
            producer_identity.client_id
        );

        let mut source = self
            .connector
            .connect_source(source_endpoint.consumer_settings(&consumer_identity))
            .await
            .map_err(|error| EngineError::Acquire {
                side: Side::Source,
                error,
            })?;

        let sink = match self
            .connector
            .connect_sink(destination_endpoint.producer_settings(&producer_identity))
            .await
        {
            Ok(sink) => sink,
            Err(error) => {
                source.close().await;
                return Err(EngineError::Acquire {
                    side: Side::Destination,
                    error,
                });
            }
        };

        Ok((source, sink))
    }

    async fn forward(
        &self,
        source: &mut dyn SourceClient,
        sink: &mut dyn SinkClient,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let id = self.route.id();
        let source_endpoint = self.route.source();
        let destination = self.route.destination();

        if let Err(e) = source.subscribe(source_endpoint.topic()).await {
            error!(
                "Route '{}': Couldn't subscribe to {}: {}",
                id, source_endpoint, e
            );
            return Err(EngineError::Subscribe(e));
        }
        info!("Route '{}': Subscribed to {}", id, source_endpoint);

        self.state.start();
        let outcomes = OutcomeSink::new(id.clone(), self.feedback.clone());

        loop {
            if stop_requested(shutdown) {
                return Ok(());
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || stop_requested(shutdown) {
                        return Ok(());
                    }
                }
                event = source.poll(self.settings.poll_timeout) => {
                    match event {
                        PollEvent::Message(message) => {
                            debug!(
                                "Route '{}': Forwarding {} [{}] @ {} -> {}",
                                id, message.topic, message.partition, message.offset, destination
                            );
                            let record = rewrite(message, destination, self.settings.partitioning);
                            sink.publish(record, outcomes.clone());
                        }
                        PollEvent::Error(e) => {
                            error!(
                                "Route '{}': Couldn't forward message from {}:{} -> {}:{}: {}",
                                id,
                                source_endpoint.name(),
                                source_endpoint.topic(),
                                destination.name(),
                                destination.topic(),
                                e
                            );
                            return Err(EngineError::Consume(e));
                        }
                        PollEvent::Empty => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::client::Header;

    fn message() -> InboundMessage {
        InboundMessage {
            topic: "push-topic".to_string(),
            partition: 7,
            offset: 1234,
            key: Some(Bytes::from_static(b"k1")),
            payload: Some(Bytes::from_static(b"v1")),
            headers: vec![Header {
                key: "trace".to_string(),
                value: Some(Bytes::from_static(b"abc")),
            }],
            timestamp: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn test_rewrite_sets_destination_topic() {
        let destination = Endpoint::new("kafka2", "localhost:9095", "mirrored-topic");
        let record = rewrite(message(), &destination, PartitionStrategy::Broker);

        assert_eq!(record.topic, "mirrored-topic");
        assert_eq!(record.partition, None);
        assert_eq!(record.key.as_deref(), Some(&b"k1"[..]));
        assert_eq!(record.payload.as_deref(), Some(&b"v1"[..]));
        assert_eq!(record.headers.len(), 1);
        assert_eq!(record.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn test_rewrite_preserve_partition() {
        let destination = Endpoint::new("kafka2", "localhost:9095", "push-topic");
        let record = rewrite(message(), &destination, PartitionStrategy::Preserve);
        assert_eq!(record.partition, Some(7));
    }

    #[test]
    fn test_engine_error_reason() {
        let err = EngineError::Acquire {
            side: Side::Destination,
            error: ClientError::Connect("cluster 'x' is unreachable".to_string()),
        };
        assert!(matches!(err.reason(), TerminationReason::Acquire(_)));
        assert_eq!(
            err.to_string(),
            "Failed to acquire destination client: Connect failed: cluster 'x' is unreachable"
        );

        let err = EngineError::Consume(ClientError::Consume("boom".to_string()));
        assert_eq!(
            err.reason(),
            TerminationReason::Consume("Consume error: boom".to_string())
        );
    }
}
