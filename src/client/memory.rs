//! In-Memory Broker
//!
//! A process-local stand-in for a set of broker clusters. Each cluster is
//! keyed by its address and holds one append-only log per topic. Consumers
//! start at the end of the log when they subscribe (the engine always asks
//! for `latest`), producers append and report each outcome immediately.
//!
//! Besides routing records, the broker records what clients did
//! (connections, subscriptions, polls, releases) and can inject poll
//! errors, subscription rejections or publish rejections, which makes it the test double for the
//! forwarding engine.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{
    ClientConnector, ClientError, ConsumerSettings, Header, InboundMessage, OutboundRecord,
    PollEvent, ProducerSettings, SinkClient, SourceClient,
};
use crate::bridge::{Delivered, DeliveryFailure, OutcomeSink};

/// A record stored in an in-memory topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    pub headers: Vec<Header>,
    pub timestamp: Option<i64>,
}

#[derive(Default)]
struct MemoryCluster {
    topics: HashMap<String, Vec<StoredRecord>>,
    poll_errors: HashMap<String, VecDeque<String>>,
    subscriptions: Vec<String>,
    polls: HashMap<String, u64>,
    client_ids: Vec<String>,
    group_ids: Vec<String>,
    released: usize,
    reject_publishes: bool,
    reject_subscriptions: bool,
}

impl MemoryCluster {
    fn append(&mut self, topic: &str, mut record: StoredRecord) -> (i32, i64) {
        let log = self.topics.entry(topic.to_string()).or_default();
        record.offset = log.len() as i64;
        let position = (record.partition, record.offset);
        log.push(record);
        position
    }
}

#[derive(Default)]
struct BrokerState {
    clusters: HashMap<String, MemoryCluster>,
}

/// Shared handle to a set of in-memory clusters
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a cluster reachable at `address`
    pub fn add_cluster(&self, address: &str) {
        self.state
            .lock()
            .clusters
            .entry(address.to_string())
            .or_default();
    }

    /// Append a record to a topic, as an external producer would.
    ///
    /// Returns the assigned offset, or `None` if the cluster does not exist.
    pub fn produce(
        &self,
        address: &str,
        topic: &str,
        key: impl Into<Bytes>,
        payload: impl Into<Bytes>,
    ) -> Option<i64> {
        let record = StoredRecord {
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
            key: Some(key.into()),
            payload: Some(payload.into()),
            headers: Vec::new(),
            timestamp: None,
        };
        self.append(address, record).ok().map(|(_, offset)| offset)
    }

    /// Append a fully specified record (partition, headers, timestamp)
    pub fn produce_record(&self, address: &str, record: StoredRecord) -> Option<i64> {
        self.append(address, record).ok().map(|(_, offset)| offset)
    }

    /// All records currently stored in a topic
    pub fn messages(&self, address: &str, topic: &str) -> Vec<StoredRecord> {
        self.state
            .lock()
            .clusters
            .get(address)
            .and_then(|c| c.topics.get(topic))
            .cloned()
            .unwrap_or_default()
    }

    /// Wait until a topic holds at least `count` records or `timeout` expires
    pub async fn wait_for_messages(
        &self,
        address: &str,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<StoredRecord> {
        self.wait_until(timeout, || self.messages(address, topic).len() >= count)
            .await;
        self.messages(address, topic)
    }

    /// Wait until some consumer on `address` subscribed to `topic`
    pub async fn wait_for_subscription(
        &self,
        address: &str,
        topic: &str,
        timeout: Duration,
    ) -> bool {
        self.wait_until(timeout, || {
            self.subscriptions(address).iter().any(|t| t == topic)
        })
        .await
    }

    async fn wait_until(&self, timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if condition() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return condition();
            }
        }
    }

    /// Queue an error for the next poll of `topic` on `address`
    pub fn inject_poll_error(&self, address: &str, topic: &str, error: impl Into<String>) {
        self.state
            .lock()
            .clusters
            .entry(address.to_string())
            .or_default()
            .poll_errors
            .entry(topic.to_string())
            .or_default()
            .push_back(error.into());
        self.notify.notify_waiters();
    }

    /// Make every publish to `address` fail (or succeed again)
    pub fn reject_publishes(&self, address: &str, reject: bool) {
        if let Some(cluster) = self.state.lock().clusters.get_mut(address) {
            cluster.reject_publishes = reject;
        }
    }

    /// Make every subscription on `address` fail (or succeed again)
    pub fn reject_subscriptions(&self, address: &str, reject: bool) {
        if let Some(cluster) = self.state.lock().clusters.get_mut(address) {
            cluster.reject_subscriptions = reject;
        }
    }

    /// Topics subscribed on `address`, in subscription order
    pub fn subscriptions(&self, address: &str) -> Vec<String> {
        self.state
            .lock()
            .clusters
            .get(address)
            .map(|c| c.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Number of polls issued against `topic` on `address`
    pub fn poll_count(&self, address: &str, topic: &str) -> u64 {
        self.state
            .lock()
            .clusters
            .get(address)
            .and_then(|c| c.polls.get(topic).copied())
            .unwrap_or(0)
    }

    /// Client ids of every client acquired on `address`
    pub fn client_ids(&self, address: &str) -> Vec<String> {
        self.state
            .lock()
            .clusters
            .get(address)
            .map(|c| c.client_ids.clone())
            .unwrap_or_default()
    }

    /// Consumer group ids used on `address`
    pub fn group_ids(&self, address: &str) -> Vec<String> {
        self.state
            .lock()
            .clusters
            .get(address)
            .map(|c| c.group_ids.clone())
            .unwrap_or_default()
    }

    /// Number of clients on `address` that have been closed
    pub fn released_clients(&self, address: &str) -> usize {
        self.state
            .lock()
            .clusters
            .get(address)
            .map(|c| c.released)
            .unwrap_or(0)
    }

    fn append(&self, address: &str, record: StoredRecord) -> Result<(i32, i64), String> {
        let position = {
            let mut state = self.state.lock();
            let cluster = state
                .clusters
                .get_mut(address)
                .ok_or_else(|| format!("cluster '{}' is unreachable", address))?;
            if cluster.reject_publishes {
                return Err(format!("cluster '{}' rejected the record", address));
            }
            let topic = record.topic.clone();
            cluster.append(&topic, record)
        };
        self.notify.notify_waiters();
        Ok(position)
    }

    fn register_client(
        &self,
        address: &str,
        client_id: &str,
        group_id: Option<&str>,
    ) -> Result<(), ClientError> {
        if address.is_empty() {
            return Err(ClientError::Connect(format!(
                "no bootstrap address for client '{}'",
                client_id
            )));
        }

        let mut state = self.state.lock();
        let cluster = state
            .clusters
            .get_mut(address)
            .ok_or_else(|| ClientError::Connect(format!("cluster '{}' is unreachable", address)))?;
        cluster.client_ids.push(client_id.to_string());
        if let Some(group_id) = group_id {
            cluster.group_ids.push(group_id.to_string());
        }
        Ok(())
    }

    fn release_client(&self, address: &str) {
        if let Some(cluster) = self.state.lock().clusters.get_mut(address) {
            cluster.released += 1;
        }
    }

    fn subscribe(&self, address: &str, topic: &str) -> Result<usize, ClientError> {
        let cursor = {
            let mut state = self.state.lock();
            let cluster = state.clusters.get_mut(address).ok_or_else(|| {
                ClientError::Subscribe(format!("cluster '{}' is unreachable", address))
            })?;
            if cluster.reject_subscriptions {
                return Err(ClientError::Subscribe(format!(
                    "cluster '{}' rejected the subscription to '{}'",
                    address, topic
                )));
            }
            cluster.subscriptions.push(topic.to_string());
            cluster.topics.get(topic).map(Vec::len).unwrap_or(0)
        };
        self.notify.notify_waiters();
        Ok(cursor)
    }

    fn record_poll(&self, address: &str, topic: &str) {
        if let Some(cluster) = self.state.lock().clusters.get_mut(address) {
            *cluster.polls.entry(topic.to_string()).or_default() += 1;
        }
    }

    fn next_event(&self, address: &str, topic: &str, cursor: &mut usize) -> Option<PollEvent> {
        let mut state = self.state.lock();
        let cluster = state.clusters.get_mut(address)?;

        if let Some(error) = cluster
            .poll_errors
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
        {
            return Some(PollEvent::Error(ClientError::Consume(error)));
        }

        let record = cluster.topics.get(topic)?.get(*cursor)?;
        *cursor += 1;
        Some(PollEvent::Message(InboundMessage {
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            key: record.key.clone(),
            payload: record.payload.clone(),
            headers: record.headers.clone(),
            timestamp: record.timestamp,
        }))
    }
}

#[async_trait]
impl ClientConnector for MemoryBroker {
    async fn connect_source(
        &self,
        settings: ConsumerSettings,
    ) -> Result<Box<dyn SourceClient>, ClientError> {
        self.register_client(
            &settings.address,
            &settings.client_id,
            Some(&settings.group_id),
        )?;
        Ok(Box::new(MemorySource {
            broker: self.clone(),
            address: settings.address,
            topic: None,
            cursor: 0,
        }))
    }

    async fn connect_sink(
        &self,
        settings: ProducerSettings,
    ) -> Result<Box<dyn SinkClient>, ClientError> {
        self.register_client(&settings.address, &settings.client_id, None)?;
        Ok(Box::new(MemorySink {
            broker: self.clone(),
            address: settings.address,
        }))
    }
}

struct MemorySource {
    broker: MemoryBroker,
    address: String,
    topic: Option<String>,
    cursor: usize,
}

#[async_trait]
impl SourceClient for MemorySource {
    async fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        self.cursor = self.broker.subscribe(&self.address, topic)?;
        self.topic = Some(topic.to_string());
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> PollEvent {
        let Some(topic) = self.topic.clone() else {
            tokio::time::sleep(timeout).await;
            return PollEvent::Empty;
        };

        self.broker.record_poll(&self.address, &topic);
        let deadline = Instant::now() + timeout;
        let notify = self.broker.notify.clone();
        loop {
            let notified = notify.notified();
            if let Some(event) = self.broker.next_event(&self.address, &topic, &mut self.cursor) {
                return event;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return PollEvent::Empty;
            }
        }
    }

    async fn close(&mut self) {
        self.topic = None;
        self.broker.release_client(&self.address);
    }
}

struct MemorySink {
    broker: MemoryBroker,
    address: String,
}

#[async_trait]
impl SinkClient for MemorySink {
    fn publish(&mut self, record: OutboundRecord, outcomes: OutcomeSink) {
        let topic = record.topic.clone();
        let stored = StoredRecord {
            topic: record.topic,
            partition: record.partition.unwrap_or(0),
            offset: 0,
            key: record.key,
            payload: record.payload,
            headers: record.headers,
            timestamp: record.timestamp,
        };

        let result = match self.broker.append(&self.address, stored) {
            Ok((partition, offset)) => Ok(Delivered {
                topic,
                partition,
                offset,
            }),
            Err(error) => Err(DeliveryFailure { topic, error }),
        };
        outcomes.deliver(result);
    }

    async fn close(&mut self) {
        self.broker.release_client(&self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::feedback_channel;
    use crate::client::{Acks, OffsetReset};
    use crate::route::{Endpoint, Route};

    fn consumer_settings(address: &str) -> ConsumerSettings {
        ConsumerSettings {
            address: address.to_string(),
            client_id: "c-1".to_string(),
            group_id: "g-1".to_string(),
            offset_reset: OffsetReset::Latest,
        }
    }

    #[tokio::test]
    async fn test_unknown_cluster_is_unreachable() {
        let broker = MemoryBroker::new();
        let result = broker.connect_source(consumer_settings("nowhere:9092")).await;
        assert!(matches!(result, Err(ClientError::Connect(_))));
    }

    #[tokio::test]
    async fn test_consumer_starts_at_latest() {
        let broker = MemoryBroker::new();
        broker.add_cluster("c1");
        broker.produce("c1", "t", "old", "before-subscribe");

        let mut source = broker
            .connect_source(consumer_settings("c1"))
            .await
            .unwrap();
        source.subscribe("t").await.unwrap();
        broker.produce("c1", "t", "new", "after-subscribe");

        match source.poll(Duration::from_millis(100)).await {
            PollEvent::Message(m) => assert_eq!(m.payload.as_deref(), Some(&b"after-subscribe"[..])),
            other => panic!("expected message, got {:?}", other),
        }
        assert!(matches!(
            source.poll(Duration::from_millis(20)).await,
            PollEvent::Empty
        ));
        assert_eq!(broker.poll_count("c1", "t"), 2);
    }

    #[tokio::test]
    async fn test_injected_error_precedes_messages() {
        let broker = MemoryBroker::new();
        broker.add_cluster("c1");
        let mut source = broker
            .connect_source(consumer_settings("c1"))
            .await
            .unwrap();
        source.subscribe("t").await.unwrap();

        broker.produce("c1", "t", "k", "v");
        broker.inject_poll_error("c1", "t", "boom");

        assert!(matches!(
            source.poll(Duration::from_millis(50)).await,
            PollEvent::Error(ClientError::Consume(_))
        ));
        assert!(matches!(
            source.poll(Duration::from_millis(50)).await,
            PollEvent::Message(_)
        ));
    }

    #[tokio::test]
    async fn test_sink_reports_outcomes() {
        let broker = MemoryBroker::new();
        broker.add_cluster("c2");
        let mut sink = broker
            .connect_sink(ProducerSettings {
                address: "c2".to_string(),
                client_id: "p-1".to_string(),
                acks: Acks::All,
            })
            .await
            .unwrap();

        let route = Route::new(Endpoint::new("a", "c1", "t"), Endpoint::new("b", "c2", "t2"));
        let (tx, mut rx) = feedback_channel(4);
        let record = OutboundRecord {
            topic: "t2".to_string(),
            partition: None,
            key: None,
            payload: Some(Bytes::from_static(b"v")),
            headers: Vec::new(),
            timestamp: None,
        };

        sink.publish(record.clone(), OutcomeSink::new(route.id().clone(), tx.clone()));
        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.route, *route.id());
        assert_eq!(
            outcome.result,
            Ok(Delivered {
                topic: "t2".to_string(),
                partition: 0,
                offset: 0
            })
        );

        broker.reject_publishes("c2", true);
        sink.publish(record, OutcomeSink::new(route.id().clone(), tx));
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.result.is_err());
        assert_eq!(broker.messages("c2", "t2").len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_subscription() {
        let broker = MemoryBroker::new();
        broker.add_cluster("c1");
        broker.reject_subscriptions("c1", true);
        let mut source = broker
            .connect_source(consumer_settings("c1"))
            .await
            .unwrap();

        let result = source.subscribe("t").await;
        assert!(matches!(result, Err(ClientError::Subscribe(_))));
        assert!(broker.subscriptions("c1").is_empty());

        broker.reject_subscriptions("c1", false);
        source.subscribe("t").await.unwrap();
        assert_eq!(broker.subscriptions("c1"), vec!["t".to_string()]);
    }
}
