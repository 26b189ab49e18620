//! Kafka Client Connector
//!
//! Backs the client capability with librdkafka: a [`StreamConsumer`] per
//! source and a [`FutureProducer`] per destination.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header as KafkaHeader, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, warn};

use super::{
    ClientConnector, ClientError, ConsumerSettings, Header, InboundMessage, OutboundRecord,
    PollEvent, ProducerSettings, SinkClient, SourceClient,
};
use crate::bridge::{Delivered, DeliveryFailure, OutcomeSink};
use crate::config::KafkaConfig;

/// Creates librdkafka clients for the forwarding engines
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    config: KafkaConfig,
    close_timeout: Duration,
}

impl KafkaConnector {
    pub fn new(config: KafkaConfig, close_timeout: Duration) -> Self {
        Self {
            config,
            close_timeout,
        }
    }

    /// Extra properties go in first; the route's own settings always win.
    fn consumer_config(&self, settings: &ConsumerSettings) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        for (key, value) in &self.config.consumer {
            cfg.set(key, value);
        }
        cfg.set("bootstrap.servers", &settings.address)
            .set("client.id", &settings.client_id)
            .set("group.id", &settings.group_id)
            .set("auto.offset.reset", settings.offset_reset.as_str());
        cfg
    }

    fn producer_config(&self, settings: &ProducerSettings) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        for (key, value) in &self.config.producer {
            cfg.set(key, value);
        }
        cfg.set("bootstrap.servers", &settings.address)
            .set("client.id", &settings.client_id)
            .set("acks", settings.acks.as_str());
        cfg
    }
}

fn require_address(address: &str, client_id: &str) -> Result<(), ClientError> {
    if address.is_empty() {
        return Err(ClientError::Connect(format!(
            "no bootstrap address for client '{}'",
            client_id
        )));
    }
    Ok(())
}

/// Run a metadata request on a blocking thread; librdkafka blocks until
/// the cluster answers or the timeout expires.
async fn probe<F>(client_id: String, fetch: F) -> Result<(), ClientError>
where
    F: FnOnce() -> Result<usize, rdkafka::error::KafkaError> + Send + 'static,
{
    match tokio::task::spawn_blocking(fetch).await {
        Ok(Ok(topics)) => {
            debug!("Kafka client '{}': Cluster reports {} topics", client_id, topics);
            Ok(())
        }
        Ok(Err(e)) => Err(ClientError::Connect(format!(
            "metadata request from '{}' failed: {}",
            client_id, e
        ))),
        Err(e) => Err(ClientError::Connect(format!(
            "metadata probe for '{}' aborted: {}",
            client_id, e
        ))),
    }
}

#[async_trait]
impl ClientConnector for KafkaConnector {
    async fn connect_source(
        &self,
        settings: ConsumerSettings,
    ) -> Result<Box<dyn SourceClient>, ClientError> {
        require_address(&settings.address, &settings.client_id)?;

        let consumer: StreamConsumer = self
            .consumer_config(&settings)
            .create()
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        let consumer = Arc::new(consumer);

        let probe_consumer = consumer.clone();
        let timeout = self.config.metadata_timeout;
        probe(settings.client_id.clone(), move || {
            probe_consumer
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.topics().len())
        })
        .await?;

        Ok(Box::new(KafkaSource {
            consumer,
            client_id: settings.client_id,
        }))
    }

    async fn connect_sink(
        &self,
        settings: ProducerSettings,
    ) -> Result<Box<dyn SinkClient>, ClientError> {
        require_address(&settings.address, &settings.client_id)?;

        let producer: FutureProducer = self
            .producer_config(&settings)
            .create()
            .map_err(|e| ClientError::Connect(e.to_string()))?;

        let probe_producer = producer.clone();
        let timeout = self.config.metadata_timeout;
        probe(settings.client_id.clone(), move || {
            probe_producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.topics().len())
        })
        .await?;

        Ok(Box::new(KafkaSink {
            producer,
            client_id: settings.client_id,
            close_timeout: self.close_timeout,
        }))
    }
}

struct KafkaSource {
    consumer: Arc<StreamConsumer>,
    client_id: String,
}

fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| Header {
                    key: h.key.to_string(),
                    value: h.value.map(Bytes::copy_from_slice),
                })
                .collect()
        })
        .unwrap_or_default();

    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message.payload().map(Bytes::copy_from_slice),
        headers,
        timestamp: message.timestamp().to_millis(),
    }
}

#[async_trait]
impl SourceClient for KafkaSource {
    async fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| ClientError::Subscribe(e.to_string()))
    }

    async fn poll(&mut self, timeout: Duration) -> PollEvent {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => PollEvent::Empty,
            Ok(Ok(message)) => PollEvent::Message(to_inbound(&message)),
            Ok(Err(e)) => PollEvent::Error(ClientError::Consume(e.to_string())),
        }
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        debug!("Kafka client '{}': Consumer released", self.client_id);
    }
}

struct KafkaSink {
    producer: FutureProducer,
    client_id: String,
    close_timeout: Duration,
}

fn to_owned_headers(headers: &[Header]) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, h| {
            acc.insert(KafkaHeader {
                key: &h.key,
                value: h.value.as_deref(),
            })
        })
}

#[async_trait]
impl SinkClient for KafkaSink {
    fn publish(&mut self, record: OutboundRecord, outcomes: OutcomeSink) {
        let mut future_record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic);
        if let Some(key) = record.key.as_deref() {
            future_record = future_record.key(key);
        }
        if let Some(payload) = record.payload.as_deref() {
            future_record = future_record.payload(payload);
        }
        if let Some(partition) = record.partition {
            future_record = future_record.partition(partition);
        }
        if let Some(timestamp) = record.timestamp {
            future_record = future_record.timestamp(timestamp);
        }
        if !record.headers.is_empty() {
            future_record = future_record.headers(to_owned_headers(&record.headers));
        }

        let topic = record.topic.clone();
        match self.producer.send_result(future_record) {
            Ok(delivery) => {
                // One task per in-flight record; librdkafka's queue bounds
                // how many exist and reporting never blocks
                tokio::spawn(async move {
                    let result = match delivery.await {
                        Ok(Ok((partition, offset))) => Ok(Delivered {
                            topic,
                            partition,
                            offset,
                        }),
                        Ok(Err((e, _))) => Err(DeliveryFailure {
                            topic,
                            error: e.to_string(),
                        }),
                        Err(_) => Err(DeliveryFailure {
                            topic,
                            error: "delivery canceled".to_string(),
                        }),
                    };
                    outcomes.deliver(result);
                });
            }
            Err((e, _)) => {
                let failure = DeliveryFailure {
                    topic,
                    error: ClientError::Publish(e.to_string()).to_string(),
                };
                outcomes.deliver(Err(failure));
            }
        }
    }

    async fn close(&mut self) {
        let producer = self.producer.clone();
        let timeout = self.close_timeout;
        match tokio::task::spawn_blocking(move || producer.flush(timeout)).await {
            Ok(Ok(())) => debug!("Kafka client '{}': Producer flushed", self.client_id),
            Ok(Err(e)) => warn!("Kafka client '{}': Flush failed: {}", self.client_id, e),
            Err(e) => warn!("Kafka client '{}': Flush aborted: {}", self.client_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Acks, OffsetReset};

    fn connector() -> KafkaConnector {
        let mut config = KafkaConfig::default();
        config
            .consumer
            .insert("session.timeout.ms".to_string(), "30000".to_string());
        config
            .producer
            .insert("compression.type".to_string(), "lz4".to_string());
        KafkaConnector::new(config, Duration::from_secs(1))
    }

    #[test]
    fn test_consumer_config() {
        let cfg = connector().consumer_config(&ConsumerSettings {
            address: "localhost:9093".to_string(),
            client_id: "kafka1-consumer-1".to_string(),
            group_id: "kafka1-group-1".to_string(),
            offset_reset: OffsetReset::Latest,
        });

        assert_eq!(cfg.get("bootstrap.servers"), Some("localhost:9093"));
        assert_eq!(cfg.get("client.id"), Some("kafka1-consumer-1"));
        assert_eq!(cfg.get("group.id"), Some("kafka1-group-1"));
        assert_eq!(cfg.get("auto.offset.reset"), Some("latest"));
        assert_eq!(cfg.get("session.timeout.ms"), Some("30000"));
        assert_eq!(cfg.get("compression.type"), None);
    }

    #[test]
    fn test_producer_config() {
        let cfg = connector().producer_config(&ProducerSettings {
            address: "localhost:9095".to_string(),
            client_id: "kafka2-producer-2".to_string(),
            acks: Acks::All,
        });

        assert_eq!(cfg.get("bootstrap.servers"), Some("localhost:9095"));
        assert_eq!(cfg.get("client.id"), Some("kafka2-producer-2"));
        assert_eq!(cfg.get("acks"), Some("all"));
        assert_eq!(cfg.get("compression.type"), Some("lz4"));
        assert_eq!(cfg.get("group.id"), None);
    }

    #[test]
    fn test_extra_properties_cannot_override_route_settings() {
        let mut config = KafkaConfig::default();
        for (key, value) in [
            ("bootstrap.servers", "elsewhere:9092"),
            ("client.id", "shared-client"),
            ("group.id", "shared-group"),
            ("auto.offset.reset", "earliest"),
            ("fetch.min.bytes", "1024"),
        ] {
            config.consumer.insert(key.to_string(), value.to_string());
        }
        for (key, value) in [
            ("client.id", "shared-client"),
            ("acks", "1"),
            ("linger.ms", "5"),
        ] {
            config.producer.insert(key.to_string(), value.to_string());
        }
        let connector = KafkaConnector::new(config, Duration::from_secs(1));

        let consumer = connector.consumer_config(&ConsumerSettings {
            address: "localhost:9093".to_string(),
            client_id: "kafka1-consumer-7".to_string(),
            group_id: "kafka1-group-7".to_string(),
            offset_reset: OffsetReset::Latest,
        });
        assert_eq!(consumer.get("bootstrap.servers"), Some("localhost:9093"));
        assert_eq!(consumer.get("client.id"), Some("kafka1-consumer-7"));
        assert_eq!(consumer.get("group.id"), Some("kafka1-group-7"));
        assert_eq!(consumer.get("auto.offset.reset"), Some("latest"));
        assert_eq!(consumer.get("fetch.min.bytes"), Some("1024"));

        let producer = connector.producer_config(&ProducerSettings {
            address: "localhost:9095".to_string(),
            client_id: "kafka2-producer-8".to_string(),
            acks: Acks::All,
        });
        assert_eq!(producer.get("client.id"), Some("kafka2-producer-8"));
        assert_eq!(producer.get("acks"), Some("all"));
        assert_eq!(producer.get("linger.ms"), Some("5"));
    }

    #[tokio::test]
    async fn test_empty_address_fails_before_client_creation() {
        let result = connector()
            .connect_sink(ProducerSettings {
                address: String::new(),
                client_id: "missing-producer-1".to_string(),
                acks: Acks::All,
            })
            .await;

        assert!(matches!(result, Err(ClientError::Connect(_))));
    }
}
