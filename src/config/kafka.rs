//! Kafka client configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Consumer properties every engine sets per route
pub const RESERVED_CONSUMER_KEYS: &[&str] =
    &["bootstrap.servers", "client.id", "group.id", "auto.offset.reset"];

/// Producer properties every engine sets per route
pub const RESERVED_PRODUCER_KEYS: &[&str] = &["bootstrap.servers", "client.id", "acks"];

/// Settings applied to every librdkafka client the bridge creates
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Timeout of the metadata probe run when a client is acquired
    #[serde(with = "humantime_serde")]
    pub metadata_timeout: Duration,
    /// Extra consumer properties (e.g., `"session.timeout.ms" = "30000"`)
    pub consumer: BTreeMap<String, String>,
    /// Extra producer properties (e.g., `"compression.type" = "lz4"`)
    pub producer: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(10),
            consumer: BTreeMap::new(),
            producer: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    /// Reject extra properties that would replace per-route settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_reserved("kafka.consumer", &self.consumer, RESERVED_CONSUMER_KEYS)?;
        check_reserved("kafka.producer", &self.producer, RESERVED_PRODUCER_KEYS)
    }
}

fn check_reserved(
    section: &str,
    properties: &BTreeMap<String, String>,
    reserved: &[&str],
) -> Result<(), ConfigError> {
    match properties.keys().find(|k| reserved.contains(&k.as_str())) {
        Some(key) => Err(ConfigError::Validation(format!(
            "{}.\"{}\" is set per route and cannot be overridden",
            section, key
        ))),
        None => Ok(()),
    }
}
