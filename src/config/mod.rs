//! Configuration Module
//!
//! Provides TOML-based configuration for VibeBridge with support for:
//! - Logging
//! - Cluster name to bootstrap address mapping
//! - The static route table (`"cluster:topic" = "cluster:topic"`)
//! - Engine, delivery and restart policies
//! - Extra librdkafka client properties
//! - Environment variable overrides (VIBEBRIDGE__* prefix)

use std::collections::BTreeMap;
use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use engine::{
    DeliveryConfig, DeliveryMode, EngineConfig, PartitionStrategy, RestartConfig, RestartMode,
};
pub use kafka::KafkaConfig;
pub use route::TopicRef;

mod engine;
mod kafka;
mod route;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("static regex is valid");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Config(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Cluster name -> bootstrap address
    pub clusters: BTreeMap<String, String>,
    /// Source `cluster:topic` -> destination `cluster:topic`
    pub routes: BTreeMap<String, String>,
    /// Forwarding engine configuration
    pub engine: EngineConfig,
    /// Delivery outcome handling
    pub delivery: DeliveryConfig,
    /// Route restart policy
    pub restart: RestartConfig,
    /// Kafka client settings
    pub kafka: KafkaConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `VIBEBRIDGE__` prefix with double underscores for nesting:
    ///    - `VIBEBRIDGE__CLUSTERS__KAFKA1=broker1:9092` overrides `clusters.kafka1`
    ///    - `VIBEBRIDGE__ENGINE__POLL_TIMEOUT=500ms` overrides `engine.poll_timeout`
    ///    - `VIBEBRIDGE__LOG__LEVEL=debug` overrides `log.level`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("engine.poll_timeout", "1s")?
            .set_default("engine.feedback_capacity", 1024)?
            .set_default("engine.close_timeout", "5s")?
            .set_default("restart.policy", "never")?
            .set_default("delivery.policy", "ignore")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("VIBEBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Cluster names used by routes are not checked against `[clusters]`;
    /// an unknown name resolves to an empty address and that route fails
    /// when its engine acquires clients.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.route_table()?;

        if self.engine.poll_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "engine.poll_timeout must be greater than zero".to_string(),
            ));
        }

        if self.engine.feedback_capacity == 0 {
            return Err(ConfigError::Validation(
                "engine.feedback_capacity must be greater than zero".to_string(),
            ));
        }

        self.kafka.validate()?;

        if self.restart.policy == RestartMode::Backoff {
            if self.restart.initial_backoff.is_zero() {
                return Err(ConfigError::Validation(
                    "restart.initial_backoff must be greater than zero".to_string(),
                ));
            }
            if self.restart.initial_backoff > self.restart.max_backoff {
                return Err(ConfigError::Validation(
                    "restart.initial_backoff cannot exceed restart.max_backoff".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Parse every `[routes]` entry into (source, destination) references
    pub fn route_table(&self) -> Result<Vec<(TopicRef, TopicRef)>, ConfigError> {
        self.routes
            .iter()
            .map(|(source, destination)| {
                Ok((TopicRef::parse(source)?, TopicRef::parse(destination)?))
            })
            .collect()
    }
}
