//! Route Table Configuration
//!
//! Parsing of `"cluster:topic"` references used as keys and values of the
//! `[routes]` table.

use std::fmt;

use super::ConfigError;

/// A `cluster:topic` reference from the route table
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicRef {
    /// Cluster name, resolved against `[clusters]`
    pub cluster: String,
    /// Topic on that cluster
    pub topic: String,
}

impl TopicRef {
    /// Parse a `cluster:topic` reference.
    ///
    /// Splits at the first `:`; neither part may be empty and the topic
    /// may not contain another `:`.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let (cluster, topic) = value.split_once(':').ok_or_else(|| {
            ConfigError::Validation(format!(
                "route entry '{}' must have the form 'cluster:topic'",
                value
            ))
        })?;

        let cluster = cluster.trim();
        let topic = topic.trim();
        if cluster.is_empty() || topic.is_empty() {
            return Err(ConfigError::Validation(format!(
                "route entry '{}' has an empty cluster or topic",
                value
            )));
        }
        if topic.contains(':') {
            return Err(ConfigError::Validation(format!(
                "route entry '{}' has more than one ':'",
                value
            )));
        }

        Ok(Self {
            cluster: cluster.to_string(),
            topic: topic.to_string(),
        })
    }
}

impl fmt::Display for TopicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cluster, self.topic)
    }
}
