//! Routes and Endpoints
//!
//! An [`Endpoint`] names one topic on one cluster; a [`Route`] pairs a
//! source endpoint with a destination endpoint. Both are immutable values
//! built once from the static route table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::client::{Acks, ConsumerSettings, OffsetReset, ProducerSettings};
use crate::config::{Config, ConfigError, TopicRef};
use crate::identity::ClientIdentity;

/// One topic on one broker cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    name: String,
    address: String,
    topic: String,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            topic: topic.into(),
        }
    }

    /// Cluster name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bootstrap address of the cluster (empty when the name did not resolve)
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer settings for reading this endpoint: new messages only
    pub fn consumer_settings(&self, identity: &ClientIdentity) -> ConsumerSettings {
        ConsumerSettings {
            address: self.address.clone(),
            client_id: identity.client_id.clone(),
            group_id: identity
                .group_id
                .clone()
                .unwrap_or_else(|| format!("{}-group", identity.client_id)),
            offset_reset: OffsetReset::Latest,
        }
    }

    /// Producer settings for writing this endpoint: all in-sync replicas must ack
    pub fn producer_settings(&self, identity: &ClientIdentity) -> ProducerSettings {
        ProducerSettings {
            address: self.address.clone(),
            client_id: identity.client_id.clone(),
            acks: Acks::All,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.topic)
    }
}

/// Stable identifier of a route, e.g. `kafka1:push-topic->kafka2:push-topic`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(Arc<str>);

impl RouteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unidirectional forwarding link from one endpoint to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    id: RouteId,
    source: Endpoint,
    destination: Endpoint,
}

impl Route {
    pub fn new(source: Endpoint, destination: Endpoint) -> Self {
        let id = RouteId(Arc::from(format!("{}->{}", source, destination)));
        Self {
            id,
            source,
            destination,
        }
    }

    pub fn id(&self) -> &RouteId {
        &self.id
    }

    pub fn source(&self) -> &Endpoint {
        &self.source
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) -> {} ({})",
            self.source,
            display_address(&self.source.address),
            self.destination,
            display_address(&self.destination.address)
        )
    }
}

fn display_address(address: &str) -> &str {
    if address.is_empty() {
        "<unresolved>"
    } else {
        address
    }
}

/// Resolve parsed route table entries against the cluster address map.
///
/// Unknown cluster names resolve to an empty address.
pub fn resolve_routes(
    clusters: &BTreeMap<String, String>,
    table: &[(TopicRef, TopicRef)],
) -> Vec<Route> {
    let endpoint = |r: &TopicRef| {
        let address = clusters.get(&r.cluster).cloned().unwrap_or_default();
        Endpoint::new(r.cluster.clone(), address, r.topic.clone())
    };

    table
        .iter()
        .map(|(source, destination)| Route::new(endpoint(source), endpoint(destination)))
        .collect()
}

impl Config {
    /// Build every configured route
    pub fn build_routes(&self) -> Result<Vec<Route>, ConfigError> {
        Ok(resolve_routes(&self.clusters, &self.route_table()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("kafka1".to_string(), "localhost:9093".to_string()),
            ("kafka2".to_string(), "localhost:9095".to_string()),
        ])
    }

    #[test]
    fn test_resolve_routes() {
        let table = vec![(
            TopicRef::parse("kafka1:push-topic").unwrap(),
            TopicRef::parse("kafka2:push-topic").unwrap(),
        )];
        let routes = resolve_routes(&clusters(), &table);

        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.source().name(), "kafka1");
        assert_eq!(route.source().address(), "localhost:9093");
        assert_eq!(route.source().topic(), "push-topic");
        assert_eq!(route.destination().name(), "kafka2");
        assert_eq!(route.destination().address(), "localhost:9095");
        assert_eq!(route.id().as_str(), "kafka1:push-topic->kafka2:push-topic");
    }

    #[test]
    fn test_unknown_cluster_resolves_to_empty_address() {
        let table = vec![(
            TopicRef::parse("kafka1:a").unwrap(),
            TopicRef::parse("missing:b").unwrap(),
        )];
        let routes = resolve_routes(&clusters(), &table);

        assert_eq!(routes[0].destination().address(), "");
        assert_eq!(
            routes[0].to_string(),
            "kafka1:a (localhost:9093) -> missing:b (<unresolved>)"
        );
    }

    #[test]
    fn test_same_cluster_route() {
        let table = vec![(
            TopicRef::parse("kafka1:raw").unwrap(),
            TopicRef::parse("kafka1:copy").unwrap(),
        )];
        let routes = resolve_routes(&clusters(), &table);
        assert_eq!(routes[0].source().address(), routes[0].destination().address());
        assert_ne!(routes[0].source().topic(), routes[0].destination().topic());
    }

    #[test]
    fn test_client_settings() {
        let endpoint = Endpoint::new("kafka1", "localhost:9093", "push-topic");
        let identity = ClientIdentity {
            client_id: "kafka1-consumer-7".to_string(),
            group_id: Some("kafka1-group-7".to_string()),
        };

        let consumer = endpoint.consumer_settings(&identity);
        assert_eq!(consumer.address, "localhost:9093");
        assert_eq!(consumer.client_id, "kafka1-consumer-7");
        assert_eq!(consumer.group_id, "kafka1-group-7");
        assert_eq!(consumer.offset_reset, OffsetReset::Latest);

        let producer = endpoint.producer_settings(&ClientIdentity {
            client_id: "kafka1-producer-7".to_string(),
            group_id: None,
        });
        assert_eq!(producer.client_id, "kafka1-producer-7");
        assert_eq!(producer.acks, Acks::All);
    }
}
