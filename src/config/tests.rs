//! Config module tests

use std::time::Duration;

use pretty_assertions::assert_eq;
use test_case::test_case;

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("VB_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${VB_TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("VB_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("VB_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${VB_TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    std::env::set_var("VB_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${VB_TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("VB_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("VB_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${VB_TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("vibebridge.toml");

    std::env::set_var("VB_TEST_KAFKA1_HOST", "10.0.0.1");

    let config_content = r#"
[clusters]
kafka1 = "${VB_TEST_KAFKA1_HOST}:9093"
kafka2 = "${VB_TEST_KAFKA2_HOST:-localhost}:9095"

[routes]
"kafka1:push-topic" = "kafka2:push-topic"
"#;

    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.clusters["kafka1"], "10.0.0.1:9093");
    assert_eq!(config.clusters["kafka2"], "localhost:9095");
    assert_eq!(config.routes.len(), 1);
    assert_eq!(config.engine.poll_timeout, Duration::from_secs(1));

    std::env::remove_var("VB_TEST_KAFKA1_HOST");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert!(config.routes.is_empty());
    assert_eq!(config.log.level, "info");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.clusters.is_empty());
    assert!(config.routes.is_empty());
    assert_eq!(config.engine.poll_timeout, Duration::from_secs(1));
    assert_eq!(config.engine.feedback_capacity, 1024);
    assert_eq!(config.engine.partitioning, PartitionStrategy::Broker);
    assert_eq!(config.delivery.policy, DeliveryMode::Ignore);
    assert_eq!(config.restart.policy, RestartMode::Never);
    assert_eq!(config.kafka.metadata_timeout, Duration::from_secs(10));
}

#[test]
fn test_parse_full_config() {
    let toml = r#"
[log]
level = "debug"

[clusters]
kafka1 = "localhost:9093"
kafka2 = "localhost:9095"

[routes]
"kafka1:push-topic" = "kafka2:push-topic"
"kafka2:pull-topic" = "kafka1:pull-topic"

[engine]
poll_timeout = "250ms"
feedback_capacity = 64
partitioning = "preserve"
close_timeout = "2s"

[delivery]
policy = "log"

[restart]
policy = "backoff"
initial_backoff = "500ms"
max_backoff = "30s"
max_attempts = 5

[kafka]
metadata_timeout = "3s"

[kafka.consumer]
"session.timeout.ms" = "30000"

[kafka.producer]
"compression.type" = "lz4"
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.clusters.len(), 2);
    assert_eq!(config.engine.poll_timeout, Duration::from_millis(250));
    assert_eq!(config.engine.feedback_capacity, 64);
    assert_eq!(config.engine.partitioning, PartitionStrategy::Preserve);
    assert_eq!(config.engine.close_timeout, Duration::from_secs(2));
    assert_eq!(config.delivery.policy, DeliveryMode::Log);
    assert_eq!(config.restart.policy, RestartMode::Backoff);
    assert_eq!(config.restart.initial_backoff, Duration::from_millis(500));
    assert_eq!(config.restart.max_backoff, Duration::from_secs(30));
    assert_eq!(config.restart.max_attempts, 5);
    assert_eq!(config.kafka.metadata_timeout, Duration::from_secs(3));
    assert_eq!(config.kafka.consumer["session.timeout.ms"], "30000");
    assert_eq!(config.kafka.producer["compression.type"], "lz4");

    let table = config.route_table().unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table[0].0.to_string(), "kafka1:push-topic");
    assert_eq!(table[0].1.to_string(), "kafka2:push-topic");
    assert_eq!(table[1].0.to_string(), "kafka2:pull-topic");
    assert_eq!(table[1].1.to_string(), "kafka1:pull-topic");
}

#[test]
fn test_malformed_route_rejected() {
    let toml = r#"
[routes]
"kafka1-push-topic" = "kafka2:push-topic"
"#;
    let result = Config::parse(toml);
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_unknown_cluster_is_not_a_config_error() {
    let toml = r#"
[clusters]
kafka1 = "localhost:9093"

[routes]
"kafka1:push-topic" = "nowhere:push-topic"
"#;
    let config = Config::parse(toml).unwrap();
    assert_eq!(config.route_table().unwrap().len(), 1);
}

#[test]
fn test_zero_poll_timeout_rejected() {
    let toml = r#"
[engine]
poll_timeout = "0s"
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_zero_feedback_capacity_rejected() {
    let toml = r#"
[engine]
feedback_capacity = 0
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_backoff_bounds_validated() {
    let toml = r#"
[restart]
policy = "backoff"
initial_backoff = "2m"
max_backoff = "1m"
"#;
    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));

    // Bounds are ignored while restarts are disabled
    let toml = r#"
[restart]
policy = "never"
initial_backoff = "2m"
max_backoff = "1m"
"#;
    assert!(Config::parse(toml).is_ok());
}

#[test]
fn test_invalid_partitioning_rejected() {
    let toml = r#"
[engine]
partitioning = "round-robin"
"#;
    assert!(matches!(Config::parse(toml), Err(ConfigError::Parse(_))));
}

#[test_case("consumer", "group.id" ; "consumer group")]
#[test_case("consumer", "client.id" ; "consumer client id")]
#[test_case("consumer", "auto.offset.reset" ; "offset reset")]
#[test_case("consumer", "bootstrap.servers" ; "consumer bootstrap")]
#[test_case("producer", "acks" ; "producer acks")]
#[test_case("producer", "client.id" ; "producer client id")]
fn test_reserved_kafka_property_rejected(section: &str, key: &str) {
    let toml = format!(
        r#"
[kafka.{}]
"{}" = "shared"
"#,
        section, key
    );
    assert!(matches!(
        Config::parse(&toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_unreserved_kafka_properties_accepted() {
    let toml = r#"
[kafka.consumer]
"session.timeout.ms" = "30000"

[kafka.producer]
"group.id" = "ignored-by-producers"
"#;
    let config = Config::parse(toml).unwrap();
    assert_eq!(config.kafka.producer["group.id"], "ignored-by-producers");
}
