//! Configuration sources feeding a running pool

mod common;

use std::io::Write;
use std::sync::Arc;

use common::*;
use nats_bridge::config::BridgeConfig;
use nats_bridge::environment::StaticEnvironment;
use nats_bridge::messaging::InMemoryBroker;
use nats_bridge::pool::ConsumerPool;
use nats_bridge::{BridgeError, ConfigManager};

#[tokio::test]
async fn test_file_config_drives_consumer_pool() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[endpoint]
servers = ["nats://a:4222"]
topic = "orders"
queue_name = "workers"
max_messages = 2

[pool]
pool_size = 2
"#
    )
    .unwrap();

    let manager = ConfigManager::load_with_overrides(Some(file.path()), None).unwrap();
    assert_eq!(manager.source_file(), Some(file.path()));

    let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
    let processor = RecordingProcessor::new();
    let pool = ConsumerPool::new(
        manager.config(),
        Arc::new(broker.transport()),
        processor.clone(),
    )
    .unwrap();

    pool.start().await.unwrap();
    assert_eq!(pool.size(), 2);
    assert_eq!(broker.subscriptions_on("orders"), 2);
    pool.stop().await.unwrap();
}

#[test]
fn test_uri_and_builder_configs_agree() {
    let env = StaticEnvironment::new();
    let parsed = BridgeConfig::from_uri(
        "nats://a:4222?topic=orders&queueName=workers&maxMessages=5&poolSize=3",
        &env,
    )
    .unwrap();

    let mut built = bridge_config("nats://a:4222", "orders", 3);
    built.endpoint = built.endpoint.with_queue("workers").with_max_messages(5);

    assert_eq!(parsed.endpoint.servers, built.endpoint.servers);
    assert_eq!(parsed.endpoint.topic, built.endpoint.topic);
    assert_eq!(parsed.endpoint.queue_name, built.endpoint.queue_name);
    assert_eq!(parsed.endpoint.max_messages, built.endpoint.max_messages);
    assert_eq!(parsed.pool.pool_size, built.pool.pool_size);
}

#[test]
fn test_invalid_configs_are_rejected_before_any_connection() {
    let broker = InMemoryBroker::with_servers(&["nats://a:4222"]);
    let config = bridge_config("nats://a:4222", "", 1);
    let result = ConsumerPool::new(&config, Arc::new(broker.transport()), RecordingProcessor::new());
    assert!(matches!(result, Err(BridgeError::ConfigurationError(_))));
    assert_eq!(broker.connect_attempts(), 0);

    let env = StaticEnvironment::new();
    assert!(BridgeConfig::from_uri("nats://apcera:orders?topic=orders", &env).is_err());
    assert!(BridgeConfig::from_uri("nats://a:4222?topic=orders&bogus=1", &env).is_err());
}
