//! Configuration files driving worker provisioning.

mod common;

use common::{wait_until, TestHost};
use serde_json::json;
use std::io::Write;

use worker_host::config::{ArgumentValue, ConfigLoader, ExecutionMode};
use worker_host::messaging::ExchangeKind;

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_yaml_config_shapes_worker_topology() {
    let file = config_file(
        ".yaml",
        r#"
max_workers: 3
execution:
  mode: pooled
  logic: recording
channel:
  exchange_kind: fanout
queue:
  auto_delete: true
  arguments:
    x-message-ttl: "60000"
  bind_arguments:
    x-match: all
"#,
    );

    let config = ConfigLoader::new()
        .without_env()
        .with_file(file.path())
        .load()
        .unwrap();
    assert_eq!(config.max_workers, 3);
    assert_eq!(config.execution.mode, ExecutionMode::Pooled);

    let host = TestHost::with_config(config);
    host.manager.create_worker("yaml-worker").await.unwrap();

    assert_eq!(
        host.broker.exchange_kind("exchange.yaml-worker"),
        Some(ExchangeKind::Fanout)
    );
    let queue = host.broker.queue_info("yaml-worker").unwrap();
    assert!(queue.flags.auto_delete);
    assert_eq!(
        queue.arguments.get("x-message-ttl"),
        Some(&ArgumentValue::Int(60000))
    );

    // Fanout ignores the routing key
    host.broker
        .publish("exchange.yaml-worker", "anything", br#"{"id":"yaml-worker","payload":7}"#.to_vec());
    assert!(wait_until(|| host.log.payloads_for("yaml-worker") == vec![json!(7)]).await);

    // Auto-delete queues disappear with their last consumer
    host.manager.remove_worker("yaml-worker").await.unwrap();
    assert_eq!(host.broker.queue_info("yaml-worker"), None);
}

#[test]
fn test_unknown_exchange_kind_is_rejected() {
    let file = config_file(".toml", "[channel]\nexchange_kind = \"sideways\"\n");
    let result = ConfigLoader::new()
        .without_env()
        .with_file(file.path())
        .load();
    assert!(result.is_err());
}
