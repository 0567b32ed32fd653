//! End-to-end delivery routing through live workers.

mod common;

use common::{wait_until, TestHost, RECORDING_MODULE};
use serde_json::{json, Value};

use worker_host::config::{ExecutionMode, WorkerHostConfig};
use worker_host::messaging::providers::AckRecord;
use worker_host::messaging::InboundMessage;

#[tokio::test]
async fn test_dedicated_workers_keep_arrival_order() {
    let host = TestHost::new(4, ExecutionMode::Dedicated);
    host.manager.create_worker("w1").await.unwrap();
    host.manager.create_worker("w2").await.unwrap();

    for n in 0..50 {
        host.send("w1", json!(n));
        host.send("w2", json!(n));
    }
    assert!(wait_until(|| host.log.len() == 100).await);

    let expected: Vec<Value> = (0..50).map(|n| json!(n)).collect();
    assert_eq!(host.log.payloads_for("w1"), expected);
    assert_eq!(host.log.payloads_for("w2"), expected);
    assert!(wait_until(|| host.manager.router().stats().acked == 100).await);

    host.manager.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_delivery_does_not_stop_consumption() {
    let host = TestHost::new(4, ExecutionMode::Dedicated);
    host.manager.create_worker("w1").await.unwrap();

    host.send_raw("w1", b"definitely not json");
    host.send_raw("w1", br#"{"payload": 1}"#);
    host.send("w1", json!("after"));

    assert!(wait_until(|| host.log.len() == 1).await);
    assert_eq!(host.log.payloads_for("w1"), vec![json!("after")]);
    assert!(wait_until(|| host.broker.ledger().len() == 3).await);
    assert_eq!(
        host.broker.ledger(),
        vec![
            AckRecord::Nack {
                channel: 1,
                delivery_tag: 1,
                requeue: false
            },
            AckRecord::Nack {
                channel: 1,
                delivery_tag: 2,
                requeue: false
            },
            AckRecord::Ack {
                channel: 1,
                delivery_tag: 3
            },
        ]
    );

    let stats = host.manager.router().stats();
    assert_eq!(stats.decode_failures, 2);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(host.broker.unacked_count(), 0);

    host.manager.shutdown().await;
}

#[tokio::test]
async fn test_target_resolved_from_message_not_queue() {
    let host = TestHost::new(4, ExecutionMode::Dedicated);
    host.manager.create_worker("w1").await.unwrap();
    host.manager.create_worker("w2").await.unwrap();

    let body = InboundMessage::new("w2", json!("addressed to w2"))
        .to_bytes()
        .unwrap();
    host.broker.publish("exchange.w1", "route.w1", body);

    assert!(wait_until(|| host.log.len() == 1).await);
    assert_eq!(host.log.payloads_for("w2"), vec![json!("addressed to w2")]);
    assert!(host.log.payloads_for("w1").is_empty());

    // Settled on the channel it arrived on, which belongs to w1
    assert!(
        wait_until(|| host.broker.ledger()
            == vec![AckRecord::Ack {
                channel: 1,
                delivery_tag: 1
            }])
        .await
    );

    host.manager.shutdown().await;
}

#[tokio::test]
async fn test_message_for_unknown_worker_is_dropped() {
    let host = TestHost::new(4, ExecutionMode::Dedicated);
    host.manager.create_worker("w1").await.unwrap();

    let body = InboundMessage::new("ghost", json!(null)).to_bytes().unwrap();
    host.broker.publish("exchange.w1", "route.w1", body);

    assert!(
        wait_until(|| host.broker.ledger()
            == vec![AckRecord::Nack {
                channel: 1,
                delivery_tag: 1,
                requeue: false
            }])
        .await
    );
    assert_eq!(host.manager.router().stats().unroutable, 1);
    assert_eq!(host.log.len(), 0);

    host.manager.shutdown().await;
}

#[tokio::test]
async fn test_pascal_case_identity_field_is_accepted() {
    let host = TestHost::new(4, ExecutionMode::Dedicated);
    host.manager.create_worker("w1").await.unwrap();

    host.send_raw("w1", br#"{"Id": "w1", "Payload": {"k": "v"}}"#);

    assert!(wait_until(|| host.log.len() == 1).await);
    assert_eq!(host.log.payloads_for("w1"), vec![json!({"k": "v"})]);
    host.manager.shutdown().await;
}

#[tokio::test]
async fn test_auto_ack_leaves_settlement_to_broker() {
    let mut config = WorkerHostConfig::default();
    config.execution.logic = RECORDING_MODULE.to_string();
    config.queue.auto_ack = true;
    let host = TestHost::with_config(config);
    host.manager.create_worker("w1").await.unwrap();

    host.send("w1", json!(1));
    host.send_raw("w1", b"garbage");
    host.send("w1", json!(2));

    assert!(wait_until(|| host.log.len() == 2).await);
    assert!(wait_until(|| host.manager.router().stats().received == 3).await);
    assert!(host.broker.ledger().is_empty());
    assert_eq!(host.broker.unacked_count(), 0);

    let stats = host.manager.router().stats();
    assert_eq!(stats.acked, 0);
    assert_eq!(stats.nacked, 0);

    host.manager.shutdown().await;
}

#[tokio::test]
async fn test_logic_failure_is_counted_and_processing_continues() {
    let host = TestHost::new(4, ExecutionMode::Dedicated);
    host.manager.create_worker("w1").await.unwrap();

    host.send("w1", json!({"fail": true}));
    host.send("w1", json!({"n": 2}));

    assert!(wait_until(|| host.log.len() == 2).await);
    assert!(
        wait_until(|| host
            .manager
            .worker("w1")
            .and_then(|w| w.stats)
            .map(|s| s.failed)
            == Some(1))
        .await
    );

    // Receipt acks do not depend on the logic outcome
    assert!(wait_until(|| host.manager.router().stats().acked == 2).await);
    host.manager.shutdown().await;
}

#[tokio::test]
async fn test_pooled_dispatch_reaches_every_message() {
    let host = TestHost::new(4, ExecutionMode::Pooled);
    host.manager.create_worker("p1").await.unwrap();

    for n in 0..20 {
        host.send("p1", json!(n));
    }
    assert!(wait_until(|| host.log.len() == 20).await);

    let mut seen: Vec<i64> = host
        .log
        .payloads_for("p1")
        .iter()
        .filter_map(Value::as_i64)
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..20).collect::<Vec<i64>>());
    assert!(wait_until(|| host.manager.router().transient().stats().processed == 20).await);

    host.manager.shutdown().await;
}
