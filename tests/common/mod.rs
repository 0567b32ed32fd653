//! Shared fixtures for worker host integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use worker_host::config::{ExecutionMode, WorkerHostConfig};
use worker_host::execution::{ExecutionError, ExecutionResult, LogicLoader, WorkerLogic};
use worker_host::messaging::providers::InMemoryBroker;
use worker_host::messaging::InboundMessage;
use worker_host::worker::WorkerIdentity;
use worker_host::WorkerLifecycleManager;

pub const RECORDING_MODULE: &str = "recording";

/// Messages handled by recording logic, in handling order
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MessageLog {
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Payloads handled by one worker
    pub fn payloads_for(&self, worker: &str) -> Vec<Value> {
        self.entries
            .lock()
            .iter()
            .filter(|(id, _)| id == worker)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn push(&self, worker: &WorkerIdentity, payload: Value) {
        self.entries.lock().push((worker.to_string(), payload));
    }
}

/// Logic that records every payload; `{"fail": true}` makes it return an error
struct RecordingLogic {
    identity: WorkerIdentity,
    log: MessageLog,
}

#[async_trait]
impl WorkerLogic for RecordingLogic {
    fn name(&self) -> &str {
        RECORDING_MODULE
    }

    async fn handle(&mut self, message: InboundMessage) -> ExecutionResult<()> {
        let fail = message.payload.get("fail").and_then(Value::as_bool) == Some(true);
        self.log.push(&self.identity, message.payload);
        if fail {
            return Err(ExecutionError::logic("requested failure"));
        }
        Ok(())
    }
}

pub struct TestHost {
    pub broker: InMemoryBroker,
    pub manager: WorkerLifecycleManager,
    pub log: MessageLog,
}

impl TestHost {
    pub fn new(max_workers: usize, mode: ExecutionMode) -> Self {
        let mut config = WorkerHostConfig::default();
        config.max_workers = max_workers;
        config.execution.mode = mode;
        config.execution.logic = RECORDING_MODULE.to_string();
        Self::with_config(config)
    }

    pub fn with_config(config: WorkerHostConfig) -> Self {
        let log = MessageLog::default();
        let loader = LogicLoader::with_builtins();
        let recorder = log.clone();
        loader.register(RECORDING_MODULE, move |identity: &WorkerIdentity| {
            Ok(Box::new(RecordingLogic {
                identity: identity.clone(),
                log: recorder.clone(),
            }) as Box<dyn WorkerLogic>)
        });

        let broker = InMemoryBroker::new();
        let manager = WorkerLifecycleManager::new(
            Arc::new(config),
            Arc::new(broker.clone()),
            Arc::new(loader),
        );

        Self {
            broker,
            manager,
            log,
        }
    }

    /// Publish a message for `worker` through its own exchange
    pub fn send(&self, worker: &str, payload: Value) -> usize {
        let body = InboundMessage::new(worker, payload)
            .to_bytes()
            .expect("message encodes");
        self.broker
            .publish(&format!("exchange.{worker}"), &format!("route.{worker}"), body)
    }

    /// Publish a raw body through `worker`'s exchange
    pub fn send_raw(&self, worker: &str, body: &[u8]) -> usize {
        self.broker.publish(
            &format!("exchange.{worker}"),
            &format!("route.{worker}"),
            body.to_vec(),
        )
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
