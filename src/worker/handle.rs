//! Per-worker resources held by the registry.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::identity::WorkerIdentity;
use crate::config::ExecutionMode;
use crate::execution::{
    ExecutionState, ExecutionStatsSnapshot, WorkerExecutionUnit, WorkerLogicFactory,
};
use crate::messaging::{BrokerChannel, WorkerTopology};

/// Execution context of a worker, fixed at creation
#[derive(Clone)]
pub enum WorkerExecution {
    /// Long-lived unit owning the worker's logic instance
    Dedicated(Arc<WorkerExecutionUnit>),
    /// Fresh instance per message from this factory
    Pooled(Arc<dyn WorkerLogicFactory>),
}

impl WorkerExecution {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Dedicated(_) => ExecutionMode::Dedicated,
            Self::Pooled(_) => ExecutionMode::Pooled,
        }
    }
}

impl std::fmt::Debug for WorkerExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dedicated(unit) => f.debug_tuple("Dedicated").field(unit).finish(),
            Self::Pooled(_) => f.write_str("Pooled"),
        }
    }
}

/// Everything the host owns for one live worker
pub struct WorkerHandle {
    identity: WorkerIdentity,
    topology: WorkerTopology,
    execution: WorkerExecution,
    channel: Arc<dyn BrokerChannel>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    degraded: AtomicBool,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("identity", &self.identity)
            .field("execution", &self.execution)
            .field("channel_open", &self.channel.is_open())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

impl WorkerHandle {
    pub fn new(
        identity: WorkerIdentity,
        topology: WorkerTopology,
        execution: WorkerExecution,
        channel: Arc<dyn BrokerChannel>,
    ) -> Self {
        Self {
            identity,
            topology,
            execution,
            channel,
            consumer: Mutex::new(None),
            degraded: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn topology(&self) -> &WorkerTopology {
        &self.topology
    }

    pub fn execution(&self) -> &WorkerExecution {
        &self.execution
    }

    pub fn mode(&self) -> ExecutionMode {
        self.execution.mode()
    }

    /// The dedicated unit, if any
    pub fn unit(&self) -> Option<&Arc<WorkerExecutionUnit>> {
        match &self.execution {
            WorkerExecution::Dedicated(unit) => Some(unit),
            WorkerExecution::Pooled(_) => None,
        }
    }

    pub fn channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.channel
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Attach the task pumping the worker's delivery stream
    pub fn attach_consumer(&self, task: JoinHandle<()>) {
        if let Some(previous) = self.consumer.lock().replace(task) {
            previous.abort();
        }
    }

    /// Abort the consumer task if it is still running
    pub fn abort_consumer(&self) {
        if let Some(task) = self.consumer.lock().take() {
            task.abort();
        }
    }

    /// Record that the delivery stream failed and consumption ended
    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Release);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn info(&self) -> WorkerInfo {
        let unit = self.unit();
        WorkerInfo {
            identity: self.identity.clone(),
            mode: self.mode(),
            state: unit.map(|u| u.state()),
            stats: unit.map(|u| u.stats()),
            degraded: self.is_degraded(),
            channel_open: self.channel.is_open(),
            created_at: self.created_at,
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.abort_consumer();
    }
}

/// Admin view of one live worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerInfo {
    pub identity: WorkerIdentity,
    pub mode: ExecutionMode,
    /// Unit state; `None` in pooled mode
    pub state: Option<ExecutionState>,
    pub stats: Option<ExecutionStatsSnapshot>,
    pub degraded: bool,
    pub channel_open: bool,
    pub created_at: DateTime<Utc>,
}
