//! Transient execution on the shared runtime pool for pooled-mode workers.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::logic::WorkerLogicFactory;
use super::unit::{execute_logic, ExecutionStats, ExecutionStatsSnapshot};
use crate::messaging::InboundMessage;
use crate::worker::WorkerIdentity;

/// Runs each message on a fresh logic instance in its own Tokio task.
///
/// Holds no per-worker state; no ordering is guaranteed, not even between two
/// messages for the same worker.
#[derive(Debug, Clone, Default)]
pub struct TransientExecutionPath {
    stats: Arc<ExecutionStats>,
}

impl TransientExecutionPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a message and return immediately
    pub fn submit(
        &self,
        identity: WorkerIdentity,
        factory: Arc<dyn WorkerLogicFactory>,
        message: InboundMessage,
    ) -> JoinHandle<()> {
        let stats = Arc::clone(&self.stats);
        debug!(worker_id = %identity, message_id = %message.id, "Submitting transient execution");

        tokio::spawn(async move {
            match factory.create(&identity) {
                Ok(mut logic) => {
                    execute_logic(&identity, logic.as_mut(), message, &stats).await;
                }
                Err(e) => {
                    stats.record_failure();
                    error!(
                        worker_id = %identity,
                        message_id = %message.id,
                        error = %e,
                        "Failed to create worker logic for transient execution"
                    );
                }
            }
        })
    }

    /// Counters across all transient executions
    pub fn stats(&self) -> ExecutionStatsSnapshot {
        self.stats.snapshot()
    }
}
