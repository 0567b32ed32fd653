//! # Worker Lifecycle Manager
//!
//! Creates and removes workers at runtime.
//!
//! ## Creation
//!
//! ```text
//! validate identity → reserve slot → survey existing topology → open channel
//!   → provision topology
//!   → load logic → commit to registry → start unit → consume → spawn consumer task
//! ```
//!
//! Capacity and uniqueness are decided together when the slot is reserved. Any
//! failure after that point unwinds everything done so far: topology this attempt
//! created is deleted, the channel closed, the unit stopped and the slot released.
//! An exchange or queue retained from an earlier worker of the same identity
//! survives a failed re-creation along with the messages waiting in it.
//!
//! ## Removal
//!
//! ```text
//! hide from lookups → request unit stop → close channel → release slot
//! ```
//!
//! The identity stays occupied until removal completes, so a concurrent create
//! for it fails with `DuplicateWorker` rather than racing the teardown.

use futures::StreamExt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::config::{ExecutionMode, WorkerHostConfig};
use crate::error::{Result, WorkerHostError};
use crate::execution::{LogicLoader, WorkerExecutionUnit};
use crate::logging::{log_error, log_worker_operation};
use crate::messaging::{
    BrokerChannel, BrokerConnection, BrokerError, BrokerTopologyAdapter, CreatedObjects,
    DeliveryStream, WorkerTopology,
};
use crate::orchestration::message_router::MessageRouter;
use crate::registry::WorkerRegistry;
use crate::worker::{WorkerExecution, WorkerHandle, WorkerIdentity, WorkerInfo};

/// Admin entry point for worker creation and removal
pub struct WorkerLifecycleManager {
    config: Arc<WorkerHostConfig>,
    connection: Arc<dyn BrokerConnection>,
    registry: Arc<WorkerRegistry>,
    router: Arc<MessageRouter>,
    loader: Arc<LogicLoader>,
}

impl std::fmt::Debug for WorkerLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLifecycleManager")
            .field("provider", &self.connection.provider_name())
            .field("max_workers", &self.config.max_workers)
            .field("mode", &self.config.execution.mode)
            .field("registry", &self.registry)
            .finish()
    }
}

impl WorkerLifecycleManager {
    pub fn new(
        config: Arc<WorkerHostConfig>,
        connection: Arc<dyn BrokerConnection>,
        loader: Arc<LogicLoader>,
    ) -> Self {
        let registry = Arc::new(WorkerRegistry::new());
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            config.auto_ack(),
        ));

        info!(
            provider = connection.provider_name(),
            max_workers = config.max_workers,
            mode = %config.execution.mode,
            logic = %config.execution.logic,
            auto_ack = config.auto_ack(),
            "Worker lifecycle manager ready"
        );

        Self {
            config,
            connection,
            registry,
            router,
            loader,
        }
    }

    pub fn config(&self) -> &WorkerHostConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Provision, register and start consuming for a new worker
    pub async fn create_worker(&self, id: &str) -> Result<WorkerInfo> {
        let identity = WorkerIdentity::new(id)?;
        let reservation = self
            .registry
            .reserve(&identity, self.config.max_workers)
            .map_err(|e| {
                warn!(worker_id = %identity, error = %e, "Worker creation rejected");
                WorkerHostError::from(e)
            })?;

        let topology = WorkerTopology::for_worker(&identity);
        let created = CreatedObjects::survey(self.connection.as_ref(), &topology)
            .await
            .map_err(|e| self.creation_failed(&identity, e.into()))?;

        let channel = self.connection.create_channel().await?;
        let adapter = BrokerTopologyAdapter::new(Arc::clone(&channel), &self.config);

        if let Err(e) = adapter.provision(&topology, created).await {
            adapter.close_quietly().await;
            return Err(self.creation_failed(&identity, e.into()));
        }

        let execution = match self.build_execution(&identity) {
            Ok(execution) => execution,
            Err(e) => {
                adapter.teardown(&topology, created).await;
                adapter.close_quietly().await;
                return Err(self.creation_failed(&identity, e));
            }
        };

        let handle = reservation.commit(WorkerHandle::new(
            identity.clone(),
            topology.clone(),
            execution,
            Arc::clone(&channel),
        ));

        if let Some(unit) = handle.unit() {
            if let Err(e) = unit.start() {
                self.unwind_registered(&handle, &adapter, created).await;
                return Err(self.creation_failed(&identity, e.into()));
            }
        }

        let stream = match adapter.consume(&topology).await {
            Ok(stream) => stream,
            Err(e) => {
                self.unwind_registered(&handle, &adapter, created).await;
                return Err(self.creation_failed(&identity, e.into()));
            }
        };

        let consumer = tokio::spawn(consume_deliveries(
            Arc::clone(&self.router),
            Arc::downgrade(&handle),
            channel,
            stream,
            identity.clone(),
        ));
        handle.attach_consumer(consumer);

        log_worker_operation(
            "create_worker",
            identity.as_str(),
            "success",
            Some(&format!(
                "mode={} queue={} exchange={}",
                handle.mode(),
                topology.queue,
                topology.exchange
            )),
        );
        Ok(handle.info())
    }

    /// Stop a worker without waiting for its unit to finish
    pub async fn remove_worker(&self, id: &str) -> Result<()> {
        let (_, closed) = self.detach(id).await?;
        closed.map_err(WorkerHostError::from)
    }

    /// Remove a worker and wait until its unit has stopped.
    ///
    /// A hung logic body delays this indefinitely; callers apply their own timeout.
    pub async fn remove_worker_and_wait(&self, id: &str) -> Result<()> {
        let (handle, closed) = self.detach(id).await?;
        if let Some(unit) = handle.unit() {
            unit.wait_stopped().await;
            debug!(worker_id = %id, "Worker unit stopped");
        }
        closed.map_err(WorkerHostError::from)
    }

    /// Remove every live worker and wait for all units; returns how many were removed
    pub async fn shutdown(&self) -> usize {
        let identities = self.registry.identities();
        info!(workers = identities.len(), "Shutting down workers");

        let mut removed = 0;
        for identity in identities {
            match self.remove_worker_and_wait(identity.as_str()).await {
                Ok(()) => removed += 1,
                Err(WorkerHostError::NotFound { .. }) => {}
                Err(e) => {
                    removed += 1;
                    log_error(
                        "lifecycle_manager",
                        "shutdown",
                        &e.to_string(),
                        Some(identity.as_str()),
                    );
                }
            }
        }

        info!(removed, "Worker shutdown complete");
        removed
    }

    /// Live workers, sorted by identity
    pub fn workers(&self) -> Vec<WorkerInfo> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|(_, handle)| handle.info())
            .collect()
    }

    pub fn worker(&self, id: &str) -> Option<WorkerInfo> {
        self.registry.get(id).map(|handle| handle.info())
    }

    pub fn worker_count(&self) -> usize {
        self.registry.count()
    }

    fn build_execution(&self, identity: &WorkerIdentity) -> Result<WorkerExecution> {
        let module = &self.config.execution.logic;
        match self.config.execution.mode {
            ExecutionMode::Dedicated => {
                let logic = self.loader.load(module, identity)?;
                let unit = WorkerExecutionUnit::new(
                    identity.clone(),
                    logic,
                    self.config.execution.inbox_capacity,
                );
                Ok(WorkerExecution::Dedicated(Arc::new(unit)))
            }
            ExecutionMode::Pooled => {
                let factory = self.loader.factory(module)?;
                Ok(WorkerExecution::Pooled(factory))
            }
        }
    }

    /// Undo a committed registration whose creation did not complete
    async fn unwind_registered(
        &self,
        handle: &Arc<WorkerHandle>,
        adapter: &BrokerTopologyAdapter,
        created: CreatedObjects,
    ) {
        if let Some(unit) = handle.unit() {
            unit.stop();
        }
        // A concurrent removal may already have released the identity
        if self.registry.remove_exact(handle.identity().as_str(), handle) {
            adapter.teardown(handle.topology(), created).await;
        }
        adapter.close_quietly().await;
    }

    fn creation_failed(&self, identity: &WorkerIdentity, error: WorkerHostError) -> WorkerHostError {
        log_error(
            "lifecycle_manager",
            "create_worker",
            &error.to_string(),
            Some(identity.as_str()),
        );
        error
    }

    /// Hide, stop and disconnect a worker, then release its identity
    async fn detach(
        &self,
        id: &str,
    ) -> Result<(Arc<WorkerHandle>, std::result::Result<(), BrokerError>)> {
        let handle = self.registry.begin_removal(id)?;

        if let Some(unit) = handle.unit() {
            unit.stop();
        }

        let closed = handle.channel().close().await;
        if let Err(e) = &closed {
            log_error("lifecycle_manager", "remove_worker", &e.to_string(), Some(id));
        }
        handle.abort_consumer();
        self.registry.remove_exact(id, &handle);

        log_worker_operation(
            "remove_worker",
            id,
            if closed.is_ok() { "success" } else { "channel_close_failed" },
            None,
        );
        Ok((handle, closed))
    }
}

/// Pump one worker's delivery stream into the router until it ends
async fn consume_deliveries(
    router: Arc<MessageRouter>,
    handle: Weak<WorkerHandle>,
    channel: Arc<dyn BrokerChannel>,
    mut stream: DeliveryStream,
    identity: WorkerIdentity,
) {
    debug!(worker_id = %identity, "Consumer task started");

    while let Some(item) = stream.next().await {
        match item {
            Ok(delivery) => {
                router.route(delivery, channel.as_ref()).await;
            }
            Err(e) => {
                error!(
                    worker_id = %identity,
                    error = %e,
                    "Delivery stream failed; worker consumption degraded"
                );
                if let Some(handle) = handle.upgrade() {
                    handle.mark_degraded();
                }
                return;
            }
        }
    }

    debug!(worker_id = %identity, "Consumer task finished");
}
