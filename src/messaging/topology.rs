//! # Broker Topology Adapter
//!
//! Translates [`WorkerHostConfig`] into the broker calls that provision a
//! worker's exchange, queue and binding on its own channel. Provisioning is
//! all-or-nothing for what it creates: objects that were absent before a failing
//! step are deleted again before the error is returned. An exchange or queue that
//! already existed, such as one retained after its worker was removed, is left
//! in place with its messages.

use std::sync::Arc;
use tracing::{debug, warn};

use super::broker::{
    BrokerChannel, BrokerConnection, DeliveryStream, ExchangeKind, QosSettings, QueueFlags,
};
use super::errors::BrokerError;
use crate::config::{BrokerArguments, WorkerHostConfig};
use crate::worker::WorkerIdentity;

/// Broker names provisioned for one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTopology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl WorkerTopology {
    pub fn for_worker(identity: &WorkerIdentity) -> Self {
        Self {
            exchange: identity.exchange_name(),
            queue: identity.queue_name().to_string(),
            routing_key: identity.routing_key(),
        }
    }
}

/// Which of a worker's broker objects did not exist before provisioning.
///
/// Rollback deletes only these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreatedObjects {
    pub exchange: bool,
    pub queue: bool,
}

impl CreatedObjects {
    /// Neither object existed beforehand
    pub const ALL: Self = Self {
        exchange: true,
        queue: true,
    };

    /// Check which of the topology's objects provisioning is about to create
    pub async fn survey(
        connection: &dyn BrokerConnection,
        topology: &WorkerTopology,
    ) -> Result<Self, BrokerError> {
        Ok(Self {
            exchange: !connection.exchange_exists(&topology.exchange).await?,
            queue: !connection.queue_exists(&topology.queue).await?,
        })
    }
}

/// Per-channel adapter between configuration and broker operations
pub struct BrokerTopologyAdapter {
    channel: Arc<dyn BrokerChannel>,
    exchange_kind: ExchangeKind,
    queue_flags: QueueFlags,
    qos: QosSettings,
    declare_arguments: BrokerArguments,
    bind_arguments: BrokerArguments,
    auto_ack: bool,
}

impl std::fmt::Debug for BrokerTopologyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerTopologyAdapter")
            .field("exchange_kind", &self.exchange_kind)
            .field("queue_flags", &self.queue_flags)
            .field("qos", &self.qos)
            .field("auto_ack", &self.auto_ack)
            .finish_non_exhaustive()
    }
}

impl BrokerTopologyAdapter {
    pub fn new(channel: Arc<dyn BrokerChannel>, config: &WorkerHostConfig) -> Self {
        Self {
            channel,
            exchange_kind: config.channel.exchange_kind(),
            queue_flags: QueueFlags {
                durable: config.queue.durable,
                exclusive: config.queue.exclusive,
                auto_delete: config.queue.auto_delete,
            },
            qos: QosSettings {
                prefetch_size: config.channel.qos.prefetch_size,
                prefetch_count: config.channel.qos.prefetch_count,
                global: config.channel.qos.global,
            },
            declare_arguments: config.queue.declare_arguments(),
            bind_arguments: config.queue.bind_arguments(),
            auto_ack: config.queue.auto_ack,
        }
    }

    pub fn channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.channel
    }

    /// Declare exchange and queue, apply QoS, bind.
    ///
    /// On failure the objects marked in `created` that were already declared are
    /// deleted before returning.
    pub async fn provision(
        &self,
        topology: &WorkerTopology,
        created: CreatedObjects,
    ) -> Result<(), BrokerError> {
        self.channel
            .declare_exchange(&topology.exchange, &self.exchange_kind)
            .await?;

        let declared_queue = self
            .channel
            .declare_queue(&topology.queue, self.queue_flags, &self.declare_arguments)
            .await;
        if let Err(e) = declared_queue {
            if created.exchange {
                self.delete_exchange(&topology.exchange).await;
            }
            return Err(e);
        }

        let bound = async {
            self.channel.set_qos(self.qos).await?;
            self.channel
                .bind_queue(
                    &topology.queue,
                    &topology.exchange,
                    &topology.routing_key,
                    &self.bind_arguments,
                )
                .await
        }
        .await;
        if let Err(e) = bound {
            self.teardown(topology, created).await;
            return Err(e);
        }

        debug!(
            exchange = %topology.exchange,
            queue = %topology.queue,
            routing_key = %topology.routing_key,
            kind = %self.exchange_kind,
            new_exchange = created.exchange,
            new_queue = created.queue,
            "Topology provisioned"
        );
        Ok(())
    }

    /// Start consuming the worker's queue with the configured ack mode
    pub async fn consume(&self, topology: &WorkerTopology) -> Result<DeliveryStream, BrokerError> {
        self.channel.consume(&topology.queue, self.auto_ack).await
    }

    /// Best-effort removal of the queue and exchange a creation attempt declared
    pub async fn teardown(&self, topology: &WorkerTopology, created: CreatedObjects) {
        if created.queue {
            if let Err(e) = self.channel.delete_queue(&topology.queue).await {
                warn!(queue = %topology.queue, error = %e, "Failed to delete queue during rollback");
            }
        }
        if created.exchange {
            self.delete_exchange(&topology.exchange).await;
        }
    }

    async fn delete_exchange(&self, exchange: &str) {
        if let Err(e) = self.channel.delete_exchange(exchange).await {
            warn!(exchange = %exchange, error = %e, "Failed to delete exchange during rollback");
        }
    }

    /// Close the underlying channel, logging rather than returning failures
    pub async fn close_quietly(&self) {
        if let Err(e) = self.channel.close().await {
            warn!(error = %e, "Failed to close channel");
        }
    }
}
