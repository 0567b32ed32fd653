//! # Message Router
//!
//! Delivery handler shared by every worker's consumer task: decode, resolve the
//! target worker from the message itself, hand off to its execution path, then
//! acknowledge on the delivery's own channel.
//!
//! ## Acknowledgment Policy
//!
//! Unless the queue is consumed with auto-ack, every delivery is settled exactly
//! once:
//!
//! | Outcome | Settlement |
//! |---------|------------|
//! | Handed off (unit accepted or transient submitted) | `ack` |
//! | Payload could not be decoded | `nack`, no requeue |
//! | No live worker for the target identity | `nack`, no requeue |
//! | Unit no longer running | `nack`, no requeue |
//! | Unit inbox full | `nack`, requeue |
//!
//! The ack is a receipt, not a completion guarantee: a message acked and then
//! lost to a crash is not redelivered. Ack and nack failures are logged and
//! counted and never stop consumption.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::ExecutionMode;
use crate::execution::{ExecutionState, SignalOutcome, TransientExecutionPath};
use crate::messaging::{BrokerChannel, Delivery, InboundMessage};
use crate::registry::WorkerRegistry;
use crate::worker::WorkerExecution;

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the worker's execution path
    Dispatched { worker_id: String, mode: ExecutionMode },
    /// Body was not a valid message
    DecodeFailure,
    /// No live worker has the message's target identity
    Unroutable { target: String },
    /// The worker exists but did not take the message
    Rejected {
        worker_id: String,
        reason: RejectReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotRunning(ExecutionState),
    InboxFull,
}

impl RejectReason {
    /// Whether the broker should redeliver the message later
    pub fn requeue(&self) -> bool {
        matches!(self, Self::InboxFull)
    }
}

#[derive(Debug, Default)]
struct RouterCounters {
    received: AtomicU64,
    dispatched: AtomicU64,
    decode_failures: AtomicU64,
    unroutable: AtomicU64,
    rejected: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    ack_failures: AtomicU64,
}

/// Point-in-time router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub received: u64,
    pub dispatched: u64,
    pub decode_failures: u64,
    pub unroutable: u64,
    pub rejected: u64,
    pub acked: u64,
    pub nacked: u64,
    pub ack_failures: u64,
}

/// Routes deliveries to workers and settles them with the broker
pub struct MessageRouter {
    registry: Arc<WorkerRegistry>,
    transient: TransientExecutionPath,
    auto_ack: bool,
    counters: RouterCounters,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("auto_ack", &self.auto_ack)
            .field("stats", &self.stats())
            .finish()
    }
}

impl MessageRouter {
    pub fn new(registry: Arc<WorkerRegistry>, auto_ack: bool) -> Self {
        Self {
            registry,
            transient: TransientExecutionPath::new(),
            auto_ack,
            counters: RouterCounters::default(),
        }
    }

    /// Transient path used for pooled workers
    pub fn transient(&self) -> &TransientExecutionPath {
        &self.transient
    }

    /// Handle one delivery received on `channel`
    pub async fn route(&self, delivery: Delivery, channel: &dyn BrokerChannel) -> RouteOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let tag = delivery.delivery_tag;

        let message = match InboundMessage::from_bytes(&delivery.data) {
            Ok(message) => message,
            Err(e) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    delivery_tag = tag,
                    queue = %delivery.routing_key,
                    redelivered = delivery.redelivered,
                    error = %e,
                    "Dropping undecodable delivery"
                );
                self.nack(channel, tag, false).await;
                return RouteOutcome::DecodeFailure;
            }
        };

        let Some(handle) = self.registry.get(&message.id) else {
            self.counters.unroutable.fetch_add(1, Ordering::Relaxed);
            warn!(
                delivery_tag = tag,
                worker_id = %message.id,
                "No live worker for delivery"
            );
            let target = message.id;
            self.nack(channel, tag, false).await;
            return RouteOutcome::Unroutable { target };
        };

        let worker_id = handle.identity().to_string();
        match handle.execution() {
            WorkerExecution::Dedicated(unit) => match unit.signal(message) {
                SignalOutcome::Accepted => {}
                SignalOutcome::NotRunning(state) => {
                    return self
                        .reject(channel, tag, worker_id, RejectReason::NotRunning(state))
                        .await;
                }
                SignalOutcome::InboxFull => {
                    return self
                        .reject(channel, tag, worker_id, RejectReason::InboxFull)
                        .await;
                }
            },
            WorkerExecution::Pooled(factory) => {
                self.transient
                    .submit(handle.identity().clone(), Arc::clone(factory), message);
            }
        }

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(delivery_tag = tag, worker_id = %worker_id, mode = %handle.mode(), "Delivery dispatched");
        self.ack(channel, tag).await;

        RouteOutcome::Dispatched {
            worker_id,
            mode: handle.mode(),
        }
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            received: c.received.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            unroutable: c.unroutable.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            acked: c.acked.load(Ordering::Relaxed),
            nacked: c.nacked.load(Ordering::Relaxed),
            ack_failures: c.ack_failures.load(Ordering::Relaxed),
        }
    }

    async fn reject(
        &self,
        channel: &dyn BrokerChannel,
        tag: u64,
        worker_id: String,
        reason: RejectReason,
    ) -> RouteOutcome {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(
            delivery_tag = tag,
            worker_id = %worker_id,
            reason = ?reason,
            requeue = reason.requeue(),
            "Worker did not accept delivery"
        );
        self.nack(channel, tag, reason.requeue()).await;
        RouteOutcome::Rejected { worker_id, reason }
    }

    async fn ack(&self, channel: &dyn BrokerChannel, tag: u64) {
        if self.auto_ack {
            return;
        }
        match channel.ack(tag).await {
            Ok(()) => {
                self.counters.acked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.ack_failures.fetch_add(1, Ordering::Relaxed);
                error!(delivery_tag = tag, error = %e, "Failed to ack delivery");
            }
        }
    }

    async fn nack(&self, channel: &dyn BrokerChannel, tag: u64, requeue: bool) {
        if self.auto_ack {
            return;
        }
        match channel.nack(tag, requeue).await {
            Ok(()) => {
                self.counters.nacked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.counters.ack_failures.fetch_add(1, Ordering::Relaxed);
                error!(delivery_tag = tag, requeue, error = %e, "Failed to nack delivery");
            }
        }
    }
}
