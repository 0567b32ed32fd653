//! # Orchestration Module
//!
//! Worker lifecycle management and delivery routing.
//!
//! ```text
//! create:   WorkerLifecycleManager → BrokerTopologyAdapter → WorkerRegistry → unit start → consume
//! delivery: consumer task → MessageRouter → WorkerRegistry → unit signal | transient submit → ack/nack
//! ```

pub mod lifecycle_manager;
pub mod message_router;

pub use lifecycle_manager::WorkerLifecycleManager;
pub use message_router::{MessageRouter, RejectReason, RouteOutcome, RouterStats};
