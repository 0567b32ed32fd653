#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Worker Host
//!
//! Dynamic pool of independently addressable logical workers on a message broker.
//!
//! ## Overview
//!
//! Each worker is bound to its own queue, runs isolated processing logic, and can
//! be created or removed at runtime. Creating a worker provisions dedicated broker
//! topology for it (exchange `exchange.<id>`, queue `<id>`, routing key
//! `route.<id>`) and attaches a consumer; every inbound message is routed by the
//! target identity it carries to the right execution context and acknowledged on
//! receipt.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Lifecycle manager and message router
//! - [`registry`] - Concurrency-safe worker directory with capacity admission
//! - [`execution`] - Dedicated execution units, transient execution, worker logic
//! - [`messaging`] - Broker traits, topology adapter, RabbitMQ and in-memory providers
//! - [`worker`] - Worker identity and handle
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use worker_host::config::WorkerHostConfig;
//! use worker_host::execution::LogicLoader;
//! use worker_host::messaging::providers::InMemoryBroker;
//! use worker_host::orchestration::WorkerLifecycleManager;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! let manager = WorkerLifecycleManager::new(
//!     Arc::new(WorkerHostConfig::default()),
//!     Arc::new(broker.clone()),
//!     Arc::new(LogicLoader::with_builtins()),
//! );
//!
//! manager.create_worker("w1").await?;
//! broker.publish("exchange.w1", "route.w1", br#"{"id":"w1","payload":{"n":1}}"#.to_vec());
//!
//! manager.remove_worker_and_wait("w1").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod execution;
pub mod logging;
pub mod messaging;
pub mod orchestration;
pub mod registry;
pub mod worker;

pub use config::{ConfigLoader, ExecutionMode, WorkerHostConfig};
pub use error::{Result, WorkerHostError};
pub use orchestration::{MessageRouter, WorkerLifecycleManager};
pub use worker::{WorkerIdentity, WorkerInfo};
