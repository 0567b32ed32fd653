//! # Registry Module
//!
//! In-memory directory of live workers. Rebuilt empty on every process start.

pub mod worker_registry;

pub use worker_registry::{RegistryError, Reservation, WorkerRegistry};
