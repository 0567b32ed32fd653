//! # Execution Module
//!
//! How a worker's logic runs once a message has been routed to it.
//!
//! - [`WorkerExecutionUnit`]: dedicated mode, one long-lived loop per worker,
//!   per-worker arrival order preserved
//! - [`TransientExecutionPath`]: pooled mode, a fresh logic instance per message
//!   on the shared runtime, no ordering
//! - [`LogicLoader`]: resolves the configured logic module to a factory

pub mod error;
pub mod logic;
pub mod state;
pub mod transient;
pub mod unit;

pub use error::{ExecutionError, ExecutionResult};
pub use logic::{LoggingLogic, LogicLoader, WorkerLogic, WorkerLogicFactory};
pub use state::ExecutionState;
pub use transient::TransientExecutionPath;
pub use unit::{ExecutionStats, ExecutionStatsSnapshot, SignalOutcome, WorkerExecutionUnit};
