//! # Worker Module
//!
//! Identity of a logical worker and the handle bundling its broker channel,
//! consumer task and execution context.

pub mod handle;
pub mod identity;

pub use handle::{WorkerExecution, WorkerHandle, WorkerInfo};
pub use identity::{IdentityError, WorkerIdentity};
