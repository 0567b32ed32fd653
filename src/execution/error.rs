//! Execution error types

use thiserror::Error;

use super::state::ExecutionState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Invalid execution transition for {worker_id}: {from} -> {to}")]
    InvalidTransition {
        worker_id: String,
        from: ExecutionState,
        to: ExecutionState,
    },

    #[error("Worker logic '{module}' could not be loaded: {message}")]
    LogicLoad { module: String, message: String },

    #[error("Worker logic failed: {message}")]
    Logic { message: String },
}

impl ExecutionError {
    pub fn logic_load(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LogicLoad {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Self::Logic {
            message: message.into(),
        }
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
