//! Top-level error type of the worker host admin surface.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::execution::ExecutionError;
use crate::messaging::BrokerError;
use crate::registry::RegistryError;
use crate::worker::IdentityError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerHostError {
    #[error("Worker capacity of {limit} reached")]
    CapacityExceeded { limit: usize },

    #[error("Worker already exists: {id}")]
    DuplicateWorker { id: String },

    #[error("Worker not found: {id}")]
    NotFound { id: String },

    #[error("Invalid worker identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Worker logic '{module}' could not be loaded: {message}")]
    LogicLoad { module: String, message: String },

    #[error("Execution error: {0}")]
    Execution(ExecutionError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl WorkerHostError {
    /// Whether retrying the same call later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. } | Self::Broker(_))
    }
}

impl From<RegistryError> for WorkerHostError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyExists { id } => Self::DuplicateWorker { id },
            RegistryError::NotFound { id } => Self::NotFound { id },
            RegistryError::CapacityExceeded { limit } => Self::CapacityExceeded { limit },
        }
    }
}

impl From<ExecutionError> for WorkerHostError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::LogicLoad { module, message } => Self::LogicLoad { module, message },
            other => Self::Execution(other),
        }
    }
}

impl From<ConfigurationError> for WorkerHostError {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkerHostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_errors_map_to_admin_kinds() {
        let err: WorkerHostError = RegistryError::AlreadyExists { id: "w1".into() }.into();
        assert_eq!(err, WorkerHostError::DuplicateWorker { id: "w1".into() });

        let err: WorkerHostError = RegistryError::CapacityExceeded { limit: 2 }.into();
        assert_eq!(err.to_string(), "Worker capacity of 2 reached");
        assert!(err.is_transient());
    }

    #[test]
    fn test_logic_load_is_lifted() {
        let err: WorkerHostError = ExecutionError::logic_load("custom", "missing").into();
        assert!(matches!(err, WorkerHostError::LogicLoad { ref module, .. } if module == "custom"));
        assert!(!err.is_transient());
    }
}
