//! # Worker Logic
//!
//! The processing code a worker runs for each message, and the loader that
//! resolves a configured module name to a factory producing instances of it.
//!
//! ## Architecture
//!
//! ```text
//! LogicLoader ──name──→ WorkerLogicFactory ──create(identity)──→ Box<dyn WorkerLogic>
//!                                                                  │
//!                     dedicated: one instance owned by the unit ◄──┤
//!                     pooled: one instance per message         ◄──┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use worker_host::execution::{LogicLoader, WorkerLogic, ExecutionResult};
//! use worker_host::messaging::InboundMessage;
//! use async_trait::async_trait;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl WorkerLogic for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn handle(&mut self, message: InboundMessage) -> ExecutionResult<()> {
//!         println!("{}", message.payload);
//!         Ok(())
//!     }
//! }
//!
//! let loader = LogicLoader::with_builtins();
//! loader.register("echo", |_id| Ok(Box::new(Echo) as Box<dyn WorkerLogic>));
//! assert!(loader.is_available("echo"));
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ExecutionError, ExecutionResult};
use crate::constants::defaults;
use crate::messaging::InboundMessage;
use crate::worker::WorkerIdentity;

/// Processing code for one worker.
///
/// In dedicated mode a single instance handles every message of its worker, one
/// at a time and in arrival order. In pooled mode each message gets a fresh
/// instance.
#[async_trait]
pub trait WorkerLogic: Send + 'static {
    /// Module name for logging
    fn name(&self) -> &str;

    /// Handle one message. Errors are logged and counted by the caller.
    async fn handle(&mut self, message: InboundMessage) -> ExecutionResult<()>;
}

/// Produces worker logic instances
pub trait WorkerLogicFactory: Send + Sync + 'static {
    fn create(&self, identity: &WorkerIdentity) -> ExecutionResult<Box<dyn WorkerLogic>>;
}

impl<F> WorkerLogicFactory for F
where
    F: Fn(&WorkerIdentity) -> ExecutionResult<Box<dyn WorkerLogic>> + Send + Sync + 'static,
{
    fn create(&self, identity: &WorkerIdentity) -> ExecutionResult<Box<dyn WorkerLogic>> {
        self(identity)
    }
}

/// Resolves logic module names to factories
pub struct LogicLoader {
    factories: RwLock<HashMap<String, Arc<dyn WorkerLogicFactory>>>,
}

impl Default for LogicLoader {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for LogicLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicLoader")
            .field("modules", &self.available_modules())
            .finish()
    }
}

impl LogicLoader {
    /// Loader with no modules registered
    pub fn empty() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Loader with the built-in `logging` module registered
    pub fn with_builtins() -> Self {
        let loader = Self::empty();
        loader.register(defaults::LOGIC_MODULE, |identity| {
            Ok(Box::new(LoggingLogic::new(identity.clone())) as Box<dyn WorkerLogic>)
        });
        loader
    }

    /// Register or replace a module backed by a closure
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&WorkerIdentity) -> ExecutionResult<Box<dyn WorkerLogic>> + Send + Sync + 'static,
    {
        self.register_factory(name, Arc::new(factory));
    }

    /// Register or replace a module
    pub fn register_factory(&self, name: impl Into<String>, factory: Arc<dyn WorkerLogicFactory>) {
        let name = name.into();
        debug!(module = %name, "Registering worker logic module");
        self.factories.write().insert(name, factory);
    }

    /// Factory for a module
    pub fn factory(&self, name: &str) -> ExecutionResult<Arc<dyn WorkerLogicFactory>> {
        self.factories.read().get(name).cloned().ok_or_else(|| {
            ExecutionError::logic_load(name, "no logic module registered under this name")
        })
    }

    /// Create a fresh instance of a module for a worker
    pub fn load(
        &self,
        name: &str,
        identity: &WorkerIdentity,
    ) -> ExecutionResult<Box<dyn WorkerLogic>> {
        let factory = self.factory(name)?;
        factory.create(identity).map_err(|e| match e {
            load @ ExecutionError::LogicLoad { .. } => load,
            other => ExecutionError::logic_load(name, other.to_string()),
        })
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Sorted module names
    pub fn available_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Built-in logic that logs every message it receives
#[derive(Debug)]
pub struct LoggingLogic {
    worker_id: WorkerIdentity,
    handled: u64,
}

impl LoggingLogic {
    pub fn new(worker_id: WorkerIdentity) -> Self {
        Self {
            worker_id,
            handled: 0,
        }
    }

    pub fn handled(&self) -> u64 {
        self.handled
    }
}

#[async_trait]
impl WorkerLogic for LoggingLogic {
    fn name(&self) -> &str {
        defaults::LOGIC_MODULE
    }

    async fn handle(&mut self, message: InboundMessage) -> ExecutionResult<()> {
        self.handled += 1;
        info!(
            worker_id = %self.worker_id,
            message_id = %message.id,
            sequence = self.handled,
            payload = %message.payload,
            "Worker received message"
        );
        Ok(())
    }
}
