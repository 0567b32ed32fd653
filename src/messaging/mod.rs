//! # Messaging Module
//!
//! Broker abstraction for the worker host: per-channel broker operations,
//! worker topology provisioning and the wire message format.

pub mod broker;
pub mod errors;
pub mod message;
pub mod providers;
pub mod topology;

pub use broker::{
    BrokerChannel, BrokerConnection, DeliveryStream, ExchangeKind, QosSettings, QueueFlags,
};
pub use errors::{BrokerError, BrokerResult};
pub use message::{Delivery, InboundMessage};
pub use topology::{BrokerTopologyAdapter, CreatedObjects, WorkerTopology};
