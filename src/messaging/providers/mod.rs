//! Broker provider implementations
//!
//! - [`RabbitMqBroker`]: AMQP 0.9.1 via `lapin`
//! - [`InMemoryBroker`]: in-process broker for tests and local development

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::{AckRecord, BrokerOperation, InMemoryBroker, InMemoryChannel, QueueInfo};
pub use rabbitmq::{RabbitMqBroker, RabbitMqChannel};
