//! # Broker Traits
//!
//! The capabilities the worker host needs from a message broker, expressed per
//! channel. Implementations live in [`super::providers`]: `lapin` for RabbitMQ
//! and an in-memory broker for tests and local runs.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::errors::BrokerError;
use super::message::Delivery;
use crate::config::BrokerArguments;

/// Exchange types understood by AMQP brokers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    /// Plugin-provided kinds such as `x-delayed-message`
    Custom(String),
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Fanout => write!(f, "fanout"),
            Self::Topic => write!(f, "topic"),
            Self::Headers => write!(f, "headers"),
            Self::Custom(kind) => f.write_str(kind),
        }
    }
}

impl std::str::FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "direct" => Ok(Self::Direct),
            "fanout" => Ok(Self::Fanout),
            "topic" => Ok(Self::Topic),
            "headers" => Ok(Self::Headers),
            custom if custom.starts_with("x-") => Ok(Self::Custom(trimmed.to_string())),
            _ => Err(format!("Invalid exchange kind: {s}")),
        }
    }
}

/// Queue declaration flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFlags {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

/// Channel quality-of-service settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QosSettings {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

/// Stream of deliveries from one consumer.
///
/// Ends when the channel is closed. An `Err` item means the consumer is degraded.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Creates channels on an established broker connection
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Open a new channel; each worker gets its own
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Whether a queue with this name is currently declared
    async fn queue_exists(&self, name: &str) -> Result<bool, BrokerError>;

    /// Whether an exchange with this name is currently declared
    async fn exchange_exists(&self, name: &str) -> Result<bool, BrokerError>;

    /// Whether the underlying connection is usable
    fn is_connected(&self) -> bool;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Operations on a single broker channel
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    async fn declare_exchange(&self, name: &str, kind: &ExchangeKind) -> Result<(), BrokerError>;

    async fn declare_queue(
        &self,
        name: &str,
        flags: QueueFlags,
        arguments: &BrokerArguments,
    ) -> Result<(), BrokerError>;

    async fn set_qos(&self, qos: QosSettings) -> Result<(), BrokerError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &BrokerArguments,
    ) -> Result<(), BrokerError>;

    /// Start consuming; with `auto_ack` the broker treats deliveries as acked on send
    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<DeliveryStream, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError>;

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError>;

    /// Stop consuming and release the channel
    async fn close(&self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_kind_parsing() {
        assert_eq!("".parse::<ExchangeKind>(), Ok(ExchangeKind::Direct));
        assert_eq!("Topic".parse::<ExchangeKind>(), Ok(ExchangeKind::Topic));
        assert_eq!(
            "x-delayed-message".parse::<ExchangeKind>(),
            Ok(ExchangeKind::Custom("x-delayed-message".to_string()))
        );
        assert!("queue".parse::<ExchangeKind>().is_err());
    }

    #[test]
    fn test_exchange_kind_display_roundtrip() {
        for kind in [
            ExchangeKind::Direct,
            ExchangeKind::Fanout,
            ExchangeKind::Topic,
            ExchangeKind::Headers,
            ExchangeKind::Custom("x-consistent-hash".to_string()),
        ] {
            assert_eq!(kind.to_string().parse::<ExchangeKind>(), Ok(kind));
        }
    }
}
