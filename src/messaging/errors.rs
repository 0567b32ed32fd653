//! # Messaging Error Types
//!
//! Structured error handling for broker operations using thiserror.
//! Every variant carries the broker object it concerned so that log lines and
//! admin responses identify the failing queue, exchange or delivery.

use thiserror::Error;

/// Broker operation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Channel creation failed: {message}")]
    ChannelCreation { message: String },

    #[error("Exchange declare failed: {exchange}: {message}")]
    ExchangeDeclare { exchange: String, message: String },

    #[error("Queue declare failed: {queue}: {message}")]
    QueueDeclare { queue: String, message: String },

    #[error("QoS setup failed: {message}")]
    Qos { message: String },

    #[error("Queue bind failed: {queue} -> {exchange} ({routing_key}): {message}")]
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
        message: String,
    },

    #[error("Consume failed: {queue}: {message}")]
    Consume { queue: String, message: String },

    #[error("Delivery stream error: {queue}: {message}")]
    DeliveryStream { queue: String, message: String },

    #[error("Ack failed for delivery {delivery_tag}: {message}")]
    Ack { delivery_tag: u64, message: String },

    #[error("Nack failed for delivery {delivery_tag}: {message}")]
    Nack { delivery_tag: u64, message: String },

    #[error("Delete failed: {name}: {message}")]
    Delete { name: String, message: String },

    #[error("Channel close failed: {message}")]
    ChannelClose { message: String },

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },
}

impl BrokerError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a channel creation error
    pub fn channel_creation(message: impl Into<String>) -> Self {
        Self::ChannelCreation {
            message: message.into(),
        }
    }

    /// Create an exchange declare error
    pub fn exchange_declare(exchange: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExchangeDeclare {
            exchange: exchange.into(),
            message: message.into(),
        }
    }

    /// Create a queue declare error
    pub fn queue_declare(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueueDeclare {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create a QoS error
    pub fn qos(message: impl Into<String>) -> Self {
        Self::Qos {
            message: message.into(),
        }
    }

    /// Create a queue bind error
    pub fn queue_bind(
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueBind {
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            message: message.into(),
        }
    }

    /// Create a consume error
    pub fn consume(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Consume {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create a delivery stream error
    pub fn delivery_stream(queue: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeliveryStream {
            queue: queue.into(),
            message: message.into(),
        }
    }

    /// Create an ack error
    pub fn ack(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Ack {
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create a nack error
    pub fn nack(delivery_tag: u64, message: impl Into<String>) -> Self {
        Self::Nack {
            delivery_tag,
            message: message.into(),
        }
    }

    /// Create a delete error for a queue or exchange
    pub fn delete(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delete {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a channel close error
    pub fn channel_close(message: impl Into<String>) -> Self {
        Self::ChannelClose {
            message: message.into(),
        }
    }

    /// Create a message serialization error
    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    /// Create a message deserialization error
    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    /// Whether the error happened while provisioning topology
    pub fn is_topology_error(&self) -> bool {
        matches!(
            self,
            Self::ExchangeDeclare { .. }
                | Self::QueueDeclare { .. }
                | Self::Qos { .. }
                | Self::QueueBind { .. }
        )
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::message_deserialization(err.to_string())
        } else {
            Self::message_serialization(err.to_string())
        }
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
