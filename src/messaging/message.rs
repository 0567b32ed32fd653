//! # Inbound Messages and Deliveries
//!
//! `Delivery` is what a broker channel hands to the consumer: raw bytes plus the
//! tag needed to acknowledge them. `InboundMessage` is the decoded application
//! record the router resolves a worker from.

use serde::{Deserialize, Serialize};

use super::errors::BrokerError;

/// One message instance received from the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Channel-scoped tag used for ack/nack
    pub delivery_tag: u64,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Whether the broker has delivered this message before
    pub redelivered: bool,
    /// Raw payload
    pub data: Vec<u8>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            data: data.into(),
        }
    }

    pub fn with_route(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self.routing_key = routing_key.into();
        self
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }
}

/// Decoded application message.
///
/// The target worker is resolved from `id`, not from the queue the delivery
/// arrived on, so several workers may share one queue. `Id` is accepted as an
/// alias for producers that serialize with Pascal-cased field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Identity of the target worker
    #[serde(alias = "Id")]
    pub id: String,

    /// Application payload handed to the worker logic untouched
    #[serde(default, alias = "Payload")]
    pub payload: serde_json::Value,
}

impl InboundMessage {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Decode a raw delivery body
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BrokerError> {
        serde_json::from_slice(bytes)
            .map_err(|e| BrokerError::message_deserialization(e.to_string()))
    }

    /// Encode for publishing
    pub fn to_bytes(&self) -> Result<Vec<u8>, BrokerError> {
        serde_json::to_vec(self).map_err(|e| BrokerError::message_serialization(e.to_string()))
    }
}
