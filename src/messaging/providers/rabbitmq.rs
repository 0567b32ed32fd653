//! # RabbitMQ Broker
//!
//! RabbitMQ implementation of [`BrokerConnection`] and [`BrokerChannel`] using
//! the `lapin` crate (AMQP 0.9.1).
//!
//! One [`RabbitMqBroker`] holds the process-wide connection; every worker gets
//! its own [`RabbitMqChannel`] so that closing one worker never disturbs another.
//!
//! ## Notes
//!
//! - `basic.qos` in lapin takes no prefetch size; a non-zero configured value is
//!   logged and ignored (RabbitMQ rejects it anyway).
//! - Consumer tags are `worker-host.<queue>.<uuid>`.
//! - Existence checks use a passive declare on a short-lived channel, because
//!   the broker closes the channel when the object is missing.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions,
    QueueDeleteOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ArgumentValue, BrokerArguments, BrokerConfig};
use crate::constants::naming::{CONSUMER_TAG_PREFIX, MAX_AMQP_SHORT_STRING_BYTES};
use crate::constants::REPLY_SUCCESS;
use crate::messaging::broker::{
    BrokerChannel, BrokerConnection, DeliveryStream, ExchangeKind, QosSettings, QueueFlags,
};
use crate::messaging::errors::BrokerError;
use crate::messaging::message::Delivery;

/// Process-wide RabbitMQ connection
#[derive(Debug)]
pub struct RabbitMqBroker {
    connection: Connection,
    config: BrokerConfig,
}

impl RabbitMqBroker {
    /// Connect to the broker named in configuration
    pub async fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let connection = Connection::connect(
            &config.url,
            ConnectionProperties::default()
                .with_connection_name(config.connection_name.clone().into()),
        )
        .await
        .map_err(|e| {
            BrokerError::connection(format!(
                "RabbitMQ connection to {} failed: {}",
                config.url_redacted(),
                e
            ))
        })?;

        info!(
            broker = %config.url_redacted(),
            connection_name = %config.connection_name,
            "Connected to RabbitMQ"
        );

        Ok(Self {
            connection,
            config: config.clone(),
        })
    }

    /// Connection URL with credentials removed
    pub fn url_redacted(&self) -> String {
        self.config.url_redacted()
    }

    /// Close the connection after all channels are gone
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection
            .close(REPLY_SUCCESS, "worker host shutting down")
            .await
            .map_err(|e| BrokerError::connection(format!("Connection close failed: {e}")))
    }

    async fn inspection_channel(&self) -> Result<Channel, BrokerError> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::channel_creation(e.to_string()))
    }
}

#[async_trait]
impl BrokerConnection for RabbitMqBroker {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::channel_creation(e.to_string()))?;

        debug!(channel_id = channel.id(), "RabbitMQ channel opened");
        Ok(Arc::new(RabbitMqChannel { channel }))
    }

    async fn queue_exists(&self, name: &str) -> Result<bool, BrokerError> {
        let channel = self.inspection_channel().await?;
        let declared = channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ());
        passive_declare_outcome(&channel, declared)
            .await
            .map_err(|e| BrokerError::queue_declare(name, e.to_string()))
    }

    async fn exchange_exists(&self, name: &str) -> Result<bool, BrokerError> {
        let channel = self.inspection_channel().await?;
        let declared = channel
            .exchange_declare(
                name,
                lapin::ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;
        passive_declare_outcome(&channel, declared)
            .await
            .map_err(|e| BrokerError::exchange_declare(name, e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}

/// Map a passive declare to existence; the inspection channel is closed either way
async fn passive_declare_outcome(
    channel: &Channel,
    declared: Result<(), lapin::Error>,
) -> Result<bool, lapin::Error> {
    match declared {
        Ok(()) => {
            if let Err(e) = channel.close(REPLY_SUCCESS, "existence check").await {
                debug!(channel_id = channel.id(), error = %e, "Inspection channel close failed");
            }
            Ok(true)
        }
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_not_found(error: &lapin::Error) -> bool {
    matches!(
        error,
        lapin::Error::ProtocolError(amqp)
            if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND))
    )
}

/// One AMQP channel owned by a single worker
#[derive(Debug, Clone)]
pub struct RabbitMqChannel {
    channel: Channel,
}

impl RabbitMqChannel {
    pub fn id(&self) -> u16 {
        self.channel.id()
    }
}

#[async_trait]
impl BrokerChannel for RabbitMqChannel {
    async fn declare_exchange(&self, name: &str, kind: &ExchangeKind) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                name,
                to_lapin_kind(kind),
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::exchange_declare(name, e.to_string()))
    }

    async fn declare_queue(
        &self,
        name: &str,
        flags: QueueFlags,
        arguments: &BrokerArguments,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: flags.durable,
                    exclusive: flags.exclusive,
                    auto_delete: flags.auto_delete,
                    ..Default::default()
                },
                to_field_table(arguments),
            )
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::queue_declare(name, e.to_string()))
    }

    async fn set_qos(&self, qos: QosSettings) -> Result<(), BrokerError> {
        if qos.prefetch_size != 0 {
            warn!(
                prefetch_size = qos.prefetch_size,
                "Prefetch size is not supported by RabbitMQ; ignoring"
            );
        }
        self.channel
            .basic_qos(
                qos.prefetch_count,
                BasicQosOptions {
                    global: qos.global,
                },
            )
            .await
            .map_err(|e| BrokerError::qos(e.to_string()))
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: &BrokerArguments,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                to_field_table(arguments),
            )
            .await
            .map_err(|e| BrokerError::queue_bind(queue, exchange, routing_key, e.to_string()))
    }

    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<DeliveryStream, BrokerError> {
        let tag = consumer_tag(queue);
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_ack: auto_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::consume(queue, e.to_string()))?;

        debug!(queue = %queue, consumer_tag = %tag, auto_ack, "RabbitMQ consumer started");

        let queue = queue.to_string();
        Ok(consumer
            .map(move |item| match item {
                Ok(delivery) => Ok(Delivery::new(delivery.delivery_tag, delivery.data)
                    .with_route(
                        delivery.exchange.as_str(),
                        delivery.routing_key.as_str(),
                    )
                    .with_redelivered(delivery.redelivered)),
                Err(e) => Err(BrokerError::delivery_stream(&queue, e.to_string())),
            })
            .boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::ack(delivery_tag, e.to_string()))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::nack(delivery_tag, e.to_string()))
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_delete(name, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::delete(name, e.to_string()))
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.channel
            .exchange_delete(name, ExchangeDeleteOptions::default())
            .await
            .map_err(|e| BrokerError::delete(name, e.to_string()))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.channel.status().connected() {
            return Ok(());
        }
        self.channel
            .close(REPLY_SUCCESS, "worker removed")
            .await
            .map_err(|e| BrokerError::channel_close(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

fn to_lapin_kind(kind: &ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        ExchangeKind::Custom(name) => lapin::ExchangeKind::Custom(name.clone()),
    }
}

fn to_amqp_value(value: &ArgumentValue) -> AMQPValue {
    match value {
        ArgumentValue::Bool(b) => AMQPValue::Boolean(*b),
        ArgumentValue::Int(i) => AMQPValue::LongInt(*i),
        ArgumentValue::Float(f) => AMQPValue::Double(*f),
        ArgumentValue::String(s) => AMQPValue::LongString(s.clone().into()),
    }
}

fn to_field_table(arguments: &BrokerArguments) -> FieldTable {
    let mut table = FieldTable::default();
    for (key, value) in arguments.iter() {
        table.insert(key.clone().into(), to_amqp_value(value));
    }
    table
}

/// Unique consumer tag within the AMQP short-string limit
fn consumer_tag(queue: &str) -> String {
    let id = Uuid::new_v4();
    let tag = format!("{CONSUMER_TAG_PREFIX}.{queue}.{id}");
    if tag.len() <= MAX_AMQP_SHORT_STRING_BYTES {
        tag
    } else {
        format!("{CONSUMER_TAG_PREFIX}.{id}")
    }
}
