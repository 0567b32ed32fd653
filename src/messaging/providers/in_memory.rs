//! # In-Memory Broker
//!
//! Thread-safe in-process broker implementing [`BrokerConnection`] and
//! [`BrokerChannel`] for tests and local development.
//!
//! ## Features
//!
//! - **Routing**: default, direct, fanout, topic (exact and `#`) and headers exchanges
//! - **Per-channel delivery tags**: unacked deliveries return to their queue when
//!   the channel closes, like an AMQP broker
//! - **Ack ledger**: every ack/nack is recorded for assertions
//! - **Failure injection**: any operation can be made to fail on demand

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::BrokerArguments;
use crate::messaging::broker::{
    BrokerChannel, BrokerConnection, DeliveryStream, ExchangeKind, QosSettings, QueueFlags,
};
use crate::messaging::errors::BrokerError;
use crate::messaging::message::Delivery;

/// Broker operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerOperation {
    CreateChannel,
    DeclareExchange,
    DeclareQueue,
    SetQos,
    BindQueue,
    Consume,
    Ack,
    Nack,
    DeleteQueue,
    DeleteExchange,
    Close,
}

/// Declared queue properties
#[derive(Debug, Clone, PartialEq)]
pub struct QueueInfo {
    pub flags: QueueFlags,
    pub arguments: BrokerArguments,
}

/// One acknowledgment decision observed by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckRecord {
    Ack { channel: u64, delivery_tag: u64 },
    Nack { channel: u64, delivery_tag: u64, requeue: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    queue: String,
    exchange: String,
    routing_key: String,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    data: Vec<u8>,
    redelivered: bool,
}

struct ConsumerSlot {
    channel_id: u64,
    auto_ack: bool,
    sender: mpsc::UnboundedSender<Result<Delivery, BrokerError>>,
}

struct QueueState {
    info: QueueInfo,
    consumers: Vec<ConsumerSlot>,
    pending: VecDeque<StoredMessage>,
    next_consumer: usize,
}

#[derive(Default)]
struct ChannelState {
    next_tag: u64,
    unacked: HashMap<u64, (String, StoredMessage)>,
}

struct BrokerState {
    connected: bool,
    next_channel_id: u64,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    channels: HashMap<u64, ChannelState>,
    ledger: Vec<AckRecord>,
    qos_history: Vec<QosSettings>,
    failures: HashSet<BrokerOperation>,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            connected: true,
            next_channel_id: 1,
            exchanges: HashMap::new(),
            queues: HashMap::new(),
            bindings: Vec::new(),
            channels: HashMap::new(),
            ledger: Vec::new(),
            qos_history: Vec::new(),
            failures: HashSet::new(),
        }
    }

    fn check(&self, op: BrokerOperation, subject: &str) -> Result<(), BrokerError> {
        if !self.failures.contains(&op) {
            return Ok(());
        }
        let message = format!("injected {op:?} failure");
        Err(match op {
            BrokerOperation::CreateChannel => BrokerError::channel_creation(message),
            BrokerOperation::DeclareExchange => BrokerError::exchange_declare(subject, message),
            BrokerOperation::DeclareQueue => BrokerError::queue_declare(subject, message),
            BrokerOperation::SetQos => BrokerError::qos(message),
            BrokerOperation::BindQueue => BrokerError::queue_bind(subject, "", "", message),
            BrokerOperation::Consume => BrokerError::consume(subject, message),
            BrokerOperation::Ack => BrokerError::ack(subject.parse().unwrap_or(0), message),
            BrokerOperation::Nack => BrokerError::nack(subject.parse().unwrap_or(0), message),
            BrokerOperation::DeleteQueue | BrokerOperation::DeleteExchange => {
                BrokerError::delete(subject, message)
            }
            BrokerOperation::Close => BrokerError::channel_close(message),
        })
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        if exchange.is_empty() {
            return if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            };
        }

        let Some(kind) = self.exchanges.get(exchange) else {
            return Vec::new();
        };

        let mut targets: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind {
                ExchangeKind::Direct => b.routing_key == routing_key,
                ExchangeKind::Topic => b.routing_key == routing_key || b.routing_key == "#",
                ExchangeKind::Fanout | ExchangeKind::Headers | ExchangeKind::Custom(_) => true,
            })
            .map(|b| b.queue.clone())
            .collect();
        targets.dedup();
        targets
    }

    fn enqueue(&mut self, queue_name: &str, message: StoredMessage) {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };

        while !queue.consumers.is_empty() {
            let index = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = index + 1;

            let (channel_id, auto_ack) = {
                let slot = &queue.consumers[index];
                (slot.channel_id, slot.auto_ack)
            };
            let channel = self.channels.entry(channel_id).or_default();
            channel.next_tag += 1;
            let tag = channel.next_tag;

            let delivery = Delivery::new(tag, message.data.clone())
                .with_route(message.exchange.clone(), message.routing_key.clone())
                .with_redelivered(message.redelivered);

            match queue.consumers[index].sender.send(Ok(delivery)) {
                Ok(()) => {
                    if !auto_ack {
                        channel
                            .unacked
                            .insert(tag, (queue_name.to_string(), message));
                    }
                    return;
                }
                Err(_) => {
                    queue.consumers.remove(index);
                }
            }
        }

        queue.pending.push_back(message);
    }

    fn drain_pending(&mut self, queue_name: &str) {
        let pending: Vec<StoredMessage> = match self.queues.get_mut(queue_name) {
            Some(queue) => queue.pending.drain(..).collect(),
            None => return,
        };
        for message in pending {
            self.enqueue(queue_name, message);
        }
    }

    fn take_unacked(&mut self, channel_id: u64, tag: u64) -> Option<(String, StoredMessage)> {
        self.channels
            .get_mut(&channel_id)
            .and_then(|c| c.unacked.remove(&tag))
    }
}

/// In-memory broker connection
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryBroker")
            .field("exchanges", &state.exchanges.len())
            .field("queues", &state.queues.len())
            .field("channels", &state.channels.len())
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new())),
        }
    }

    /// Publish a payload through an exchange; returns the number of queues it reached
    pub fn publish(&self, exchange: &str, routing_key: &str, data: impl Into<Vec<u8>>) -> usize {
        let mut state = self.state.lock();
        let data = data.into();
        let targets = state.route(exchange, routing_key);

        for queue in &targets {
            state.enqueue(
                queue,
                StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    data: data.clone(),
                    redelivered: false,
                },
            );
        }
        targets.len()
    }

    /// Make every future call of `op` fail
    pub fn fail_on(&self, op: BrokerOperation) {
        self.state.lock().failures.insert(op);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Simulate a dropped connection
    pub fn disconnect(&self) {
        self.state.lock().connected = false;
    }

    /// Fail every consumer stream of `queue` and drop the consumers, like a
    /// broker-side consumer cancellation. Returns how many streams were failed.
    pub fn interrupt_consumers(&self, queue: &str, reason: &str) -> usize {
        let mut state = self.state.lock();
        let Some(q) = state.queues.get_mut(queue) else {
            return 0;
        };
        let mut interrupted = 0;
        for slot in q.consumers.drain(..) {
            if slot
                .sender
                .send(Err(BrokerError::delivery_stream(queue, reason)))
                .is_ok()
            {
                interrupted += 1;
            }
        }
        interrupted
    }

    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.state.lock().exchanges.get(name).cloned()
    }

    pub fn queue_info(&self, name: &str) -> Option<QueueInfo> {
        self.state.lock().queues.get(name).map(|q| q.info.clone())
    }

    pub fn has_binding(&self, queue: &str, exchange: &str, routing_key: &str) -> bool {
        self.state.lock().bindings.iter().any(|b| {
            b.queue == queue && b.exchange == exchange && b.routing_key == routing_key
        })
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or(0)
    }

    pub fn pending_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    /// Deliveries handed to consumers but neither acked nor nacked
    pub fn unacked_count(&self) -> usize {
        self.state
            .lock()
            .channels
            .values()
            .map(|c| c.unacked.len())
            .sum()
    }

    pub fn ledger(&self) -> Vec<AckRecord> {
        self.state.lock().ledger.clone()
    }

    pub fn qos_history(&self) -> Vec<QosSettings> {
        self.state.lock().qos_history.clone()
    }

    pub fn open_channels(&self) -> usize {
        self.state.lock().channels.len()
    }
}

#[async_trait]
impl BrokerConnection for InMemoryBroker {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(BrokerError::connection("in-memory broker is disconnected"));
        }
        state.check(BrokerOperation::CreateChannel, "")?;

        let id = state.next_channel_id;
        state.next_channel_id += 1;
        state.channels.insert(id, ChannelState::default());

        Ok(Arc::new(InMemoryChannel {
            id,
            state: Arc::clone(&self.state),
            open: AtomicBool::new(true),
        }))
    }

    async fn queue_exists(&self, name: &str) -> Result<bool, BrokerError> {
        let state = self.state.lock();
        if !state.connected {
            return Err(BrokerError::connection("in-memory broker is disconnected"));
        }
        Ok(state.queues.contains_key(name))
    }

    async fn exchange_exists(&self, name: &str) -> Result<bool, BrokerError> {
        let state = self.state.lock();
        if !state.connected {
            return Err(BrokerError::connection("in-memory broker is disconnected"));
        }
        Ok(state.exchanges.contains_key(name))
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

/// Channel on an [`InMemoryBroker`]
pub struct InMemoryChannel {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
    open: AtomicBool,
}

impl InMemoryChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed)
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: &ExchangeKind) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check(BrokerOperation::DeclareExchange, name)?;

        match state.exchanges.get(name) {
            Some(existing) if existing != kind => Err(BrokerError::exchange_declare(
                name,
                format!("PRECONDITION_FAILED: exchange exists with kind {existing}"),
            )),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(name.to_string(), kind.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(
        &self,
        name: &str,
        flags: QueueFlags,
        arguments: &BrokerArguments,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check(BrokerOperation::DeclareQueue, name)?;

        let info = QueueInfo {
            flags,
            arguments: arguments.clone(),
        };
        match state.queues.get(name) {
            Some(existing) if existing.info != info => Err(BrokerError::queue_declare(
                name,
                "PRECONDITION_FAILED: queue exists with different properties",
            )),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    name.to_string(),
                    QueueState {
                        info,
                        consumers: Vec::new(),
                        pending: VecDeque::new(),
                        next_consumer: 0,
                    },
                );
                Ok(())
            }
        }
    }

    async fn set_qos(&self, qos: QosSettings) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check(BrokerOperation::SetQos, "")?;
        state.qos_history.push(qos);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _arguments: &BrokerArguments,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        if state.failures.contains(&BrokerOperation::BindQueue) {
            return Err(BrokerError::queue_bind(
                queue,
                exchange,
                routing_key,
                "injected BindQueue failure",
            ));
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::queue_bind(queue, exchange, routing_key, "NOT_FOUND: queue"));
        }
        if !state.exchanges.contains_key(exchange) {
            return Err(BrokerError::queue_bind(
                queue,
                exchange,
                routing_key,
                "NOT_FOUND: exchange",
            ));
        }

        let binding = Binding {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !state.bindings.contains(&binding) {
            state.bindings.push(binding);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, auto_ack: bool) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check(BrokerOperation::Consume, queue)?;

        let (sender, mut receiver) = mpsc::unbounded_channel();
        match state.queues.get_mut(queue) {
            Some(q) => q.consumers.push(ConsumerSlot {
                channel_id: self.id,
                auto_ack,
                sender,
            }),
            None => return Err(BrokerError::consume(queue, "NOT_FOUND: queue")),
        }
        state.drain_pending(queue);

        debug!(channel = self.id, queue = %queue, auto_ack, "In-memory consumer registered");
        Ok(futures::stream::poll_fn(move |cx| receiver.poll_recv(cx)).boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check(BrokerOperation::Ack, &delivery_tag.to_string())?;

        if state.take_unacked(self.id, delivery_tag).is_none() {
            return Err(BrokerError::ack(
                delivery_tag,
                "PRECONDITION_FAILED: unknown delivery tag",
            ));
        }
        state.ledger.push(AckRecord::Ack {
            channel: self.id,
            delivery_tag,
        });
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check(BrokerOperation::Nack, &delivery_tag.to_string())?;

        let Some((queue, mut message)) = state.take_unacked(self.id, delivery_tag) else {
            return Err(BrokerError::nack(
                delivery_tag,
                "PRECONDITION_FAILED: unknown delivery tag",
            ));
        };
        state.ledger.push(AckRecord::Nack {
            channel: self.id,
            delivery_tag,
            requeue,
        });
        if requeue {
            message.redelivered = true;
            state.enqueue(&queue, message);
        }
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check(BrokerOperation::DeleteQueue, name)?;

        state.queues.remove(name);
        state.bindings.retain(|b| b.queue != name);
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        state.check(BrokerOperation::DeleteExchange, name)?;

        state.exchanges.remove(name);
        state.bindings.retain(|b| b.exchange != name);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        state.check(BrokerOperation::Close, "")?;
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let mut emptied = Vec::new();
        for (name, queue) in state.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|c| c.channel_id != self.id);
            if before > 0 && queue.consumers.is_empty() && queue.info.flags.auto_delete {
                emptied.push(name.clone());
            }
        }

        let unacked = state
            .channels
            .remove(&self.id)
            .map(|c| c.unacked)
            .unwrap_or_default();
        let mut returned: Vec<(u64, (String, StoredMessage))> = unacked.into_iter().collect();
        returned.sort_by_key(|(tag, _)| *tag);
        for (_, (queue, mut message)) in returned {
            message.redelivered = true;
            state.enqueue(&queue, message);
        }

        for name in emptied {
            state.queues.remove(&name);
            state.bindings.retain(|b| b.queue != name);
        }

        debug!(channel = self.id, "In-memory channel closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}
