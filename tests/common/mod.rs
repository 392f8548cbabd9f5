//--------------------------------------------------------------------------------------------------
// TEST SUPPORT
//--------------------------------------------------------------------------------------------------
// In-memory stand-ins for the broker and for WebSocket clients.
//
// | Name           | Description                                                          |
// |----------------|----------------------------------------------------------------------|
// | FakeBroker     | Exchanges, bindings, consumers, acks and dead letters in memory      |
// | FakeChannel    | BrokerChannel over a FakeBroker; closing it drops its consumers      |
// | FakeOpener     | ChannelOpener handing out FakeChannels; can kill the live one        |
// | RecordingSink  | SessionSink that records frames, can be broken or slowed down        |
//--------------------------------------------------------------------------------------------------
#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use notification_bridge::{
    SessionSink,
    domain::SessionError,
};
use parking_lot::Mutex;
use rabbitmq::{
    BrokerChannel, ClosedNotifier, ClosedSignal, ChannelOpener, Declaration, Delivery,
    DeliveryStream, OutboundMessage, RabbitMQError, RetryPolicy, closed_signal,
};
use tokio::{sync::mpsc, time::Instant};

pub const FAST: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(1));

/// A message that left a queue through ack or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    pub queue: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    declared: Vec<Declaration>,
    bindings: Vec<(String, String, String)>,
    consumers: HashMap<String, (u32, mpsc::UnboundedSender<Delivery>)>,
    backlog: HashMap<String, VecDeque<Delivery>>,
    in_flight: HashMap<u64, (u32, String, Delivery)>,
    published: Vec<OutboundMessage>,
    acked: Vec<Settled>,
    dead_lettered: Vec<Settled>,
}

#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
    next_tag: AtomicU64,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Routes `body` like a direct publish to `exchange` with `routing_key`.
    pub fn inject(&self, exchange: &str, routing_key: &str, body: &[u8]) {
        let queues: Vec<String> = self
            .state
            .lock()
            .bindings
            .iter()
            .filter(|(ex, _, key)| ex == exchange && key == routing_key)
            .map(|(_, queue, _)| queue.clone())
            .collect();
        for queue in queues {
            self.enqueue(&queue, routing_key, body.to_vec(), false);
        }
    }

    fn enqueue(&self, queue: &str, routing_key: &str, body: Vec<u8>, redelivered: bool) {
        let delivery = Delivery {
            delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst) + 1,
            routing_key: routing_key.to_owned(),
            redelivered,
            body,
        };
        let mut state = self.state.lock();
        Self::hand_out(&mut state, queue, delivery);
    }

    fn hand_out(state: &mut BrokerState, queue: &str, delivery: Delivery) {
        if let Some((channel_id, tx)) = state.consumers.get(queue) {
            let channel_id = *channel_id;
            if tx.send(delivery.clone()).is_ok() {
                state
                    .in_flight
                    .insert(delivery.delivery_tag, (channel_id, queue.to_owned(), delivery));
                return;
            }
        }
        state
            .backlog
            .entry(queue.to_owned())
            .or_default()
            .push_back(delivery);
    }

    fn consume(&self, channel_id: u32, queue: &str) -> DeliveryStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.consumers.insert(queue.to_owned(), (channel_id, tx));
        let backlog = state.backlog.remove(queue).unwrap_or_default();
        for delivery in backlog {
            Self::hand_out(&mut state, queue, delivery);
        }
        rx
    }

    fn settle(&self, tag: u64, ack: bool) -> Result<(), RabbitMQError> {
        let mut state = self.state.lock();
        let (_, queue, delivery) = state
            .in_flight
            .remove(&tag)
            .ok_or(RabbitMQError::NotDeliveryTag)?;
        let settled = Settled {
            queue,
            body: delivery.body,
        };
        if ack {
            state.acked.push(settled);
        } else {
            state.dead_lettered.push(settled);
        }
        Ok(())
    }

    /// Drops the channel's consumers and requeues what it had not settled.
    fn close_channel(&self, channel_id: u32) {
        let mut state = self.state.lock();
        state.consumers.retain(|_, (id, _)| *id != channel_id);
        let orphaned: Vec<u64> = state
            .in_flight
            .iter()
            .filter(|(_, (id, _, _))| *id == channel_id)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in orphaned {
            if let Some((_, queue, mut delivery)) = state.in_flight.remove(&tag) {
                delivery.redelivered = true;
                state.backlog.entry(queue).or_default().push_back(delivery);
            }
        }
    }

    pub fn has_consumer(&self, queue: &str) -> bool {
        self.state.lock().consumers.contains_key(queue)
    }

    pub fn declared(&self) -> Vec<Declaration> {
        self.state.lock().declared.clone()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().published.clone()
    }

    pub fn acked(&self) -> Vec<Settled> {
        self.state.lock().acked.clone()
    }

    pub fn dead_lettered(&self) -> Vec<Settled> {
        self.state.lock().dead_lettered.clone()
    }
}

#[derive(Clone)]
pub struct FakeChannel {
    id: u32,
    open: Arc<AtomicBool>,
    broker: Arc<FakeBroker>,
}

impl FakeChannel {
    fn ensure_open(&self) -> Result<(), RabbitMQError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RabbitMQError::OpenChannelError(format!("{} is closed", self.label())))
        }
    }
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    fn label(&self) -> String {
        format!("fake-{}", self.id)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn declare(&self, step: &Declaration) -> Result<(), RabbitMQError> {
        self.ensure_open()?;
        let mut state = self.broker.state.lock();
        if let Declaration::Bind {
            queue,
            exchange,
            routing_key,
        } = step
        {
            state
                .bindings
                .push((exchange.clone(), queue.clone(), routing_key.clone()));
        }
        state.declared.push(step.clone());
        Ok(())
    }

    async fn consume(&self, queue: &str, _prefetch: u16) -> Result<DeliveryStream, RabbitMQError> {
        self.ensure_open()?;
        Ok(self.broker.consume(self.id, queue))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), RabbitMQError> {
        self.ensure_open()?;
        self.broker.settle(delivery_tag, true)
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), RabbitMQError> {
        self.ensure_open()?;
        self.broker.settle(delivery_tag, false)
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), RabbitMQError> {
        if !self.is_open() {
            return Err(RabbitMQError::PublishError(format!("{} is closed", self.label())));
        }
        self.broker.state.lock().published.push(message.clone());
        self.broker
            .inject(&message.exchange, &message.routing_key, &message.content);
        Ok(())
    }

    async fn close(self) -> Result<(), RabbitMQError> {
        self.open.store(false, Ordering::SeqCst);
        self.broker.close_channel(self.id);
        Ok(())
    }
}

pub struct FakeOpener {
    broker: Arc<FakeBroker>,
    next_id: AtomicU32,
    live: Mutex<Option<(FakeChannel, ClosedNotifier)>>,
}

impl FakeOpener {
    pub fn new(broker: Arc<FakeBroker>) -> Arc<Self> {
        Arc::new(Self {
            broker,
            next_id: AtomicU32::new(0),
            live: Mutex::new(None),
        })
    }

    pub fn opened(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Closes the live channel the way a server-side channel error would.
    pub fn kill_channel(&self) {
        if let Some((channel, notifier)) = self.live.lock().take() {
            channel.open.store(false, Ordering::SeqCst);
            channel.broker.close_channel(channel.id);
            notifier.notify("CloseChannel { reply_code: 406 }".to_owned());
        }
    }
}

#[async_trait]
impl ChannelOpener for FakeOpener {
    type Channel = FakeChannel;

    async fn open_channel(&self) -> Result<(FakeChannel, ClosedSignal), RabbitMQError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let channel = FakeChannel {
            id,
            open: Arc::new(AtomicBool::new(true)),
            broker: Arc::clone(&self.broker),
        };
        let (notifier, signal) = closed_signal();
        *self.live.lock() = Some((channel.clone(), notifier));
        Ok((channel, signal))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<String>>,
    broken: AtomicBool,
    writing: AtomicBool,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink whose every write takes `delay` before it lands.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    /// True once a write has started, even if it has not finished.
    pub fn writing(&self) -> bool {
        self.writing.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    pub fn break_connection(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionSink for RecordingSink {
    async fn send(&self, frame: &[u8]) -> Result<(), SessionError> {
        self.writing.store(true, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.frames
            .lock()
            .push(String::from_utf8_lossy(frame).into_owned());
        Ok(())
    }

    async fn close(&self) {}
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
