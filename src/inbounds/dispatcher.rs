use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use rabbitmq::{BrokerChannel, ChannelHandle, Delivery, RabbitMQError};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{BroadcastOutcome, Broadcaster};

/// +----------------------------------------------------------+
/// | STRUCTS | TRAITS | ENUMS | FUNCTIONS                     |
/// +----------+-------+-------+------------------------------+
/// | Enums:                                                   |
/// |   - ZeroDeliveryPolicy                                   |
/// |   - Decision                                             |
/// | Structs:                                                 |
/// |   - DispatchStats                                        |
/// |   - QueueDispatcher                                      |
/// +----------------------------------------------------------+

/// Pause before resubscribing when the consumer stream ends without the
/// channel being replaced.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// What to do with a well-formed message that reached no session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZeroDeliveryPolicy {
    /// Reject without requeue so the dead-letter queue keeps it.
    #[default]
    DeadLetter,
    /// Acknowledge and drop it.
    Acknowledge,
}

impl FromStr for ZeroDeliveryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dead_letter" | "deadletter" | "reject" => Ok(Self::DeadLetter),
            "acknowledge" | "ack" => Ok(Self::Acknowledge),
            other => Err(format!(
                "unknown zero delivery policy '{other}', expected 'dead_letter' or 'acknowledge'"
            )),
        }
    }
}

impl fmt::Display for ZeroDeliveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadLetter => write!(f, "dead_letter"),
            Self::Acknowledge => write!(f, "acknowledge"),
        }
    }
}

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ack,
    Reject,
}

/// Counters reported by a dispatch loop when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub acked: u64,
    pub dead_lettered: u64,
    pub resubscriptions: u64,
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} acked, {} dead-lettered, {} resubscription(s)",
            self.acked, self.dead_lettered, self.resubscriptions
        )
    }
}

/// Consumes one queue and settles every delivery according to what the hub
/// did with it.
///
/// # Flow
///
/// 1. Reads the current channel from the supervisor's handle
/// 2. Starts a manual-ack consumer with the configured prefetch
/// 3. Broadcasts each delivery and acks or rejects it
/// 4. Resubscribes when the handle publishes a new channel or the stream ends
///
/// Cancellation is checked between deliveries. A delivery already handed to
/// the hub is always settled before the loop returns.
pub struct QueueDispatcher<C: BrokerChannel> {
    queue: String,
    prefetch: u16,
    policy: ZeroDeliveryPolicy,
    handle: ChannelHandle<C>,
    hub: Arc<dyn Broadcaster>,
}

impl<C: BrokerChannel> QueueDispatcher<C> {
    pub fn new(
        queue: &str,
        prefetch: u16,
        policy: ZeroDeliveryPolicy,
        handle: ChannelHandle<C>,
        hub: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            queue: queue.to_owned(),
            prefetch,
            policy,
            handle,
            hub,
        }
    }

    /// Runs until `cancel` fires. Fails only if the channel supervisor is
    /// gone while the loop still needs a channel.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<DispatchStats, RabbitMQError> {
        let mut stats = DispatchStats::default();
        let mut subscribed_before = false;

        'subscribe: while !cancel.is_cancelled() {
            let channel = self.handle.current_and_mark_seen();
            let mut deliveries = match channel.consume(&self.queue, self.prefetch).await {
                Ok(deliveries) => deliveries,
                Err(err) => {
                    warn!("subscribing to {} on {} failed: {}", self.queue, channel.label(), err);
                    if self.wait_for_channel(&cancel).await? {
                        continue;
                    }
                    break;
                }
            };

            if subscribed_before {
                stats.resubscriptions += 1;
            }
            subscribed_before = true;
            info!(
                "dispatching {} on {} (prefetch {})",
                self.queue,
                channel.label(),
                self.prefetch
            );

            loop {
                let delivery = select! {
                    biased;
                    _ = cancel.cancelled() => break 'subscribe,
                    changed = self.handle.changed() => {
                        changed?;
                        info!("channel replaced, resubscribing to {}", self.queue);
                        continue 'subscribe;
                    }
                    delivery = deliveries.recv() => delivery,
                };

                match delivery {
                    Some(delivery) => self.settle(&channel, delivery, &mut stats).await,
                    None => {
                        warn!("consumer stream for {} ended", self.queue);
                        if self.wait_for_channel(&cancel).await? {
                            continue 'subscribe;
                        }
                        break 'subscribe;
                    }
                }
            }
        }

        info!("dispatcher for {} stopped: {}", self.queue, stats);
        Ok(stats)
    }

    /// Waits for a replacement channel, or for the resubscribe delay. False
    /// when cancelled.
    async fn wait_for_channel(&mut self, cancel: &CancellationToken) -> Result<bool, RabbitMQError> {
        select! {
            biased;
            _ = cancel.cancelled() => Ok(false),
            changed = self.handle.changed() => changed.map(|_| true),
            _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => Ok(true),
        }
    }

    async fn settle(&self, channel: &C, delivery: Delivery, stats: &mut DispatchStats) {
        let tag = delivery.delivery_tag;
        let decision = self.decide(&delivery).await;

        let settled = match decision {
            Decision::Ack => channel.ack(tag).await,
            Decision::Reject => channel.reject(tag).await,
        };

        match settled {
            Ok(()) => match decision {
                Decision::Ack => stats.acked += 1,
                Decision::Reject => stats.dead_lettered += 1,
            },
            Err(err) => warn!("settling delivery {} on {} failed: {}", tag, self.queue, err),
        }
    }

    /// Broadcasts the delivery and maps the outcome to a broker decision.
    /// Bodies that are not a valid envelope are always rejected.
    pub async fn decide(&self, delivery: &Delivery) -> Decision {
        if delivery.body.is_empty() {
            warn!("empty message {} on {}", delivery.delivery_tag, self.queue);
            return Decision::Reject;
        }

        match (self.hub.broadcast(&self.queue, &delivery.body).await, self.policy) {
            (BroadcastOutcome::Delivered, _) => Decision::Ack,
            (BroadcastOutcome::Malformed, _) => Decision::Reject,
            (BroadcastOutcome::NoSubscribers, ZeroDeliveryPolicy::DeadLetter) => {
                debug!("message {} on {} reached no session", delivery.delivery_tag, self.queue);
                Decision::Reject
            }
            (BroadcastOutcome::NoSubscribers, ZeroDeliveryPolicy::Acknowledge) => Decision::Ack,
        }
    }
}
