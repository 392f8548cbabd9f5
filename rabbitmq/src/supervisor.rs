//! Channel supervision.
//!
//! | Name              | Description                                            |
//! |-------------------|--------------------------------------------------------|
//! | ChannelOpener     | Source of fresh channels plus their closure signal     |
//! | ChannelSupervisor | Watches the live channel and reopens it when it closes |
//! | ChannelHandle     | Read side shared by dispatch loops and the publish path|
//!
//! The supervisor is the only writer of the current channel. Every reader goes
//! through a [`ChannelHandle`], a `watch` receiver, so a swap is observed as a
//! whole: either the old channel or the new one, never a mix.

use async_trait::async_trait;
use tokio::{
    select,
    sync::{oneshot, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{BrokerChannel, RabbitMQError, RetryPolicy};

/// Fires the [`ClosedSignal`] paired with it.
#[derive(Debug)]
pub struct ClosedNotifier(oneshot::Sender<String>);

impl ClosedNotifier {
    pub fn notify(self, reason: String) {
        let _ = self.0.send(reason);
    }
}

/// Resolves once the channel it was issued with is closed. Dropping the
/// paired notifier counts as closure.
#[derive(Debug)]
pub struct ClosedSignal(oneshot::Receiver<String>);

impl ClosedSignal {
    /// Waits for closure and returns the reason. Must not be awaited again
    /// after it has resolved.
    pub async fn wait(&mut self) -> String {
        match (&mut self.0).await {
            Ok(reason) => reason,
            Err(_) => "channel callback dropped".to_owned(),
        }
    }
}

pub fn closed_signal() -> (ClosedNotifier, ClosedSignal) {
    let (tx, rx) = oneshot::channel();
    (ClosedNotifier(tx), ClosedSignal(rx))
}

/// Opens channels for the supervisor.
#[async_trait]
pub trait ChannelOpener: Send + Sync + 'static {
    type Channel: BrokerChannel;

    async fn open_channel(&self) -> Result<(Self::Channel, ClosedSignal), RabbitMQError>;
}

#[async_trait]
impl<O: ChannelOpener> ChannelOpener for std::sync::Arc<O> {
    type Channel = O::Channel;

    async fn open_channel(&self) -> Result<(Self::Channel, ClosedSignal), RabbitMQError> {
        (**self).open_channel().await
    }
}

/// Synchronized read access to the current channel.
#[derive(Clone)]
pub struct ChannelHandle<C> {
    rx: watch::Receiver<C>,
}

impl<C: BrokerChannel> ChannelHandle<C> {
    /// The channel currently published by the supervisor.
    pub fn current(&self) -> C {
        self.rx.borrow().clone()
    }

    /// Like [`current`](Self::current), and marks this version as seen so
    /// [`changed`](Self::changed) only fires for later swaps.
    pub fn current_and_mark_seen(&mut self) -> C {
        self.rx.borrow_and_update().clone()
    }

    /// Waits until the supervisor publishes a different channel.
    pub async fn changed(&mut self) -> Result<(), RabbitMQError> {
        self.rx
            .changed()
            .await
            .map_err(|_| RabbitMQError::SupervisorGone)
    }
}

/// Owns the live channel and reopens it on closure.
pub struct ChannelSupervisor<O: ChannelOpener> {
    opener: O,
    policy: RetryPolicy,
    current: watch::Sender<O::Channel>,
    closed: ClosedSignal,
    reopens: u64,
}

impl<O: ChannelOpener> ChannelSupervisor<O> {
    /// Opens the first channel under `policy`. Exhaustion is fatal.
    pub async fn start(opener: O, policy: RetryPolicy) -> Result<Self, RabbitMQError> {
        let (channel, closed) = {
            let opener = &opener;
            policy
                .run("open channel", move || opener.open_channel())
                .await?
        };
        info!("supervising {}", channel.label());

        let (current, _) = watch::channel(channel);
        Ok(Self {
            opener,
            policy,
            current,
            closed,
            reopens: 0,
        })
    }

    pub fn handle(&self) -> ChannelHandle<O::Channel> {
        ChannelHandle {
            rx: self.current.subscribe(),
        }
    }

    pub fn current(&self) -> O::Channel {
        self.current.borrow().clone()
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Watches for channel closure until `cancel` fires, reopening under the
    /// retry policy each time. Returns the number of reopens on cancellation,
    /// or the exhaustion error when a reopen runs out of attempts.
    ///
    /// The last channel is left open on cancellation. Readers may still be
    /// settling deliveries on it, so closing it is up to the owner once they
    /// have stopped.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<u64, RabbitMQError> {
        loop {
            select! {
                biased;
                _ = cancel.cancelled() => break,
                reason = self.closed.wait() => {
                    warn!("{} closed: {}", self.current.borrow().label(), reason);
                }
            }

            let reopened = {
                let opener = &self.opener;
                select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(self.reopens),
                    result = self.policy.run("reopen channel", move || opener.open_channel()) => result,
                }
            };

            match reopened {
                Ok((channel, closed)) => {
                    info!("reopened channel as {}", channel.label());
                    self.closed = closed;
                    self.current.send_replace(channel);
                    self.reopens += 1;
                }
                Err(err) => {
                    error!("giving up on the broker channel: {}", err);
                    return Err(err);
                }
            }
        }

        info!("channel supervisor stopped after {} reopen(s)", self.reopens);
        Ok(self.reopens)
    }
}
