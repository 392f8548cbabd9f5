//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name              | Description                                         | Key Methods          |
// |-------------------|-----------------------------------------------------|----------------------|
// | SubscriptionHub   | Registry of live sessions and their event types     | register, broadcast  |
// | Broadcaster       | What the consumer dispatcher needs from the hub     | broadcast            |
// | BroadcastOutcome  | Whether a broker message reached anyone             |                      |
// | SessionSink       | Write side of one client connection                 | send, close          |
//--------------------------------------------------------------------------------------------------

mod session;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::envelope::Envelope;

pub use session::{SessionError, SessionId, SessionSink};

/// Upper bound for a single write to a client, and for closing one.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to one broker message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// At least one session received the payload.
    Delivered,
    /// A valid envelope that no session received, either because nobody is
    /// subscribed or because every write failed.
    NoSubscribers,
    /// Not a valid envelope. Nothing was written.
    Malformed,
}

impl BroadcastOutcome {
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }
}

/// Delivery of decoded broker messages to interested sessions.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, topic: &str, body: &[u8]) -> BroadcastOutcome;
}

struct SessionEntry {
    sink: Arc<dyn SessionSink>,
    topics: HashSet<String>,
}

/// Concurrent registry of connected clients and their subscriptions.
///
/// One lock guards the whole registry. It is never held across a write:
/// targets are selected under the lock, written to after it is released with
/// a per-write timeout, and failed sessions are removed under the lock again.
pub struct SubscriptionHub {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    write_timeout: Duration,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_TIMEOUT)
    }
}

impl SubscriptionHub {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            write_timeout,
        }
    }

    /// Adds a session with no subscriptions.
    pub fn register(&self, sink: Arc<dyn SessionSink>) -> SessionId {
        let id = SessionId::new();
        let total = {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                id,
                SessionEntry {
                    sink,
                    topics: HashSet::new(),
                },
            );
            sessions.len()
        };
        info!("session {} connected ({} live)", id, total);
        id
    }

    /// Removes the session and closes its connection. False if it was
    /// already gone.
    pub async fn unregister(&self, id: SessionId) -> bool {
        let removed = self.sessions.lock().remove(&id);
        match removed {
            Some(entry) => {
                self.close(id, entry.sink.as_ref()).await;
                info!("session {} disconnected", id);
                true
            }
            None => false,
        }
    }

    /// Subscribes the session to `event_type`. Repeating it is a no-op.
    /// False if the session is unknown.
    pub fn subscribe(&self, id: SessionId, event_type: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&id) {
            Some(entry) => {
                if entry.topics.insert(event_type.to_owned()) {
                    debug!("session {} subscribed to {}", id, event_type);
                }
                true
            }
            None => false,
        }
    }

    /// Drops one subscription. The session stays registered even when its
    /// set becomes empty.
    pub fn unsubscribe(&self, id: SessionId, event_type: &str) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&id) {
            Some(entry) => {
                if entry.topics.remove(event_type) {
                    debug!("session {} unsubscribed from {}", id, event_type);
                }
                true
            }
            None => false,
        }
    }

    pub fn subscriptions(&self, id: SessionId) -> Option<HashSet<String>> {
        self.sessions.lock().get(&id).map(|entry| entry.topics.clone())
    }

    pub fn is_registered(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Decodes `body` as an [`Envelope`] and forwards its payload to every
    /// session subscribed to its event type. `topic` is the source queue and
    /// only used for logging.
    pub async fn broadcast(&self, topic: &str, body: &[u8]) -> BroadcastOutcome {
        let envelope = match Envelope::decode(body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("dropping message from {}: {}", topic, err);
                return BroadcastOutcome::Malformed;
            }
        };

        let delivered = self
            .fan_out(&envelope.event_type, envelope.payload_bytes())
            .await;
        debug!(
            "{} from {} delivered to {} session(s)",
            envelope.event_type, topic, delivered
        );
        if delivered > 0 {
            BroadcastOutcome::Delivered
        } else {
            BroadcastOutcome::NoSubscribers
        }
    }

    /// Writes `frame` to every session subscribed to `event_type` and returns
    /// how many writes succeeded. Sessions whose write fails are unregistered.
    pub async fn fan_out(&self, event_type: &str, frame: &[u8]) -> usize {
        let targets: Vec<(SessionId, Arc<dyn SessionSink>)> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, entry)| entry.topics.contains(event_type))
            .map(|(id, entry)| (*id, Arc::clone(&entry.sink)))
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let results = join_all(targets.iter().map(|(id, sink)| async move {
            (*id, self.write(sink.as_ref(), frame).await)
        }))
        .await;

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!("write to session {} failed: {}", id, err);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            let removed: Vec<(SessionId, SessionEntry)> = {
                let mut sessions = self.sessions.lock();
                failed
                    .iter()
                    .filter_map(|id| sessions.remove(id).map(|entry| (*id, entry)))
                    .collect()
            };
            info!("unregistered {} unreachable session(s)", removed.len());
            join_all(
                removed
                    .iter()
                    .map(|(id, entry)| self.close(*id, entry.sink.as_ref())),
            )
            .await;
        }

        delivered
    }

    /// Writes `frame` to one session. A failure is reported, not acted on.
    pub async fn send_direct(&self, id: SessionId, frame: &[u8]) -> bool {
        let sink = self
            .sessions
            .lock()
            .get(&id)
            .map(|entry| Arc::clone(&entry.sink));

        let Some(sink) = sink else {
            return false;
        };

        match self.write(sink.as_ref(), frame).await {
            Ok(()) => true,
            Err(err) => {
                warn!("direct write to session {} failed: {}", id, err);
                false
            }
        }
    }

    async fn write(&self, sink: &dyn SessionSink, frame: &[u8]) -> Result<(), SessionError> {
        match tokio::time::timeout(self.write_timeout, sink.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout),
        }
    }

    /// A client that stopped reading may never let the close frame through.
    async fn close(&self, id: SessionId, sink: &dyn SessionSink) {
        if tokio::time::timeout(self.write_timeout, sink.close()).await.is_err() {
            warn!("closing session {} timed out, dropping it", id);
        }
    }
}

#[async_trait]
impl Broadcaster for SubscriptionHub {
    async fn broadcast(&self, topic: &str, body: &[u8]) -> BroadcastOutcome {
        SubscriptionHub::broadcast(self, topic, body).await
    }
}
