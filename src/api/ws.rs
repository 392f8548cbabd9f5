//! WebSocket endpoint.
//!
//! Each connection is registered with the hub on upgrade. Its write half
//! becomes the session's sink; the read half is driven here and only carries
//! control frames. Any read or decode error ends the connection, and so does
//! the hub dropping the session after a failed write.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        Extension,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{
    SinkExt, StreamExt,
    stream::SplitSink,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AppState, ControlFrame};
use crate::domain::{SessionError, SessionId, SessionSink, SubscriptionHub};

pub const PONG: &str = "pong!";
pub const INVALID_ACTION: &str = "Invalid action: must be 'subscribe', 'unsubscribe' or 'ping'";
pub const MISSING_EVENT_TYPE: &str = "Missing event_type: required for 'subscribe' and 'unsubscribe'";

/// Why a control frame ends the connection.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("undecodable control frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("session is no longer registered")]
    SessionGone,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Write half of a client socket.
struct WsSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl SessionSink for WsSink {
    async fn send(&self, frame: &[u8]) -> Result<(), SessionError> {
        let text = String::from_utf8_lossy(frame).into_owned();
        self.tx
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))
    }

    async fn close(&self) {
        let mut tx = self.tx.lock().await;
        let _ = tx.send(Message::Close(None)).await;
        let _ = tx.close().await;
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (tx, mut rx) = socket.split();
    let id = state.hub.register(Arc::new(WsSink { tx: Mutex::new(tx) }));

    while let Some(frame) = rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    warn!("session {} sent a non-utf8 frame: {}", id, err);
                    break;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => {
                debug!("session {} sent close", id);
                break;
            }
            Err(err) => {
                warn!("reading from session {} failed: {}", id, err);
                break;
            }
        };

        if let Err(err) = handle_control_frame(&state.hub, id, &text).await {
            warn!("ending session {}: {}", id, err);
            break;
        }
    }

    state.hub.unregister(id).await;
    info!("session {} task finished", id);
}

/// Applies one client control frame. A frame that is not a JSON object, or
/// any frame for a session the hub has already dropped, is an error and ends
/// the session; an unknown action is answered in text.
pub async fn handle_control_frame(
    hub: &SubscriptionHub,
    id: SessionId,
    text: &str,
) -> Result<(), ControlError> {
    let frame: ControlFrame = serde_json::from_str(text)?;
    let event_type = frame.event_type.filter(|t| !t.is_empty());

    let reply = match (frame.action.as_str(), event_type) {
        ("subscribe", Some(event_type)) => {
            if !hub.subscribe(id, &event_type) {
                return Err(ControlError::SessionGone);
            }
            None
        }
        ("unsubscribe", Some(event_type)) => {
            if !hub.unsubscribe(id, &event_type) {
                return Err(ControlError::SessionGone);
            }
            None
        }
        ("subscribe" | "unsubscribe", None) => Some(MISSING_EVENT_TYPE),
        ("ping", _) => Some(PONG),
        (action, _) => {
            warn!("session {} sent invalid action '{}'", id, action);
            Some(INVALID_ACTION)
        }
    };

    if let Some(reply) = reply {
        // a failed reply alone keeps the session; a missing session does not
        if !hub.send_direct(id, reply.as_bytes()).await && !hub.is_registered(id) {
            return Err(ControlError::SessionGone);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: SyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionSink for RecordingSink {
        async fn send(&self, frame: &[u8]) -> Result<(), SessionError> {
            self.frames
                .lock()
                .push(String::from_utf8_lossy(frame).into_owned());
            Ok(())
        }

        async fn close(&self) {}
    }

    fn connected() -> (SubscriptionHub, SessionId, Arc<RecordingSink>) {
        let hub = SubscriptionHub::default();
        let sink = Arc::new(RecordingSink::default());
        let id = hub.register(sink.clone());
        (hub, id, sink)
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_update_the_registry() {
        let (hub, id, sink) = connected();

        handle_control_frame(&hub, id, r#"{"action":"subscribe","event_type":"user_signup"}"#)
            .await
            .unwrap();
        assert!(hub.subscriptions(id).unwrap().contains("user_signup"));

        handle_control_frame(&hub, id, r#"{"action":"unsubscribe","event_type":"user_signup"}"#)
            .await
            .unwrap();
        assert!(hub.subscriptions(id).unwrap().is_empty());
        assert!(sink.frames.lock().is_empty());
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let (hub, id, sink) = connected();

        handle_control_frame(&hub, id, r#"{"action":"ping"}"#).await.unwrap();

        assert_eq!(*sink.frames.lock(), vec![PONG.to_owned()]);
    }

    #[tokio::test]
    async fn invalid_or_missing_action_is_answered_in_text() {
        let (hub, id, sink) = connected();

        handle_control_frame(&hub, id, r#"{"action":"shout","event_type":"x"}"#)
            .await
            .unwrap();
        handle_control_frame(&hub, id, r#"{"event_type":"x"}"#).await.unwrap();

        assert_eq!(
            *sink.frames.lock(),
            vec![INVALID_ACTION.to_owned(), INVALID_ACTION.to_owned()]
        );
        assert!(hub.is_registered(id));
    }

    #[tokio::test]
    async fn subscribe_without_event_type_is_answered_in_text() {
        let (hub, id, sink) = connected();

        handle_control_frame(&hub, id, r#"{"action":"subscribe"}"#).await.unwrap();
        handle_control_frame(&hub, id, r#"{"action":"unsubscribe","event_type":""}"#)
            .await
            .unwrap();

        assert_eq!(sink.frames.lock().len(), 2);
        assert!(sink.frames.lock().iter().all(|f| f == MISSING_EVENT_TYPE));
        assert!(hub.subscriptions(id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_frame_is_an_error() {
        let (hub, id, _sink) = connected();

        assert!(matches!(
            handle_control_frame(&hub, id, "subscribe me").await,
            Err(ControlError::Decode(_))
        ));
        assert!(matches!(
            handle_control_frame(&hub, id, r#"["subscribe"]"#).await,
            Err(ControlError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn frames_for_a_dropped_session_end_it() {
        let (hub, id, sink) = connected();
        assert!(hub.unregister(id).await);

        for frame in [
            r#"{"action":"subscribe","event_type":"user_signup"}"#,
            r#"{"action":"unsubscribe","event_type":"user_signup"}"#,
            r#"{"action":"ping"}"#,
            r#"{"action":"shout"}"#,
        ] {
            assert!(
                matches!(
                    handle_control_frame(&hub, id, frame).await,
                    Err(ControlError::SessionGone)
                ),
                "frame: {frame}"
            );
        }
        assert!(sink.frames.lock().is_empty());
        assert_eq!(hub.session_count(), 0);
    }
}
