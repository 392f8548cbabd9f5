//--------------------------------------------------------------------------------------------------
// STRUCTS
//--------------------------------------------------------------------------------------------------
// | Name                 | Description                                   | Used by          |
// |----------------------|-----------------------------------------------|------------------|
// | PublishEventRequest  | Body of POST /event                           | publish_event    |
// | PublishEventResponse | Successful publish acknowledgement            | publish_event    |
// | HealthResponse       | Liveness plus live session count              | health           |
// | ControlFrame         | Client to server WebSocket control message    | ws               |
//--------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Request to publish an event to the broker
#[derive(Debug, Deserialize)]
pub struct PublishEventRequest {
    /// External event type, resolved to a routing key
    #[serde(default)]
    pub event_type: String,
    /// Opaque JSON forwarded to subscribers unchanged
    pub payload: Box<RawValue>,
}

/// Response returned once the broker accepted the event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishEventResponse {
    pub status: String,
    pub event_type: String,
    pub routing_key: String,
    pub published_at: DateTime<Utc>,
}

impl PublishEventResponse {
    pub fn published(event_type: &str, routing_key: String) -> Self {
        Self {
            status: "event published".to_owned(),
            event_type: event_type.to_owned(),
            routing_key,
            published_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
}

/// `{"action": "subscribe" | "unsubscribe" | "ping", "event_type"?: string}`
///
/// Both fields are optional on the wire so an unknown or missing action can
/// be answered instead of dropping the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlFrame {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub event_type: Option<String>,
}
