use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Body carried inside every broker message: the event type used for topic
/// filtering and the opaque payload forwarded to subscribers byte for byte.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    pub payload: Box<RawValue>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("empty message body")]
    Empty,

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope has an empty event_type")]
    MissingEventType,
}

impl Envelope {
    pub fn new(event_type: &str, payload: &RawValue) -> Self {
        Self {
            event_type: event_type.to_owned(),
            payload: payload.to_owned(),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        if body.is_empty() {
            return Err(EnvelopeError::Empty);
        }
        let envelope: Envelope = serde_json::from_slice(body)?;
        if envelope.event_type.is_empty() {
            return Err(EnvelopeError::MissingEventType);
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The payload exactly as it was published.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.get().as_bytes()
    }
}
