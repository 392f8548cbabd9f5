use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier of one live client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session connection is closed")]
    Closed,

    #[error("write timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Write side of a client connection.
///
/// Implementations serialize concurrent writers themselves; the hub may write
/// to one sink from several tasks at once.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn send(&self, frame: &[u8]) -> Result<(), SessionError>;

    async fn close(&self);
}
