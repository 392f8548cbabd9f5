/// +----------------------------------------------------------+
/// | MODULES                                                  |
/// +----------+-------+-------+------------------------------+
/// | Exports:                                                 |
/// |   - envelope                                             |
/// |   - hub                                                  |
/// +----------------------------------------------------------+

/// Wire body of every broker message.
pub mod envelope;

/// Registry of live WebSocket sessions and topic-filtered broadcast.
pub mod hub;

pub use envelope::{Envelope, EnvelopeError};
pub use hub::{BroadcastOutcome, Broadcaster, SessionError, SessionId, SessionSink, SubscriptionHub};
