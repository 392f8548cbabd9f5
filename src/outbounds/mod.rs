/// +----------------------------------------------------------+
/// | MODULES                                                  |
/// +----------+-------+-------+------------------------------+
/// | Exports:                                                 |
/// |   - router                                               |
/// +----------------------------------------------------------+

/// Event type resolution and publishing to the main exchange.
pub mod router;

pub use router::{EventPublisher, EventRouter, EventRoutes, PublishError};
