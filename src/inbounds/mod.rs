/// +----------------------------------------------------------+
/// | MODULES                                                  |
/// +----------+-------+-------+------------------------------+
/// | Exports:                                                 |
/// |   - dispatcher                                           |
/// +----------------------------------------------------------+

/// Per-queue consumer loop coupling broker acks to hub delivery.
pub mod dispatcher;

pub use dispatcher::{Decision, DispatchStats, QueueDispatcher, ZeroDeliveryPolicy};
