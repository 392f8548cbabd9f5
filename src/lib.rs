//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Bridges RabbitMQ topic exchanges to WebSocket subscribers.
//
// | Module     | Description                                                        |
// |------------|--------------------------------------------------------------------|
// | api        | HTTP ingress, WebSocket endpoint, health                           |
// | bridge     | Startup of the supervisor, topology and dispatchers                |
// | config     | Environment configuration                                          |
// | domain     | Envelope and subscription hub                                      |
// | inbounds   | Per-queue consumer dispatch                                        |
// | outbounds  | Event type routing and publishing                                  |
//--------------------------------------------------------------------------------------------------

pub mod api;
pub mod bridge;
pub mod config;
pub mod domain;
pub mod inbounds;
pub mod outbounds;

pub use bridge::Bridge;
pub use config::{Config, ConfigError};
pub use domain::{BroadcastOutcome, Broadcaster, Envelope, SessionId, SessionSink, SubscriptionHub};
pub use inbounds::{DispatchStats, QueueDispatcher, ZeroDeliveryPolicy};
pub use outbounds::{EventPublisher, EventRouter, EventRoutes, PublishError};
