//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// RabbitMQ plumbing for the notification bridge, built on amqprs.
//
// | Module         | Description                                                    |
// |----------------|----------------------------------------------------------------|
// | channel        | BrokerChannel seam, amqprs implementation, publish context     |
// | connection     | Dialing the broker, connection/channel callbacks               |
// | supervisor     | Channel reopen on closure, shared channel handle               |
// | topology       | Exchanges, queues, dead-letter queues and bindings             |
// | retry          | Bounded fixed-delay retry                                      |
// | error          | RabbitMQError                                                  |
//--------------------------------------------------------------------------------------------------

pub mod channel;
pub mod connection;
pub mod error;
pub mod retry;
pub mod supervisor;
pub mod topology;

pub use channel::{
    AmqpChannel, BrokerChannel, Delivery, DeliveryStream, JSON_CONTENT_TYPE, OutboundMessage,
    PublisherContext,
};
pub use connection::{AmqpConnector, ConnectionSettings};
pub use error::RabbitMQError;
pub use retry::RetryPolicy;
pub use supervisor::{
    ChannelHandle, ChannelOpener, ChannelSupervisor, ClosedNotifier, ClosedSignal, closed_signal,
};
pub use topology::{
    BrokerTopology, Declaration, ExchangeKind, ServiceQueue, TopologyPlan, dead_letter_queue,
    declare,
};
