/// Error types for RabbitMQ operations
#[derive(Debug, thiserror::Error)]
pub enum RabbitMQError {
    /// Error in the provided URI
    #[error("Provided URI Error: {0}")]
    UriError(String),
    /// Error establishing connection
    #[error("Connection error: {0}")]
    ConnectionError(String),
    /// Error opening a channel
    #[error("Error while opening a rabbitmq channel: {0}")]
    OpenChannelError(String),
    /// Error declaring a queue
    #[error("Error while declaring a queue: {0}")]
    QueueDeclarationError(String),
    /// Error declaring an exchange
    #[error("Error while declaring a exchange: {0}")]
    ExchangeDeclarationError(String),
    /// Error binding a queue to an exchange
    #[error("Error while binding a queue to exchange: {0}")]
    QueueBindingError(String),
    /// The topology description itself is unusable
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),
    /// Error setting the prefetch window
    #[error("Error while setting channel qos: {0}")]
    QosError(String),
    /// Error starting to consume from a queue
    #[error("Error while starting to consume from a subscription: {0}")]
    SubscriptionError(String),
    /// Error closing a channel
    #[error("Error while closing a channel: {0}")]
    CloseChannelError(String),
    /// Error publishing a message
    #[error("Error while publishing a message: {0}")]
    PublishError(String),
    /// Error while acknowledging a message
    #[error("Error while acknowledging a message: {0}")]
    AckMessageError(String),
    /// Error while rejecting a message
    #[error("Error while rejecting a message: {0}")]
    RejectMessageError(String),
    /// Message does not contain delivery tag
    #[error("Unexpected error: message does not contain delivery tag")]
    NotDeliveryTag,
    /// A bounded retry ran out of attempts
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<RabbitMQError>,
    },
    /// The channel supervisor stopped publishing channels
    #[error("Channel supervisor is gone")]
    SupervisorGone,
}

impl RabbitMQError {
    /// True when the error is the terminal outcome of a bounded retry.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_keeps_the_last_cause() {
        let err = RabbitMQError::RetryExhausted {
            operation: "open channel",
            attempts: 5,
            source: Box::new(RabbitMQError::OpenChannelError("refused".into())),
        };

        assert!(err.is_retry_exhausted());
        assert_eq!(
            err.to_string(),
            "open channel failed after 5 attempts: Error while opening a rabbitmq channel: refused"
        );
    }
}
