//! Publish path: external event types to broker routing keys.

use std::collections::HashMap;

use async_trait::async_trait;
use rabbitmq::{BrokerChannel, ChannelHandle, OutboundMessage, PublisherContext, RabbitMQError};
use serde_json::value::RawValue;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{Envelope, EnvelopeError};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("unknown event type: '{0}'")]
    UnknownEventType(String),

    #[error("failed to encode event: {0}")]
    Encode(#[from] EnvelopeError),

    #[error("broker publish failed: {0}")]
    Broker(#[from] RabbitMQError),
}

/// Static mapping from event type to routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRoutes(HashMap<String, String>);

impl EventRoutes {
    pub fn new<I, K, V>(routes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            routes
                .into_iter()
                .map(|(event_type, key)| (event_type.into(), key.into()))
                .collect(),
        )
    }

    pub fn resolve(&self, event_type: &str) -> Option<&str> {
        self.0.get(event_type).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(event, key)| (event.as_str(), key.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ingress side of the bridge, as seen by the HTTP layer.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `{event_type, payload}` and returns the routing key used.
    async fn publish(&self, event_type: &str, payload: &RawValue) -> Result<String, PublishError>;
}

/// [`EventPublisher`] over the supervised broker channel.
pub struct EventRouter<C: BrokerChannel> {
    handle: ChannelHandle<C>,
    exchange: String,
    routes: EventRoutes,
}

impl<C: BrokerChannel> EventRouter<C> {
    pub fn new(handle: ChannelHandle<C>, exchange: &str, routes: EventRoutes) -> Self {
        Self {
            handle,
            exchange: exchange.to_owned(),
            routes,
        }
    }

    pub fn routes(&self) -> &EventRoutes {
        &self.routes
    }
}

#[async_trait]
impl<C: BrokerChannel> EventPublisher for EventRouter<C> {
    async fn publish(&self, event_type: &str, payload: &RawValue) -> Result<String, PublishError> {
        let routing_key = self
            .routes
            .resolve(event_type)
            .filter(|_| !event_type.is_empty())
            .ok_or_else(|| PublishError::UnknownEventType(event_type.to_owned()))?
            .to_owned();

        let content = Envelope::new(event_type, payload).encode()?;
        let request_id = Uuid::new_v4().to_string();
        let message = OutboundMessage {
            exchange: self.exchange.clone(),
            routing_key: routing_key.clone(),
            content,
            context: PublisherContext::new(&request_id, Some(Uuid::new_v4().to_string())),
        };

        let channel = self.handle.current();
        channel.publish(message).await.map_err(|err| {
            error!("publishing {} to {} failed: {}", event_type, routing_key, err);
            PublishError::Broker(err)
        })?;

        info!(
            "published {} to {} with routing key {} (request {})",
            event_type, self.exchange, routing_key, request_id
        );
        Ok(routing_key)
    }
}
