use amqprs::{
    BasicProperties, FieldTable, FieldValue, ShortStr,
    channel::{
        BasicAckArguments, BasicConsumeArguments, BasicNackArguments, BasicPublishArguments,
        BasicQosArguments, Channel, ConsumerMessage, ExchangeDeclareArguments, QueueBindArguments,
        QueueDeclareArguments,
    },
};
use async_trait::async_trait;
use tokio::{
    select,
    sync::mpsc::{self, UnboundedReceiver},
};
use tracing::{debug, warn};

use crate::{RabbitMQError, topology::Declaration};

/// Content type stamped on every published message.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message pulled from a queue, detached from the amqprs frame types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

impl TryFrom<ConsumerMessage> for Delivery {
    type Error = RabbitMQError;

    fn try_from(message: ConsumerMessage) -> Result<Self, Self::Error> {
        let deliver = message.deliver.ok_or(RabbitMQError::NotDeliveryTag)?;
        Ok(Self {
            delivery_tag: deliver.delivery_tag(),
            routing_key: deliver.routing_key().to_owned(),
            redelivered: deliver.redelivered(),
            body: message.content.unwrap_or_default(),
        })
    }
}

/// Deliveries for one consumer. Yields `None` once the consumer or its
/// channel is gone.
pub type DeliveryStream = UnboundedReceiver<Delivery>;

/// A message headed for an exchange.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub content: Vec<u8>,
    pub context: PublisherContext,
}

/// Context information for message publishing
///
/// Provides additional metadata for published messages, such as request IDs
/// and message IDs for tracing and correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherContext {
    request_id: String,
    message_id: Option<String>,
}

impl PublisherContext {
    /// Creates a new publisher context with request ID and optional message ID
    pub fn new(req_id: &str, message_id: Option<String>) -> Self {
        Self {
            request_id: req_id.to_owned(),
            message_id,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Converts the context into AMQP message properties
    ///
    /// Adds the request ID as a header and optionally sets the message ID.
    fn into_basic_props(
        self,
        current_basic_props: &BasicProperties,
    ) -> Result<BasicProperties, RabbitMQError> {
        let mut new_basic_props = current_basic_props.clone();
        if let Some(msg_id) = self.message_id {
            new_basic_props.with_message_id(&msg_id);
        }

        let mut headers = FieldTable::new();
        headers.insert(field_name("request_id")?, self.request_id.into());
        new_basic_props.with_headers(headers);

        Ok(new_basic_props)
    }
}

fn field_name(name: &str) -> Result<ShortStr, RabbitMQError> {
    ShortStr::try_from(name)
        .map_err(|_| RabbitMQError::InvalidTopology(format!("field name too long: {name}")))
}

/// The operations the bridge needs from a live broker channel.
///
/// Implemented by [`AmqpChannel`] for RabbitMQ; tests provide in-memory fakes.
#[async_trait]
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    /// Short identifier used in logs.
    fn label(&self) -> String;

    fn is_open(&self) -> bool;

    /// Applies one topology step (exchange, queue or binding).
    async fn declare(&self, step: &Declaration) -> Result<(), RabbitMQError>;

    /// Sets the prefetch window and starts a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, RabbitMQError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), RabbitMQError>;

    /// Rejects without requeue, so the queue's dead-letter exchange takes it.
    async fn reject(&self, delivery_tag: u64) -> Result<(), RabbitMQError>;

    async fn publish(&self, message: OutboundMessage) -> Result<(), RabbitMQError>;

    async fn close(self) -> Result<(), RabbitMQError>;
}

/// [`BrokerChannel`] over an amqprs [`Channel`].
#[derive(Clone)]
pub struct AmqpChannel {
    channel: Channel,
    msg_common_props: BasicProperties,
}

impl AmqpChannel {
    pub fn new(channel: Channel, app_id: &str) -> Self {
        let msg_common_props = BasicProperties::default()
            .with_app_id(app_id)
            .with_content_type(JSON_CONTENT_TYPE)
            .with_delivery_mode(2)
            .finish();

        Self {
            channel,
            msg_common_props,
        }
    }

    pub fn inner(&self) -> &Channel {
        &self.channel
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn label(&self) -> String {
        format!("channel-{}", self.channel.channel_id())
    }

    fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    async fn declare(&self, step: &Declaration) -> Result<(), RabbitMQError> {
        match step {
            Declaration::Exchange { name, kind } => {
                let args = ExchangeDeclareArguments::new(name, kind.as_str())
                    .durable(true)
                    .finish();
                self.channel
                    .exchange_declare(args)
                    .await
                    .map_err(|err| RabbitMQError::ExchangeDeclarationError(err.to_string()))
            }
            Declaration::Queue {
                name,
                dead_letter_exchange,
                message_ttl_ms,
            } => {
                let mut arguments = FieldTable::new();
                if let Some(dlx) = dead_letter_exchange {
                    arguments.insert(field_name("x-dead-letter-exchange")?, dlx.clone().into());
                }
                if let Some(ttl) = message_ttl_ms {
                    arguments.insert(field_name("x-message-ttl")?, FieldValue::l(i64::from(*ttl)));
                }

                let args = QueueDeclareArguments::new(name)
                    .durable(true)
                    .arguments(arguments)
                    .finish();
                self.channel
                    .queue_declare(args)
                    .await
                    .map(|_| ())
                    .map_err(|err| RabbitMQError::QueueDeclarationError(err.to_string()))
            }
            Declaration::Bind {
                queue,
                exchange,
                routing_key,
            } => self
                .channel
                .queue_bind(QueueBindArguments::new(queue, exchange, routing_key))
                .await
                .map_err(|err| RabbitMQError::QueueBindingError(err.to_string())),
        }
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<DeliveryStream, RabbitMQError> {
        self.channel
            .basic_qos(BasicQosArguments::new(0, prefetch, false))
            .await
            .map_err(|err| RabbitMQError::QosError(err.to_string()))?;

        let consume_args = BasicConsumeArguments::new(queue, "").auto_ack(false).finish();
        let (ctag, mut raw) = self
            .channel
            .basic_consume_rx(consume_args)
            .await
            .map_err(|err| RabbitMQError::SubscriptionError(err.to_string()))?;

        debug!("consumer {} started on {} ({})", ctag, queue, self.label());

        let (tx, rx) = mpsc::unbounded_channel();
        let queue = queue.to_owned();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = tx.closed() => {
                        debug!("delivery stream for {} dropped", queue);
                        return;
                    }
                    message = raw.recv() => match message {
                        Some(message) => match Delivery::try_from(message) {
                            Ok(delivery) => {
                                if tx.send(delivery).is_err() {
                                    return;
                                }
                            }
                            Err(err) => warn!("skipping frame on {}: {}", queue, err),
                        },
                        None => {
                            debug!("consumer on {} ended", queue);
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), RabbitMQError> {
        self.channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
            .map_err(|err| RabbitMQError::AckMessageError(err.to_string()))
    }

    async fn reject(&self, delivery_tag: u64) -> Result<(), RabbitMQError> {
        self.channel
            .basic_nack(BasicNackArguments::new(delivery_tag, false, false))
            .await
            .map_err(|err| RabbitMQError::RejectMessageError(err.to_string()))
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), RabbitMQError> {
        let props = message.context.into_basic_props(&self.msg_common_props)?;
        let args = BasicPublishArguments::new(&message.exchange, &message.routing_key);

        self.channel
            .basic_publish(props, message.content, args)
            .await
            .map_err(|err| RabbitMQError::PublishError(err.to_string()))
    }

    async fn close(self) -> Result<(), RabbitMQError> {
        self.channel
            .close()
            .await
            .map_err(|err| RabbitMQError::CloseChannelError(err.to_string()))
    }
}
