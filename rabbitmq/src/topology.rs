//! Exchange, queue and dead-letter declarations.
//!
//! | Name            | Description                                           |
//! |-----------------|-------------------------------------------------------|
//! | BrokerTopology  | Main exchange, DLX and the service/queue/key layout   |
//! | Declaration     | One idempotent broker step                            |
//! | TopologyPlan    | Ordered steps computed from a topology                |
//! | declare         | Executes a plan on a channel, aborting on first error |

use tracing::{debug, info};

use crate::{BrokerChannel, RabbitMQError};

/// Suffix appended to a main queue name to form its dead-letter queue.
pub const DEAD_LETTER_SUFFIX: &str = "_dlq";

/// Returns the dead-letter queue paired with `queue`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}{DEAD_LETTER_SUFFIX}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
    Direct,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Direct => "direct",
        }
    }
}

/// A logical service and the queue it consumes, with the routing keys bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceQueue {
    pub service: String,
    pub queue: String,
    pub routing_keys: Vec<String>,
}

impl ServiceQueue {
    pub fn new(service: &str, queue: &str, routing_keys: &[&str]) -> Self {
        Self {
            service: service.to_owned(),
            queue: queue.to_owned(),
            routing_keys: routing_keys.iter().map(|k| (*k).to_owned()).collect(),
        }
    }
}

/// Everything the bridge declares on the broker at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerTopology {
    /// Topic exchange every event is published to.
    pub exchange: String,
    /// Direct exchange receiving rejected messages.
    pub dead_letter_exchange: String,
    pub services: Vec<ServiceQueue>,
    /// Optional `x-message-ttl` for main queues.
    pub message_ttl_ms: Option<u32>,
}

impl BrokerTopology {
    /// Main queue names, in declaration order.
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.queue.as_str())
    }

    /// True when some main queue binds `routing_key`.
    pub fn binds(&self, routing_key: &str) -> bool {
        self.services
            .iter()
            .any(|s| s.routing_keys.iter().any(|k| k == routing_key))
    }

    pub fn validate(&self) -> Result<(), RabbitMQError> {
        if self.exchange.is_empty() || self.dead_letter_exchange.is_empty() {
            return Err(RabbitMQError::InvalidTopology(
                "exchange names must not be empty".into(),
            ));
        }
        if self.exchange == self.dead_letter_exchange {
            return Err(RabbitMQError::InvalidTopology(format!(
                "main exchange and dead-letter exchange are both {}",
                self.exchange
            )));
        }
        if self.services.is_empty() {
            return Err(RabbitMQError::InvalidTopology("no service queues".into()));
        }
        for service in &self.services {
            if service.queue.is_empty() {
                return Err(RabbitMQError::InvalidTopology(format!(
                    "service {} has an empty queue name",
                    service.service
                )));
            }
            if service.routing_keys.is_empty() {
                return Err(RabbitMQError::InvalidTopology(format!(
                    "queue {} has no routing keys",
                    service.queue
                )));
            }
        }
        Ok(())
    }
}

/// One idempotent declaration against the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Exchange {
        name: String,
        kind: ExchangeKind,
    },
    Queue {
        name: String,
        dead_letter_exchange: Option<String>,
        message_ttl_ms: Option<u32>,
    },
    Bind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
}

/// Ordered declaration steps for a [`BrokerTopology`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    steps: Vec<Declaration>,
}

impl TopologyPlan {
    /// Builds the plan: both exchanges first, then per queue its DLQ, the
    /// main queue, and the bindings of every routing key on both.
    pub fn build(topology: &BrokerTopology) -> Result<Self, RabbitMQError> {
        topology.validate()?;

        let mut steps = vec![
            Declaration::Exchange {
                name: topology.exchange.clone(),
                kind: ExchangeKind::Topic,
            },
            Declaration::Exchange {
                name: topology.dead_letter_exchange.clone(),
                kind: ExchangeKind::Direct,
            },
        ];

        for service in &topology.services {
            let dlq = dead_letter_queue(&service.queue);

            steps.push(Declaration::Queue {
                name: dlq.clone(),
                dead_letter_exchange: None,
                message_ttl_ms: None,
            });
            steps.push(Declaration::Queue {
                name: service.queue.clone(),
                dead_letter_exchange: Some(topology.dead_letter_exchange.clone()),
                message_ttl_ms: topology.message_ttl_ms,
            });

            for key in &service.routing_keys {
                steps.push(Declaration::Bind {
                    queue: service.queue.clone(),
                    exchange: topology.exchange.clone(),
                    routing_key: key.clone(),
                });
                // Dead-lettered messages keep their original routing key.
                steps.push(Declaration::Bind {
                    queue: dlq.clone(),
                    exchange: topology.dead_letter_exchange.clone(),
                    routing_key: key.clone(),
                });
            }
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[Declaration] {
        &self.steps
    }
}

/// Declares `topology` on `channel`. The first failing step aborts.
pub async fn declare<C: BrokerChannel>(
    channel: &C,
    topology: &BrokerTopology,
) -> Result<(), RabbitMQError> {
    let plan = TopologyPlan::build(topology)?;

    for step in plan.steps() {
        debug!("declaring {:?}", step);
        channel.declare(step).await?;
    }

    info!(
        "declared exchange {} with {} queue(s), dead-lettering via {}",
        topology.exchange,
        topology.services.len(),
        topology.dead_letter_exchange
    );
    Ok(())
}
