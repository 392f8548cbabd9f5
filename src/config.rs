//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Service configuration, read once at startup from `.env` and the process environment.
// Every variable has a default, so an empty environment yields a working local setup.
//
// | Variable                | Default                                                      |
// |-------------------------|--------------------------------------------------------------|
// | RABBITMQ_HOST           | localhost                                                    |
// | RABBITMQ_PORT           | 5672                                                         |
// | RABBITMQ_USERNAME       | guest                                                        |
// | RABBITMQ_PASSWORD       | guest                                                        |
// | RABBITMQ_VHOST          | /                                                            |
// | RABBITMQ_EXCHANGE       | notification_exchange                                        |
// | RABBITMQ_DLX_EXCHANGE   | dlx_notification_exchange                                    |
// | RABBITMQ_PREFETCH       | 10                                                           |
// | RABBITMQ_MESSAGE_TTL_MS | unset                                                        |
// | SERVICE_QUEUES          | order=order_notification,user=user_notification              |
// | QUEUE_ROUTING_KEYS      | order_notification=order.created;user_notification=user.registered |
// | EVENT_ROUTES            | order_created=order.created,user_signup=user.registered      |
// | ZERO_DELIVERY_POLICY    | dead_letter                                                  |
// | WS_WRITE_TIMEOUT_MS     | 5000                                                         |
// | APP_PORT                | 8080                                                         |
// | APP_ID                  | notification-bridge                                          |
//--------------------------------------------------------------------------------------------------

use std::{
    collections::HashMap,
    env,
    net::{Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use dotenv::dotenv;
use rabbitmq::{BrokerTopology, ConnectionSettings, ServiceQueue};
use thiserror::Error;
use tracing::{info, warn};

use crate::{inbounds::ZeroDeliveryPolicy, outbounds::EventRoutes};

const RABBITMQ_HOST: &str = "RABBITMQ_HOST";
const RABBITMQ_PORT: &str = "RABBITMQ_PORT";
const RABBITMQ_USERNAME: &str = "RABBITMQ_USERNAME";
const RABBITMQ_PASSWORD: &str = "RABBITMQ_PASSWORD";
const RABBITMQ_VHOST: &str = "RABBITMQ_VHOST";
const RABBITMQ_EXCHANGE: &str = "RABBITMQ_EXCHANGE";
const RABBITMQ_DLX_EXCHANGE: &str = "RABBITMQ_DLX_EXCHANGE";
const RABBITMQ_PREFETCH: &str = "RABBITMQ_PREFETCH";
const RABBITMQ_MESSAGE_TTL_MS: &str = "RABBITMQ_MESSAGE_TTL_MS";
const SERVICE_QUEUES: &str = "SERVICE_QUEUES";
const QUEUE_ROUTING_KEYS: &str = "QUEUE_ROUTING_KEYS";
const EVENT_ROUTES: &str = "EVENT_ROUTES";
const ZERO_DELIVERY_POLICY: &str = "ZERO_DELIVERY_POLICY";
const WS_WRITE_TIMEOUT_MS: &str = "WS_WRITE_TIMEOUT_MS";
const APP_PORT: &str = "APP_PORT";
const APP_ID: &str = "APP_ID";

const DEFAULT_SERVICE_QUEUES: &str = "order=order_notification,user=user_notification";
const DEFAULT_QUEUE_ROUTING_KEYS: &str =
    "order_notification=order.created;user_notification=user.registered";
const DEFAULT_EVENT_ROUTES: &str = "order_created=order.created,user_signup=user.registered";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("malformed entry '{entry}' in {key}, expected name=value")]
    MalformedEntry { key: &'static str, entry: String },

    #[error("queue '{queue}' of service '{service}' has no routing keys")]
    MissingRoutingKeys { service: String, queue: String },

    #[error("invalid topology: {0}")]
    Topology(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionSettings,
    pub topology: BrokerTopology,
    pub routes: EventRoutes,
    pub prefetch: u16,
    pub zero_delivery: ZeroDeliveryPolicy,
    pub write_timeout: Duration,
    pub app_port: u16,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn try_from_env() -> Result<Config, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_owned())
        };

        let connection = ConnectionSettings {
            host: get(RABBITMQ_HOST, "localhost"),
            port: parse_value(RABBITMQ_PORT, &get(RABBITMQ_PORT, "5672"))?,
            username: get(RABBITMQ_USERNAME, "guest"),
            password: get(RABBITMQ_PASSWORD, "guest"),
            virtual_host: get(RABBITMQ_VHOST, "/"),
            app_id: get(APP_ID, "notification-bridge"),
        };

        let message_ttl_ms = match get(RABBITMQ_MESSAGE_TTL_MS, "").as_str() {
            "" => None,
            raw => Some(parse_value(RABBITMQ_MESSAGE_TTL_MS, raw)?),
        };

        let topology = BrokerTopology {
            exchange: get(RABBITMQ_EXCHANGE, "notification_exchange"),
            dead_letter_exchange: get(RABBITMQ_DLX_EXCHANGE, "dlx_notification_exchange"),
            services: parse_services(
                &get(SERVICE_QUEUES, DEFAULT_SERVICE_QUEUES),
                &get(QUEUE_ROUTING_KEYS, DEFAULT_QUEUE_ROUTING_KEYS),
            )?,
            message_ttl_ms,
        };
        topology
            .validate()
            .map_err(|err| ConfigError::Topology(err.to_string()))?;

        let routes = EventRoutes::new(parse_pairs(
            EVENT_ROUTES,
            &get(EVENT_ROUTES, DEFAULT_EVENT_ROUTES),
            ',',
        )?);
        for (event_type, routing_key) in routes.iter() {
            if !topology.binds(routing_key) {
                warn!(
                    "event type {} routes to {}, which no queue binds; those events will be unroutable",
                    event_type, routing_key
                );
            }
        }

        let prefetch: u16 = parse_value(RABBITMQ_PREFETCH, &get(RABBITMQ_PREFETCH, "10"))?;
        if prefetch == 0 {
            return Err(ConfigError::InvalidValue {
                key: RABBITMQ_PREFETCH,
                value: "0".into(),
                reason: "prefetch must be at least 1".into(),
            });
        }

        let zero_delivery = get(ZERO_DELIVERY_POLICY, "dead_letter")
            .parse::<ZeroDeliveryPolicy>()
            .map_err(|reason| ConfigError::InvalidValue {
                key: ZERO_DELIVERY_POLICY,
                value: get(ZERO_DELIVERY_POLICY, ""),
                reason,
            })?;

        let write_timeout_ms: u64 =
            parse_value(WS_WRITE_TIMEOUT_MS, &get(WS_WRITE_TIMEOUT_MS, "5000"))?;

        let config = Config {
            connection,
            topology,
            routes,
            prefetch,
            zero_delivery,
            write_timeout: Duration::from_millis(write_timeout_ms),
            app_port: parse_value(APP_PORT, &get(APP_PORT, "8080"))?,
        };
        info!(
            "loaded configuration: broker {}, {} queue(s), {} route(s), zero delivery policy {}",
            config.connection.redacted_url(),
            config.topology.services.len(),
            config.routes.len(),
            config.zero_delivery
        );
        Ok(config)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.app_port))
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        key,
        value: raw.to_owned(),
        reason: err.to_string(),
    })
}

/// Splits `a=b<sep>c=d` into ordered pairs. Empty entries are skipped.
fn parse_pairs(
    key: &'static str,
    raw: &str,
    separator: char,
) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(separator)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() && !value.trim().is_empty() => {
                Ok((name.trim().to_owned(), value.trim().to_owned()))
            }
            _ => Err(ConfigError::MalformedEntry {
                key,
                entry: entry.to_owned(),
            }),
        })
        .collect()
}

fn parse_services(service_queues: &str, queue_keys: &str) -> Result<Vec<ServiceQueue>, ConfigError> {
    let mut keys_by_queue: HashMap<String, Vec<String>> = HashMap::new();
    for (queue, keys) in parse_pairs(QUEUE_ROUTING_KEYS, queue_keys, ';')? {
        let keys = keys
            .split('|')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_owned);
        keys_by_queue.entry(queue).or_default().extend(keys);
    }

    let mut services = Vec::new();
    for (service, queue) in parse_pairs(SERVICE_QUEUES, service_queues, ',')? {
        let routing_keys = match keys_by_queue.remove(&queue) {
            Some(keys) if !keys.is_empty() => keys,
            _ => return Err(ConfigError::MissingRoutingKeys { service, queue }),
        };
        services.push(ServiceQueue {
            service,
            queue,
            routing_keys,
        });
    }

    for queue in keys_by_queue.keys() {
        warn!("routing keys configured for {}, which no service declares", queue);
    }

    Ok(services)
}
