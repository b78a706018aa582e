use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::PublishError;
use crate::config::duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_millis(150);
pub const DEFAULT_MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct MqttConfig {
    /// Broker URI, e.g. `tcp://127.0.0.1:1883`
    #[serde(default, alias = "brokeraddr")]
    pub broker_addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_connect_timeout", with = "duration")]
    pub connect_timeout: Duration,
    #[serde(default = "default_publish_timeout", with = "duration")]
    pub publish_timeout: Duration,
    #[serde(default = "default_disconnect_grace", with = "duration")]
    pub disconnect_grace: Duration,
    #[serde(default = "default_max_reconnect_interval", with = "duration")]
    pub max_reconnect_interval: Duration,
    #[serde(default = "default_keep_alive", with = "duration")]
    pub keep_alive: Duration,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_publish_timeout() -> Duration {
    DEFAULT_PUBLISH_TIMEOUT
}

fn default_disconnect_grace() -> Duration {
    DEFAULT_DISCONNECT_GRACE
}

fn default_max_reconnect_interval() -> Duration {
    DEFAULT_MAX_RECONNECT_INTERVAL
}

fn default_keep_alive() -> Duration {
    DEFAULT_KEEP_ALIVE
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_addr: String::new(),
            username: None,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            max_reconnect_interval: DEFAULT_MAX_RECONNECT_INTERVAL,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

/// Host and port taken from a broker URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl BrokerEndpoint {
    /// Accepts `tcp://host:port`, `mqtt://host:port`, bare `host:port` and
    /// bracketed IPv6 hosts. The port defaults to 1883 when a scheme is given.
    pub fn parse(addr: &str) -> Result<Self, PublishError> {
        let invalid = |reason: &str| PublishError::InvalidBrokerAddr {
            addr: addr.to_string(),
            reason: reason.to_string(),
        };

        let mut remainder = addr.trim();
        let mut has_scheme = false;
        if let Some((scheme, rest)) = remainder.split_once("://") {
            match scheme {
                "tcp" | "mqtt" => {}
                "ssl" | "tls" | "mqtts" => return Err(invalid("TLS brokers are not supported")),
                _ => return Err(invalid("unsupported scheme")),
            }
            has_scheme = true;
            remainder = rest.trim_end_matches('/');
        }
        if remainder.is_empty() {
            return Err(invalid("missing host"));
        }

        let (host, port) = if let Some(rest) = remainder.strip_prefix('[') {
            let (host, rest) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 host"))?;
            (host, rest.strip_prefix(':'))
        } else {
            match remainder.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (remainder, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid("invalid port"))?,
            None if has_scheme => DEFAULT_MQTT_PORT,
            None => return Err(invalid("missing port")),
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
