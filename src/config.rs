//! Daemon configuration
//!
//! Loaded from a TOML file with four tables: `[general]`, `[listener]`,
//! `[mqtt]` and an array of `[[buttons]]`. The flat lowercase keys of older
//! configuration files (`dropunconfigured`, `brokeraddr`, `hwaddr`, ...) are
//! accepted as aliases.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::handler::limiter::DEFAULT_DEBOUNCE_PERIOD;
use crate::handler::registry::ButtonConfig;
use crate::handler::topic::DEFAULT_TOPIC_TEMPLATE;
use crate::mqtt::{BrokerEndpoint, MqttConfig, PublishError};

const DEFAULT_CONFIG: &str = r#"# buttonoffd configuration

[general]
# Topic each press is published to, {ButtonID} is replaced per button
topic_template = "/buttonoff/{ButtonID}/pressed"
# Ignore devices that are not listed under [[buttons]]
drop_unconfigured = false
# Presses of the same button closer together than this are ignored
debounce_period = "600ms"

[listener]
interface = "eth0"

[mqtt]
broker_addr = "tcp://127.0.0.1:1883"
# username = "buttonoff"
# password = "secret"

[[buttons]]
button_id = "my-button"
hw_addr = "fc:a6:67:b1:24:41"
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0} is required")]
    Missing(&'static str),

    #[error(transparent)]
    BrokerAddr(#[from] PublishError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub buttons: Vec<ButtonConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct GeneralConfig {
    #[serde(default = "default_topic_template", alias = "topictemplate")]
    pub topic_template: String,
    #[serde(default, alias = "dropunconfigured")]
    pub drop_unconfigured: bool,
    #[serde(
        default = "default_debounce_period",
        alias = "postpresssupressperiod",
        with = "duration"
    )]
    pub debounce_period: Duration,
}

fn default_topic_template() -> String {
    DEFAULT_TOPIC_TEMPLATE.to_string()
}

fn default_debounce_period() -> Duration {
    DEFAULT_DEBOUNCE_PERIOD
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            topic_template: default_topic_template(),
            drop_unconfigured: false,
            debounce_period: DEFAULT_DEBOUNCE_PERIOD,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct ListenerConfig {
    /// Network interface to capture on, e.g. `eth0`
    #[serde(default)]
    pub interface: String,
}

impl Config {
    /// Reads and parses `path` without validating it
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Checks the settings required to start the daemon
    ///
    /// Button entries are checked when the registry is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listener.interface.trim().is_empty() {
            return Err(ConfigError::Missing("listener.interface"));
        }
        if self.mqtt.broker_addr.trim().is_empty() {
            return Err(ConfigError::Missing("mqtt.broker_addr"));
        }
        BrokerEndpoint::parse(&self.mqtt.broker_addr)?;

        // rumqttc panics on keep-alive intervals below one second.
        let keep_alive = self.mqtt.keep_alive;
        if !keep_alive.is_zero() && keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(format!(
                "mqtt.keep_alive must be 0 or at least 1s, got {:?}",
                keep_alive
            )));
        }
        if self.mqtt.connect_timeout.is_zero() || self.mqtt.publish_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "mqtt.connect_timeout and mqtt.publish_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Commented configuration file with every default spelled out
pub fn default_config() -> &'static str {
    DEFAULT_CONFIG
}

pub fn write_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let path = path.as_ref();
    fs::write(path, DEFAULT_CONFIG).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Wrote default config to {}", path.display());
    Ok(())
}

/// Serde adapter for durations written as `"600ms"`, `"1.5s"` or a bare
/// integer number of milliseconds
pub mod duration {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    const UNITS: [(&str, u64); 6] = [
        ("ns", 1),
        ("us", 1_000),
        ("ms", 1_000_000),
        ("s", 1_000_000_000),
        ("m", 60 * 1_000_000_000),
        ("h", 60 * 60 * 1_000_000_000),
    ];

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let text = if value.subsec_nanos() == 0 {
            format!("{}s", value.as_secs())
        } else if value.subsec_nanos() % 1_000_000 == 0 {
            format!("{}ms", value.as_millis())
        } else {
            format!("{}ns", value.as_nanos())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Millis(ms) => Ok(Duration::from_millis(ms)),
            RawDuration::Text(text) => parse(&text).map_err(D::Error::custom),
        }
    }

    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        let split = text
            .find(|c: char| c.is_ascii_alphabetic())
            .ok_or_else(|| format!("duration {:?} is missing a unit", text))?;
        let (number, unit) = text.split_at(split);

        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| format!("unknown duration unit {:?} in {:?}", unit, text))?;

        if let Ok(whole) = number.parse::<u64>() {
            return whole
                .checked_mul(scale)
                .map(Duration::from_nanos)
                .ok_or_else(|| format!("duration {:?} is too large", text));
        }

        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {:?}", text))?;
        let nanos = value * scale as f64;
        if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
            return Err(format!("duration {:?} is out of range", text));
        }
        Ok(Duration::from_nanos(nanos.round() as u64))
    }
}
