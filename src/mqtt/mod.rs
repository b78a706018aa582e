//! # MQTT Publishing Module
//!
//! Owns the broker connection and delivers button presses to it.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker address, credentials and timeouts
//! ├── message_manager.rs  - Message representation (topic + payload)
//! └── mqtt_handler.rs     - Connection lifecycle, event-loop driver, publish
//! ```
//!
//! ## Delivery Semantics
//!
//! Messages go out at QoS 0 and are never retained. A publish attempted while
//! the connection is down fails immediately with [`PublishError::Disconnected`];
//! nothing is queued for later. Recovery is limited to the transport-level
//! reconnect performed by the event-loop driver.
//!
//! The [`Publisher`] trait is the seam the event handler depends on, so the
//! handler can be exercised without a broker.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use config::{BrokerEndpoint, MqttConfig};
pub use message_manager::Message;
pub use mqtt_handler::{ConnectionState, MqttPublisher};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid broker address {addr:?} ({reason}), use the form tcp://127.0.0.1:1883")]
    InvalidBrokerAddr { addr: String, reason: String },

    #[error("MQTT connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    #[error("MQTT connect failed: {0}")]
    Connect(#[from] rumqttc::ConnectionError),

    #[error("disconnected from MQTT broker")]
    Disconnected,

    #[error("MQTT publish timeout after {0:?}")]
    PublishTimeout(Duration),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Sends one message; fails fast when the broker is not connected
    async fn publish(&self, msg: Message) -> Result<(), PublishError>;

    /// Tears the connection down without waiting for a cancellation signal
    async fn close(&self) -> Result<(), PublishError>;
}
