//! Packet capture
//!
//! A [`Listener`] watches one network interface for DHCP/BOOTP traffic and
//! forwards an [`Event`] per decoded request to an
//! [`EventHandler`](crate::handler::EventHandler).

pub mod bootp;
pub mod event_collector;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use bootp::{decode_frame, BootpMessage, DecodeError, LinkLayer};
pub use event_collector::PcapListener;

/// A device announced itself on the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Lowercase colon-separated hex
    pub hw_addr: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(hw_addr: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            hw_addr: hw_addr.into(),
            timestamp,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}", self.hw_addr, self.timestamp.to_rfc3339())
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("could not enumerate capture devices: {0}")]
    Enumerate(#[source] pcap::Error),

    #[error("could not open device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: pcap::Error,
    },

    #[error("could not apply capture filter {filter:?}: {source}")]
    Filter {
        filter: &'static str,
        #[source]
        source: pcap::Error,
    },

    #[error("unsupported link type {0}")]
    UnsupportedLinkType(i32),

    #[error("could not start packet stream: {0}")]
    Stream(#[source] pcap::Error),

    #[error("packet capture failed: {0}")]
    Capture(#[source] pcap::Error),
}

/// Source of button events
#[async_trait]
pub trait Listener: Send {
    /// Captures until `cancel` fires or the capture fails
    async fn run(self, cancel: CancellationToken) -> Result<(), ListenerError>;
}
