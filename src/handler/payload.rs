//! MQTT message body for a button press

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// JSON body published for every accepted press
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MessagePayload {
    pub button_id: String,
    pub timestamp: String,
}

impl MessagePayload {
    pub fn new(button_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            button_id: button_id.into(),
            timestamp: format_timestamp(timestamp),
        }
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        self.bytes_or_fallback(serde_json::to_vec(self))
    }

    /// Uses the encoded bytes, or the raw button id if encoding failed
    fn bytes_or_fallback(&self, encoded: serde_json::Result<Vec<u8>>) -> Vec<u8> {
        match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Could not marshal message payload {:?}: {}", self, e);
                debug!(
                    "Falling back to button_id as the message payload: {:?}",
                    self.button_id
                );
                self.button_id.clone().into_bytes()
            }
        }
    }
}

/// RFC 3339 with nanoseconds and a `Z` suffix
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
