//! Hardware address → button id registry

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::error::RegistryError;

/// Button entry as it appears in the configuration file
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ButtonConfig {
    /// Name used in topics and payloads; falls back to `hw_addr`
    #[serde(default, alias = "buttonid", skip_serializing_if = "Option::is_none")]
    pub button_id: Option<String>,

    #[serde(default, alias = "hwaddr")]
    pub hw_addr: String,
}

impl ButtonConfig {
    pub fn new(button_id: impl Into<String>, hw_addr: impl Into<String>) -> Self {
        Self {
            button_id: Some(button_id.into()),
            hw_addr: hw_addr.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct DashButton {
    button_id: String,
    configured: bool,
}

/// Brings hardware addresses into the form the decoder produces.
pub fn normalize_hw_addr(addr: &str) -> String {
    addr.trim().to_ascii_lowercase()
}

/// Maps device addresses to logical button ids
///
/// Built once from the configured buttons. Addresses seen at runtime that are
/// not configured are registered on first sighting with their own address as
/// the id, so every device keeps a stable id for the life of the process.
#[derive(Debug)]
pub struct ButtonRegistry {
    buttons: Mutex<HashMap<String, DashButton>>,
}

impl ButtonRegistry {
    pub fn from_config(buttons: &[ButtonConfig]) -> Result<Self, RegistryError> {
        let mut map = HashMap::with_capacity(buttons.len());

        for (index, button) in buttons.iter().enumerate() {
            let hw_addr = normalize_hw_addr(&button.hw_addr);
            if hw_addr.is_empty() {
                return Err(RegistryError::MissingHwAddr { index });
            }

            let button_id = match button.button_id.as_deref().map(str::trim) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => {
                    debug!(
                        "No button_id provided for button {} ({:?}), using {:?}",
                        index, hw_addr, hw_addr
                    );
                    hw_addr.clone()
                }
            };

            map.insert(
                hw_addr,
                DashButton {
                    button_id,
                    configured: true,
                },
            );
        }

        Ok(Self {
            buttons: Mutex::new(map),
        })
    }

    /// Returns the button id for `hw_addr`, registering unknown addresses
    pub fn resolve(&self, hw_addr: &str) -> String {
        let mut buttons = self.buttons.lock();
        if let Some(button) = buttons.get(hw_addr) {
            return button.button_id.clone();
        }

        debug!("Registering unconfigured button {:?}", hw_addr);
        let button = DashButton {
            button_id: hw_addr.to_string(),
            configured: false,
        };
        let id = button.button_id.clone();
        buttons.insert(hw_addr.to_string(), button);
        id
    }

    /// True only for addresses taken from the configuration
    pub fn is_configured(&self, hw_addr: &str) -> bool {
        self.buttons
            .lock()
            .get(hw_addr)
            .map(|button| button.configured)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.buttons.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
