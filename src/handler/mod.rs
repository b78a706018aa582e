//! Event handling between capture and publisher
//!
//! Every decoded [`Event`] passes through this module exactly once. The
//! [`DashButtonEventHandler`] combines four small pieces:
//!
//! 1. [`limiter`] - per-device debounce so one press yields one message
//! 2. [`registry`] - hardware address → button id, with auto-registration
//! 3. [`topic`] - `{ButtonID}` topic templates
//! 4. [`payload`] - JSON body with a raw-bytes fallback

pub mod dash_button;
pub mod error;
pub mod limiter;
pub mod payload;
pub mod registry;
pub mod topic;

use async_trait::async_trait;

use crate::capture::Event;

pub use dash_button::DashButtonEventHandler;
pub use error::{HandlerError, RegistryError, SetupError, TemplateError};
pub use limiter::{Accepter, PressRateLimiter};
pub use payload::MessagePayload;
pub use registry::{ButtonConfig, ButtonRegistry};
pub use topic::TopicTemplate;

/// Receives every event the capture stage decodes
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), HandlerError>;
}
