//! Turns decoded button events into MQTT messages
//!
//! ```text
//! Event ──► [configured?] ──► [Limiter] ──► Registry ──► topic + payload ──► Publisher
//!              (optional)       (debounce)    (button id)
//! ```
//!
//! Runs inline in the capture loop: a slow publish delays the next packet read.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, info_span, Span};

use super::error::{HandlerError, SetupError};
use super::limiter::{Accepter, PressRateLimiter};
use super::payload::MessagePayload;
use super::registry::{ButtonConfig, ButtonRegistry};
use super::topic::TopicTemplate;
use super::EventHandler;
use crate::capture::Event;
use crate::config::GeneralConfig;
use crate::mqtt::{Message, Publisher};

pub struct DashButtonEventHandler {
    only_known: bool,
    topic_template: TopicTemplate,
    limiter: Box<dyn Accepter>,
    registry: ButtonRegistry,
    publisher: Arc<dyn Publisher>,
    span: Span,
}

impl DashButtonEventHandler {
    /// Builds the handler with a [`PressRateLimiter`] using the configured period
    ///
    /// # Errors
    ///
    /// * [`SetupError::Template`] - `topic_template` does not parse
    /// * [`SetupError::Registry`] - a button entry has no hardware address
    pub fn new(
        general: &GeneralConfig,
        buttons: &[ButtonConfig],
        publisher: Arc<dyn Publisher>,
        parent: &Span,
    ) -> Result<Self, SetupError> {
        let span = info_span!(parent: parent, "handler", comp = "event-handler");

        let topic_template = TopicTemplate::parse(&general.topic_template)?;
        let registry = ButtonRegistry::from_config(buttons)?;

        debug!(
            parent: &span,
            "Handler ready: {} configured buttons, topic template {:?}, debounce {:?}, drop unconfigured: {}",
            registry.len(),
            topic_template.as_str(),
            general.debounce_period,
            general.drop_unconfigured
        );

        Ok(Self {
            only_known: general.drop_unconfigured,
            topic_template,
            limiter: Box::new(PressRateLimiter::new(general.debounce_period)),
            registry,
            publisher,
            span,
        })
    }

    /// Replaces the debounce limiter
    pub fn with_limiter(mut self, limiter: impl Accepter + 'static) -> Self {
        self.limiter = Box::new(limiter);
        self
    }

    pub fn registry(&self) -> &ButtonRegistry {
        &self.registry
    }

    fn should_accept_event(&self, event: &Event) -> bool {
        if self.only_known && !self.registry.is_configured(&event.hw_addr) {
            debug!(parent: &self.span, "Ignoring unconfigured device {}", event.hw_addr);
            return false;
        }
        if !self.limiter.accept(&event.hw_addr) {
            debug!(parent: &self.span, "Suppressing repeated press from {}", event.hw_addr);
            return false;
        }
        true
    }

    async fn publish(&self, event: Event) -> Result<(), HandlerError> {
        let button_id = self.registry.resolve(&event.hw_addr);
        let payload = MessagePayload::new(button_id, event.timestamp);

        let topic = self
            .topic_template
            .render(&payload.button_id)
            .map_err(|source| HandlerError::Topic {
                event: event.clone(),
                source,
            })?;

        let msg = Message::new(topic, payload.to_json_bytes());
        info!(
            parent: &self.span,
            "Button {:?} ({}) pressed, publishing to {}",
            payload.button_id,
            event.hw_addr,
            msg.topic
        );

        self.publisher.publish(msg).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for DashButtonEventHandler {
    async fn handle_event(&self, event: Event) -> Result<(), HandlerError> {
        if !self.should_accept_event(&event) {
            debug!(parent: &self.span, "Dropping unacceptable event: {}", event);
            return Ok(());
        }
        self.publish(event).await
    }
}
