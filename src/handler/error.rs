//! Error definitions for the event handler

use thiserror::Error;

use crate::capture::Event;
use crate::mqtt::PublishError;

/// Button configuration could not be turned into a registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Entry at `index` has no hardware address
    #[error("config for button {index} is missing hw_addr, add it to continue")]
    MissingHwAddr { index: usize },
}

/// Topic template could not be parsed or rendered
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed placeholder at byte {0}")]
    UnclosedPlaceholder(usize),

    #[error("unknown placeholder {{{0}}}, only {{ButtonID}} is supported")]
    UnknownPlaceholder(String),

    #[error("rendered topic is empty")]
    EmptyTopic,

    /// MQTT forbids wildcards and NUL in topics used for publishing
    #[error("rendered topic {topic:?} contains forbidden character {ch:?}")]
    ForbiddenCharacter { topic: String, ch: char },
}

/// Handler could not be built from the configuration
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid topic template: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Failure while handling a single event
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("could not format topic for event {event}: {source}")]
    Topic {
        event: Event,
        #[source]
        source: TemplateError,
    },

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
}
