//! Topic templates
//!
//! A template is plain text with `{ButtonID}` placeholders, e.g.
//! `/buttonoff/{ButtonID}/pressed`. It is parsed once at startup so a typo in
//! the configuration fails before any packet is captured.

use std::fmt;

use super::error::TemplateError;

pub const DEFAULT_TOPIC_TEMPLATE: &str = "/buttonoff/{ButtonID}/pressed";

const BUTTON_ID_PLACEHOLDER: &str = "ButtonID";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    ButtonId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl TopicTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find('{') {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 1..];
            let close = after_open
                .find('}')
                .ok_or(TemplateError::UnclosedPlaceholder(offset + open))?;

            let name = after_open[..close].trim();
            if name != BUTTON_ID_PLACEHOLDER {
                return Err(TemplateError::UnknownPlaceholder(name.to_string()));
            }
            segments.push(Segment::ButtonId);

            let consumed = open + 1 + close + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Substitutes `button_id` and checks the result is a publishable topic
    pub fn render(&self, button_id: &str) -> Result<String, TemplateError> {
        let mut topic = String::with_capacity(self.source.len() + button_id.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => topic.push_str(text),
                Segment::ButtonId => topic.push_str(button_id),
            }
        }

        if topic.is_empty() {
            return Err(TemplateError::EmptyTopic);
        }
        if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
            return Err(TemplateError::ForbiddenCharacter { topic, ch });
        }
        Ok(topic)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for TopicTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_TOPIC_TEMPLATE.to_string(),
            segments: vec![
                Segment::Literal("/buttonoff/".to_string()),
                Segment::ButtonId,
                Segment::Literal("/pressed".to_string()),
            ],
        }
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}
