//! Action definitions and the event-to-definition matcher

use crate::error::ExportError;
use crate::matching::autocapture::ElementCriteria;
use crate::matching::operator::{evaluate, Operator};
use crate::posthog::message::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The only property filter scope the matcher supports.
pub const EVENT_FILTER_TYPE: &str = "event";

fn default_filter_type() -> String {
    EVENT_FILTER_TYPE.to_string()
}

/// A single property filter of an action step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    /// Event property key
    pub key: String,

    /// Comparison operator (defaults to exact)
    #[serde(default)]
    pub operator: Operator,

    /// Filter scope; anything but `event` is rejected at match time
    #[serde(rename = "type", default = "default_filter_type")]
    pub filter_type: String,

    /// Configured value, a scalar or a list of alternatives
    #[serde(default)]
    pub value: JsonValue,
}

impl PropertyFilter {
    /// Whether the filter is scoped to event properties.
    pub fn is_event_scoped(&self) -> bool {
        self.filter_type == EVENT_FILTER_TYPE
    }

    /// Evaluates the filter against an event's properties.
    ///
    /// The key must be present. A list value is satisfied by any of its
    /// elements.
    fn is_satisfied_by(&self, event: &Event) -> bool {
        let Some(live) = event.properties.get(&self.key) else {
            return false;
        };

        match &self.value {
            JsonValue::Array(alternatives) => alternatives
                .iter()
                .any(|needle| evaluate(needle, live, self.operator)),
            needle => evaluate(needle, live, self.operator),
        }
    }
}

/// One step of a tracked action, tagged with its conversion name.
///
/// Multi-step actions expand into several definitions sharing `id` and
/// `conversion_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDefinition {
    /// Source action id
    pub id: u64,
    /// Conversion name reported to the webhook
    pub conversion_name: String,
    /// Required event name
    pub event_name: String,
    /// Autocapture criteria
    pub elements: ElementCriteria,
    /// URL to compare `$current_url` against
    pub url: Option<String>,
    /// Operator used for the URL comparison
    pub url_matching: Option<Operator>,
    /// Property filters, all of which must hold
    pub properties: Vec<PropertyFilter>,
}

impl ActionDefinition {
    /// Creates a definition matching every event with the given name.
    pub fn for_event(id: u64, conversion_name: impl Into<String>, event_name: impl Into<String>) -> Self {
        Self {
            id,
            conversion_name: conversion_name.into(),
            event_name: event_name.into(),
            elements: ElementCriteria::default(),
            url: None,
            url_matching: None,
            properties: Vec::new(),
        }
    }

    /// Decides whether `event` satisfies this definition.
    ///
    /// Checks short-circuit in order: event name, autocapture elements,
    /// URL, property filters.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::UnsupportedFilterType` when a property filter
    /// is scoped to anything but event properties.
    pub fn matches(&self, event: &Event) -> Result<bool, ExportError> {
        if event.event != self.event_name {
            return Ok(false);
        }

        if self.elements.should_check() && !self.elements.matches(&event.elements) {
            return Ok(false);
        }

        if let (Some(url), Some(operator)) = (&self.url, self.url_matching) {
            let current_url = event.current_url().unwrap_or(&JsonValue::Null);
            if !evaluate(&JsonValue::String(url.clone()), current_url, operator) {
                return Ok(false);
            }
        }

        if let Some(filter) = self.properties.iter().find(|f| !f.is_event_scoped()) {
            return Err(ExportError::UnsupportedFilterType(format!(
                "filter on '{}' has type '{}' in action {} ({})",
                filter.key, filter.filter_type, self.id, self.conversion_name
            )));
        }

        Ok(self.properties.iter().all(|f| f.is_satisfied_by(event)))
    }
}
