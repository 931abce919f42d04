//! Conversion extraction
//!
//! Turns a matched event into a [`ConversionRecord`], resolving the click
//! identifier through a fixed waterfall of property locations and, as a
//! last resort, an out-of-band person lookup.

use crate::conversion::timestamp::TimestampPolicy;
use crate::conversion::ConversionRecord;
use crate::error::ExportError;
use crate::matching::ActionDefinition;
use crate::posthog::message::Event;
use crate::posthog::PersonLookup;
use chrono::Utc;
use metrics::increment_counter;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error};

/// Property key of the click identifier.
pub const GCLID_KEY: &str = "gclid";
/// Property key of the first-touch click identifier.
pub const INITIAL_GCLID_KEY: &str = "$initial_gclid";

/// Builds conversion records from events.
pub struct ConversionExtractor {
    definitions: Vec<ActionDefinition>,
    tracked_events: HashSet<String>,
    lookup: Option<Arc<dyn PersonLookup>>,
    policy: TimestampPolicy,
}

impl ConversionExtractor {
    /// Creates an extractor over `definitions`, tried in order.
    pub fn new(definitions: Vec<ActionDefinition>, policy: TimestampPolicy) -> Self {
        let tracked_events = definitions.iter().map(|d| d.event_name.clone()).collect();
        Self {
            definitions,
            tracked_events,
            lookup: None,
            policy,
        }
    }

    /// Enables the person lookup fallback.
    pub fn with_person_lookup(mut self, lookup: Arc<dyn PersonLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// The definitions this extractor matches against.
    pub fn definitions(&self) -> &[ActionDefinition] {
        &self.definitions
    }

    /// Returns the first definition (in list order) the event satisfies.
    ///
    /// Events whose name no definition tracks are rejected without running
    /// the matcher.
    ///
    /// # Errors
    ///
    /// Propagates `ExportError::UnsupportedFilterType` from the matcher.
    pub fn find_definition(&self, event: &Event) -> Result<Option<&ActionDefinition>, ExportError> {
        if !self.tracked_events.contains(&event.event) {
            return Ok(None);
        }

        for definition in &self.definitions {
            if definition.matches(event)? {
                return Ok(Some(definition));
            }
        }
        Ok(None)
    }

    /// Extracts a conversion record from an event.
    ///
    /// Returns `Ok(None)` when no definition matches or no click identifier
    /// can be resolved. The person lookup only runs for matched events.
    ///
    /// # Errors
    ///
    /// Propagates match-time configuration errors.
    pub async fn extract(&self, event: &Event) -> Result<Option<ConversionRecord>, ExportError> {
        let Some(definition) = self.find_definition(event)? else {
            return Ok(None);
        };

        let Some(gclid) = self.resolve_gclid(event).await else {
            debug!(
                action_id = definition.id,
                distinct_id = %event.distinct_id,
                "Matched event has no gclid; dropping"
            );
            increment_counter!("gclid_export_unconvertible_total");
            return Ok(None);
        };

        increment_counter!("gclid_export_conversions_total");
        Ok(Some(ConversionRecord {
            action_id: definition.id,
            gclid,
            conversion_name: definition.conversion_name.clone(),
            timestamp: self.record_timestamp(event),
        }))
    }

    /// Delivery timestamp, else capture timestamp, else now.
    fn record_timestamp(&self, event: &Event) -> String {
        let raw = event
            .sent_at
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(event.timestamp.as_deref().filter(|s| !s.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        self.policy.format(&raw)
    }

    async fn resolve_gclid(&self, event: &Event) -> Option<String> {
        if let Some(gclid) = gclid_from_event(event) {
            return Some(gclid);
        }

        let lookup = self.lookup.as_ref()?;
        if event.distinct_id.is_empty() {
            return None;
        }

        match lookup.find_person(&event.distinct_id).await {
            Ok(Some(person)) => lookup_key(&person.properties, GCLID_KEY)
                .or_else(|| lookup_key(&person.properties, INITIAL_GCLID_KEY)),
            Ok(None) => None,
            Err(e) => {
                error!(
                    distinct_id = %event.distinct_id,
                    error = %e,
                    "Failed to fetch person"
                );
                None
            }
        }
    }
}

/// Value under `key` as a string; numeric ids are stringified.
fn lookup_key(properties: &Map<String, JsonValue>, key: &str) -> Option<String> {
    match properties.get(key) {
        Some(JsonValue::String(value)) if !value.is_empty() => Some(value.clone()),
        Some(JsonValue::Number(value)) => Some(value.to_string()),
        _ => None,
    }
}

fn nested<'a>(properties: &'a Map<String, JsonValue>, key: &str) -> Option<&'a Map<String, JsonValue>> {
    properties.get(key).and_then(JsonValue::as_object)
}

/// Resolves the click identifier from the event alone.
///
/// Order: event `gclid`, person `gclid`, person `$initial_gclid`, then
/// `gclid` and `$initial_gclid` inside `$set`, then inside `$set_once`.
pub fn gclid_from_event(event: &Event) -> Option<String> {
    let properties = &event.properties;
    let person = event.person_properties();
    let set = nested(properties, "$set");
    let set_once = nested(properties, "$set_once");

    let candidates: [(Option<&Map<String, JsonValue>>, &str); 7] = [
        (Some(properties), GCLID_KEY),
        (person, GCLID_KEY),
        (person, INITIAL_GCLID_KEY),
        (set, GCLID_KEY),
        (set, INITIAL_GCLID_KEY),
        (set_once, GCLID_KEY),
        (set_once, INITIAL_GCLID_KEY),
    ];

    candidates
        .into_iter()
        .find_map(|(source, key)| source.and_then(|props| lookup_key(props, key)))
}
