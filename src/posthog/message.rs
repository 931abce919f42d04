//! Wire types returned by the PostHog API.
//!
//! Events arrive from the events-by-action endpoint, persons from the
//! person-by-distinct-id endpoint. Both are immutable once received.
//!
//! # Example
//!
//! ```rust
//! use gclid_export::posthog::message::Event;
//!
//! let json = r#"{
//!   "id": "017d0a8c-0000-0000-0000-000000000000",
//!   "distinct_id": "visitor-1",
//!   "event": "$autocapture",
//!   "timestamp": "2021-11-09T21:58:36.973000+00:00",
//!   "properties": {"$current_url": "https://example.com/docs", "gclid": "abc"},
//!   "elements": [{"tag_name": "a", "href": "/docs", "text": "Docs"}]
//! }"#;
//!
//! let event: Event = serde_json::from_str(json).unwrap();
//! assert_eq!(event.event, "$autocapture");
//! assert_eq!(event.elements.len(), 1);
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

/// Property key carrying the page URL an event was captured on.
pub const CURRENT_URL_KEY: &str = "$current_url";

/// Treats an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Keeps string-valued attributes; null or structured values are dropped.
fn string_attributes<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<HashMap<String, JsonValue>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| match value {
            JsonValue::String(value) => Some((key, value)),
            _ => None,
        })
        .collect())
}

/// Analytics event as returned by the events API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier (UUID or numeric id depending on deployment).
    #[serde(default)]
    pub id: Option<JsonValue>,

    /// Visitor distinct id.
    #[serde(default, deserialize_with = "null_as_default")]
    pub distinct_id: String,

    /// Event name (e.g. `$pageview`, `$autocapture`, `signed_up`).
    pub event: String,

    /// Capture timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,

    /// Client delivery timestamp.
    #[serde(default)]
    pub sent_at: Option<String>,

    /// Opaque event properties, including `$set` and `$set_once` bags.
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: Map<String, JsonValue>,

    /// Captured DOM ancestry, innermost element first.
    #[serde(default, deserialize_with = "null_as_default")]
    pub elements: Vec<Element>,

    /// Person snapshot attached by the API, if any.
    #[serde(default)]
    pub person: Option<Person>,
}

impl Event {
    /// Properties of the person attached to this event, if present.
    pub fn person_properties(&self) -> Option<&Map<String, JsonValue>> {
        self.person.as_ref().map(|p| &p.properties)
    }

    /// The page URL the event was captured on.
    pub fn current_url(&self) -> Option<&JsonValue> {
        self.properties.get(CURRENT_URL_KEY)
    }
}

/// One node of a captured DOM element chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Element {
    /// Lower-case tag name (`a`, `button`, ...).
    #[serde(default, deserialize_with = "null_as_default")]
    pub tag_name: String,

    /// Visible text of the element.
    #[serde(default)]
    pub text: Option<String>,

    /// Link target for anchors.
    #[serde(default)]
    pub href: Option<String>,

    /// Raw attribute bag, keys prefixed with `attr__`.
    #[serde(default, deserialize_with = "string_attributes")]
    pub attributes: HashMap<String, String>,
}

/// Person profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Person {
    /// Distinct ids merged into this person.
    #[serde(default, deserialize_with = "null_as_default")]
    pub distinct_ids: Vec<String>,

    /// Current person properties.
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: Map<String, JsonValue>,
}

/// One page of the events-by-action listing.
#[derive(Debug, Clone)]
pub struct EventPage {
    /// Events on this page, in server order.
    pub results: Vec<Event>,

    /// Absolute URL of the next page, if any.
    pub next: Option<String>,
}

/// Person listing response; only the first result is ever used.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonPage {
    /// Matching persons.
    #[serde(default)]
    pub results: Vec<Person>,
}
