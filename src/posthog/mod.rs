//! PostHog integration module
//!
//! This module provides the event source side of the exporter: wire types
//! for events and persons, an HTTP client for the PostHog API, and the
//! [`EventSource`] / [`PersonLookup`] traits the pipeline depends on.
//!
//! # Submodules
//!
//! - [`client`]: HTTP client for events, persons and action definitions
//! - [`message`]: Event, element and person wire types

pub mod client;
pub mod message;

use async_trait::async_trait;

pub use client::{ClientError, PostHogClient, PostHogClientConfig};
pub use message::{Element, Event, EventPage, Person};

/// Request for one page of events matching an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    /// First page, bounded below by the watermark.
    First {
        /// Action id to list events for.
        action_id: u64,
        /// Watermark timestamp; only events after it are returned.
        after: String,
    },
    /// Subsequent page, addressed by the cursor URL of the previous page.
    Next(String),
}

impl PageRequest {
    /// Builds the first-page request for an action.
    pub fn first(action_id: u64, after: impl Into<String>) -> Self {
        Self::First {
            action_id,
            after: after.into(),
        }
    }
}

/// Paginated source of events for an action.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches a single page.
    async fn fetch_page(&self, request: &PageRequest) -> Result<EventPage, ClientError>;
}

/// Out-of-band lookup of a visitor's current person profile.
#[async_trait]
pub trait PersonLookup: Send + Sync {
    /// Returns the first person owning `distinct_id`, if any.
    async fn find_person(&self, distinct_id: &str) -> Result<Option<Person>, ClientError>;
}
