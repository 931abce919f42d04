//! PostHog API client.
//!
//! Thin reqwest wrapper over the three endpoints the exporter needs:
//! events by action (paginated), person by distinct id, and action
//! definitions.
//!
//! # Example
//!
//! ```rust,no_run
//! use gclid_export::posthog::{PageRequest, PostHogClient, PostHogClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = PostHogClient::new(PostHogClientConfig {
//!         base_url: "https://app.posthog.com".to_string(),
//!         personal_api_key: "phx_personal".to_string(),
//!         timeout_secs: 30,
//!     })?;
//!
//!     let page = client
//!         .fetch_events_page(&PageRequest::first(42, "2021-11-09T00:00:00.000Z"))
//!         .await?;
//!     println!("{} events, more: {}", page.results.len(), page.next.is_some());
//!     Ok(())
//! }
//! ```

use crate::definitions::Action;
use crate::posthog::message::{Event, EventPage, Person, PersonPage};
use crate::posthog::{EventSource, PageRequest, PersonLookup};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API error with status code.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Response body did not have the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid URL built from configuration or a pagination cursor.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// PostHog API client configuration.
#[derive(Debug, Clone)]
pub struct PostHogClientConfig {
    /// Base URL of the PostHog instance.
    pub base_url: String,
    /// Personal API key sent as a bearer token.
    pub personal_api_key: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

/// PostHog API client.
pub struct PostHogClient {
    client: Client,
    config: PostHogClientConfig,
}

impl PostHogClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be created.
    pub fn new(config: PostHogClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Base URL with any trailing slash removed.
    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn build_request(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(&self.config.personal_api_key)
            .header("Accept", "application/json")
    }

    /// Resolves a page request to an absolute URL.
    ///
    /// The first page is built from the action id and watermark; later
    /// pages follow the server's `next` link verbatim.
    pub fn page_url(&self, request: &PageRequest) -> Result<Url, ClientError> {
        match request {
            PageRequest::First { action_id, after } => Ok(Url::parse_with_params(
                &format!("{}/api/event", self.base()),
                &[("action_id", action_id.to_string()), ("after", after.clone())],
            )?),
            PageRequest::Next(next) => Ok(Url::parse(next)?),
        }
    }

    /// Fetches one page of events for an action.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Api` for non-success statuses and
    /// `ClientError::Malformed` when the body lacks `results` or `next`.
    pub async fn fetch_events_page(&self, request: &PageRequest) -> Result<EventPage, ClientError> {
        let url = self.page_url(request)?;
        debug!(url = %url, "Requesting events page");

        let response = self.build_request(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let value: JsonValue = serde_json::from_str(&body)
            .map_err(|e| ClientError::Malformed(format!("page is not JSON: {}", e)))?;
        parse_event_page(value)
    }

    /// Looks up the person owning a distinct id.
    ///
    /// Only the first result is returned.
    pub async fn find_person(&self, distinct_id: &str) -> Result<Option<Person>, ClientError> {
        let url = Url::parse_with_params(
            &format!("{}/api/person", self.base()),
            &[("distinct_id", distinct_id)],
        )?;

        let response = self.build_request(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let page: PersonPage = response.json().await?;
        Ok(page.results.into_iter().next())
    }

    /// Fetches an action definition by id.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotFound` if the action doesn't exist.
    pub async fn get_action(&self, action_id: u64) -> Result<Action, ClientError> {
        let url = Url::parse(&format!(
            "{}/api/projects/@current/actions/{}/",
            self.base(),
            action_id
        ))?;

        let response = self.build_request(url).send().await?;
        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response.text().await?;
                serde_json::from_str(&body).map_err(|e| {
                    ClientError::Malformed(format!("action {} is not valid: {}", action_id, e))
                })
            }
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(format!("Action {}", action_id))),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ClientError::Api {
                    status: status.as_u16(),
                    message: body,
                })
            }
        }
    }
}

/// Validates and converts a raw page body.
///
/// A page must be an object carrying a `results` array and a `next` key
/// (which may be null).
pub fn parse_event_page(value: JsonValue) -> Result<EventPage, ClientError> {
    let mut object = match value {
        JsonValue::Object(object) => object,
        _ => return Err(ClientError::Malformed("page is not an object".to_string())),
    };

    let next = match object.remove("next") {
        None => return Err(ClientError::Malformed("missing next field".to_string())),
        Some(JsonValue::Null) => None,
        Some(JsonValue::String(next)) if next.is_empty() => None,
        Some(JsonValue::String(next)) => Some(next),
        Some(other) => {
            return Err(ClientError::Malformed(format!(
                "next is not a URL: {}",
                other
            )))
        }
    };

    let results = match object.remove("results") {
        Some(results @ JsonValue::Array(_)) => results,
        _ => return Err(ClientError::Malformed("missing results list".to_string())),
    };
    let results: Vec<Event> = serde_json::from_value(results)
        .map_err(|e| ClientError::Malformed(format!("results are not events: {}", e)))?;

    Ok(EventPage { results, next })
}

#[async_trait]
impl EventSource for PostHogClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<EventPage, ClientError> {
        self.fetch_events_page(request).await
    }
}

#[async_trait]
impl PersonLookup for PostHogClient {
    async fn find_person(&self, distinct_id: &str) -> Result<Option<Person>, ClientError> {
        PostHogClient::find_person(self, distinct_id).await
    }
}
