//! Error types for gclid-export
//!
//! This module defines the error taxonomy used throughout the exporter,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for export operations
///
/// Configuration and definition errors abort setup before any cycle runs.
/// Fetch errors are retried by the fetch controller and only reach callers
/// once the retry budget is spent. Delivery errors fail the cycle that
/// produced them.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Configuration-related errors (missing settings, bad values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed or incomplete action definitions
    #[error("Definition error: {0}")]
    Definition(String),

    /// A property filter uses a scope other than `event`
    #[error("Unsupported property filter type: {0}")]
    UnsupportedFilterType(String),

    /// Persisted watermark could not be parsed as a timestamp
    #[error("Invalid watermark: {0}")]
    InvalidWatermark(String),

    /// No watermark has been persisted yet
    #[error("Missing watermark: the exporter has not been bootstrapped")]
    MissingWatermark,

    /// Event source fetch errors
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Webhook delivery errors
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Watermark storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for export operations
///
/// Uses `anyhow::Error` so that typed [`ExportError`] values can carry
/// additional context while remaining recoverable with `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;
