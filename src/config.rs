//! Configuration management for gclid-export
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::conversion::timestamp::{parse_timestamp, TimestampPolicy};
use crate::definitions::{parse_action_map, ActionMapping};
use crate::error::{ExportError, Result};
use crate::export::fetch::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration structure for gclid-export
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// PostHog instance and credentials
    #[serde(default)]
    pub posthog: PostHogConfig,
    /// Delivery webhook
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Export behaviour
    #[serde(default)]
    pub export: ExportConfig,
    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// PostHog API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostHogConfig {
    /// Base URL of the PostHog instance
    #[serde(default = "default_posthog_host")]
    pub host: String,

    /// Personal API key used as a bearer token
    #[serde(default)]
    pub personal_api_key: Option<String>,

    /// Request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_posthog_host() -> String {
    "http://app.posthog.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for PostHogConfig {
    fn default() -> Self {
        Self {
            host: default_posthog_host(),
            personal_api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Target URL receiving conversion batches
    #[serde(default)]
    pub url: Option<String>,

    /// Request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Export behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Tracked actions as `<action id>:<conversion name>,...`
    #[serde(default)]
    pub action_map: Option<String>,

    /// Local JSON file of actions; when unset, actions are fetched from the API
    #[serde(default)]
    pub definitions_file: Option<PathBuf>,

    /// Watermark seeded on first start; defaults to the current time
    #[serde(default)]
    pub initial_last_invoked_at: Option<String>,

    /// Timestamp formatting for delivered records
    #[serde(default)]
    pub timestamp_policy: TimestampPolicy,

    /// Watermark database path; defaults to the user data directory
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    /// Retries per page after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between page retries (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Delay between cycles in watch mode (seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_poll_interval_secs() -> u64 {
    60
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            action_map: None,
            definitions_file: None,
            initial_last_invoked_at: None,
            timestamp_policy: TimestampPolicy::default(),
            state_path: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl ExportConfig {
    /// Retry policy for page fetches.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Parsed action map.
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Config` if the map is missing or malformed.
    pub fn mappings(&self) -> Result<Vec<ActionMapping>> {
        let raw = self
            .action_map
            .as_deref()
            .ok_or_else(|| ExportError::Config("export.action_map is required".to_string()))?;
        parse_action_map(raw)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (`RUST_LOG` takes precedence)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON instead of human-readable lines
    #[serde(default)]
    pub json_format: bool,

    /// Optional file receiving a copy of the log
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file falls back to defaults so that the exporter can be
    /// configured through `GCLID_EXPORT_*` variables alone.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ExportError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ExportError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(host) = std::env::var("GCLID_EXPORT_POSTHOG_HOST") {
            self.posthog.host = host;
        }

        if let Ok(key) = std::env::var("GCLID_EXPORT_PERSONAL_API_KEY") {
            self.posthog.personal_api_key = Some(key);
        }

        if let Ok(url) = std::env::var("GCLID_EXPORT_WEBHOOK_URL") {
            self.webhook.url = Some(url);
        }

        if let Ok(action_map) = std::env::var("GCLID_EXPORT_ACTION_MAP") {
            self.export.action_map = Some(action_map);
        }

        if let Ok(initial) = std::env::var("GCLID_EXPORT_INITIAL_LAST_INVOKED_AT") {
            self.export.initial_last_invoked_at = Some(initial);
        }

        if let Ok(path) = std::env::var("GCLID_EXPORT_STATE_PATH") {
            self.export.state_path = Some(PathBuf::from(path));
        }

        if let Ok(policy) = std::env::var("GCLID_EXPORT_TIMESTAMP_POLICY") {
            match TimestampPolicy::parse(&policy) {
                Some(value) => self.export.timestamp_policy = value,
                None => tracing::warn!("Invalid GCLID_EXPORT_TIMESTAMP_POLICY: {}", policy),
            }
        }

        if let Ok(retries) = std::env::var("GCLID_EXPORT_MAX_RETRIES") {
            if let Ok(value) = retries.parse() {
                self.export.max_retries = value;
            } else {
                tracing::warn!("Invalid GCLID_EXPORT_MAX_RETRIES: {}", retries);
            }
        }

        if let Ok(interval) = std::env::var("GCLID_EXPORT_POLL_INTERVAL_SECS") {
            if let Ok(value) = interval.parse() {
                self.export.poll_interval_secs = value;
            } else {
                tracing::warn!("Invalid GCLID_EXPORT_POLL_INTERVAL_SECS: {}", interval);
            }
        }

        if let Ok(level) = std::env::var("GCLID_EXPORT_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json) = std::env::var("GCLID_EXPORT_JSON_LOGS") {
            if let Ok(value) = json.parse() {
                self.logging.json_format = value;
            } else {
                tracing::warn!("Invalid GCLID_EXPORT_JSON_LOGS: {}", json);
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }

        if let Some(path) = &cli.state_path {
            self.export.state_path = Some(path.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ExportError::Config` when the action map, webhook URL or
    /// personal API key is missing, a URL does not parse, the initial
    /// watermark is not a date, or a retry/poll setting is zero.
    pub fn validate(&self) -> Result<()> {
        self.export.mappings()?;

        let webhook = self
            .webhook
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ExportError::Config("webhook.url is required".to_string()))?;
        Url::parse(webhook)
            .map_err(|e| ExportError::Config(format!("webhook.url is not a valid URL: {}", e)))?;

        Url::parse(&self.posthog.host)
            .map_err(|e| ExportError::Config(format!("posthog.host is not a valid URL: {}", e)))?;

        if self
            .posthog
            .personal_api_key
            .as_deref()
            .map_or(true, str::is_empty)
        {
            return Err(
                ExportError::Config("posthog.personal_api_key is required".to_string()).into(),
            );
        }

        if let Some(initial) = &self.export.initial_last_invoked_at {
            if parse_timestamp(initial).is_none() {
                return Err(ExportError::Config(format!(
                    "export.initial_last_invoked_at '{}' is not a valid ISO date",
                    initial
                ))
                .into());
            }
        }

        if self.export.max_retries == 0 {
            return Err(
                ExportError::Config("export.max_retries must be greater than 0".to_string())
                    .into(),
            );
        }

        if self.export.poll_interval_secs == 0 {
            return Err(ExportError::Config(
                "export.poll_interval_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.posthog.timeout_secs == 0 || self.webhook.timeout_secs == 0 {
            return Err(
                ExportError::Config("timeouts must be greater than 0".to_string()).into(),
            );
        }

        Ok(())
    }

    /// The personal API key, or an empty string when unset.
    pub fn personal_api_key(&self) -> &str {
        self.posthog.personal_api_key.as_deref().unwrap_or_default()
    }
}
