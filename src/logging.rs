//! Structured logging setup
//!
//! Provides JSON-formatted and human-readable logging with optional file output.

use crate::config::LoggingConfig;
use anyhow::Result;
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging based on configuration.
///
/// `RUST_LOG` takes precedence over the configured level. Logs go to
/// stderr so that command output on stdout stays machine readable.
///
/// # Examples
///
/// ```no_run
/// use gclid_export::config::LoggingConfig;
/// use gclid_export::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     json_format: true,
///     file_path: None,
/// };
///
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let file = match &config.file_path {
        Some(path) => Some(Arc::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    if config.json_format {
        let stderr_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);

        match file {
            Some(file) => {
                let file_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(file);
                registry.with(stderr_layer).with(file_layer).try_init()?;
            }
            None => registry.with(stderr_layer).try_init()?,
        }
    } else {
        let stderr_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_writer(std::io::stderr);

        match file {
            Some(file) => {
                let file_layer = fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(false)
                    .with_writer(file);
                registry.with(stderr_layer).with(file_layer).try_init()?;
            }
            None => registry.with(stderr_layer).try_init()?,
        }
    }

    Ok(())
}
