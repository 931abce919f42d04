//! gclid-export - PostHog conversion exporter library
//!
//! Fetches events for tracked PostHog actions since a persisted watermark,
//! decides which events are conversions, resolves the visitor's Google
//! click identifier (gclid) and posts the resulting records to a webhook.
//!
//! # Architecture
//!
//! - `matching`: Operator evaluation, autocapture and definition matching
//! - `conversion`: Conversion records, gclid resolution, timestamp policies
//! - `definitions`: Action map parsing and action definition loading
//! - `posthog`: PostHog API client and wire types
//! - `export`: Fetch controller, delivery batcher and the cycle driver
//! - `storage`: Watermark persistence
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line surface
//!
//! # Example
//!
//! ```no_run
//! use gclid_export::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = gclid_export::cli::Cli::parse_args();
//!     let config = Config::load("config.yaml", &cli)?;
//!     config.validate()?;
//!     let report = gclid_export::commands::run::run_once(config).await?;
//!     println!("delivered {}", report.delivered);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod conversion;
pub mod definitions;
pub mod error;
pub mod export;
pub mod logging;
pub mod matching;
pub mod posthog;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use conversion::{ConversionExtractor, ConversionRecord, TimestampPolicy};
pub use error::{ExportError, Result};
pub use export::{CycleReport, ExportSession, TickOutcome};
pub use matching::{evaluate, ActionDefinition, Operator};

#[cfg(test)]
pub mod test_utils;
