//! Command-line interface definition for gclid-export
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for one-shot export, continuous export,
//! configuration validation, and watermark inspection.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gclid-export - Export PostHog conversions with Google click ids
///
/// Fetches events for tracked actions since the last run, resolves the
/// visitor's gclid, and posts conversion records to a webhook.
#[derive(Parser, Debug, Clone)]
#[command(name = "gclid-export")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the watermark database path
    #[arg(long, env = "GCLID_EXPORT_STATE_PATH")]
    pub state_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for gclid-export
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run one export cycle and exit
    Run,

    /// Run export cycles continuously until interrupted
    Watch {
        /// Seconds between cycles (overrides export.poll_interval_secs)
        #[arg(short, long)]
        interval_secs: Option<u64>,
    },

    /// Validate configuration and action definitions
    Validate,

    /// Inspect or override the persisted watermark
    Watermark {
        /// Watermark subcommand
        #[command(subcommand)]
        command: WatermarkCommand,
    },
}

/// Watermark management subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum WatermarkCommand {
    /// Print the current watermark
    Show,

    /// Overwrite the watermark with an ISO-8601 timestamp
    Set {
        /// New watermark, e.g. 2021-11-09T00:00:00Z
        timestamp: String,
    },
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["gclid-export", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run));
        assert_eq!(cli.config.as_deref(), Some("config/config.yaml"));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "gclid-export",
            "--config",
            "custom.yaml",
            "-v",
            "--state-path",
            "/tmp/state",
            "validate",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("custom.yaml"));
        assert!(cli.verbose);
        assert_eq!(cli.state_path, Some(PathBuf::from("/tmp/state")));
        assert!(matches!(cli.command, Commands::Validate));
    }

    #[test]
    fn test_cli_parse_watch_interval() {
        let cli = Cli::try_parse_from(["gclid-export", "watch", "--interval-secs", "30"]).unwrap();
        match cli.command {
            Commands::Watch { interval_secs } => assert_eq!(interval_secs, Some(30)),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_watermark_set() {
        let cli =
            Cli::try_parse_from(["gclid-export", "watermark", "set", "2021-11-09T00:00:00Z"]).unwrap();
        match cli.command {
            Commands::Watermark {
                command: WatermarkCommand::Set { timestamp },
            } => assert_eq!(timestamp, "2021-11-09T00:00:00Z"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["gclid-export"]).is_err());
    }
}
