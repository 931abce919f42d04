//! gclid-export - PostHog to Google Ads offline conversion exporter
//!
//! Main entry point for the exporter binary.

use anyhow::Result;

use gclid_export::cli::{Cli, Commands, WatermarkCommand};
use gclid_export::commands;
use gclid_export::config::Config;
use gclid_export::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    init_logging(&config.logging)?;

    match cli.command {
        Commands::Run => {
            commands::run::run_once(config).await?;
            Ok(())
        }
        Commands::Watch { interval_secs } => {
            tracing::info!("Starting watch mode");
            commands::watch::run_watch(config, interval_secs).await
        }
        Commands::Validate => commands::validate::run_validate(config).await,
        Commands::Watermark { command } => match command {
            WatermarkCommand::Show => commands::watermark::show(&config),
            WatermarkCommand::Set { timestamp } => commands::watermark::set(&config, &timestamp),
        },
    }
}
