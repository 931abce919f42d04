//! Command handlers for the CLI
//!
//! - `run`: One export cycle
//! - `watch`: Export cycles on an interval until interrupted
//! - `validate`: Configuration and definition check
//! - `watermark`: Watermark inspection and override

use crate::config::Config;
use crate::conversion::ConversionExtractor;
use crate::definitions::load_definitions;
use crate::error::Result;
use crate::export::{
    CycleReport, DeliveryBatcher, ExportSession, FetchController, WebhookSink,
};
use crate::posthog::{PostHogClient, PostHogClientConfig};
use crate::storage::{bootstrap_watermark, default_state_path, SledWatermarkStore, WatermarkStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Watermark database path from config, or the per-user default.
pub fn state_path(config: &Config) -> Result<PathBuf> {
    match &config.export.state_path {
        Some(path) => Ok(path.clone()),
        None => default_state_path(),
    }
}

/// Opens the configured watermark store.
pub fn open_store(config: &Config) -> Result<Arc<dyn WatermarkStore>> {
    let path = state_path(config)?;
    Ok(Arc::new(SledWatermarkStore::open(path)?))
}

/// Builds the PostHog client from config.
pub fn posthog_client(config: &Config) -> Result<PostHogClient> {
    let client = PostHogClient::new(PostHogClientConfig {
        base_url: config.posthog.host.clone(),
        personal_api_key: config.personal_api_key().to_string(),
        timeout_secs: config.posthog.timeout_secs,
    })?;
    Ok(client)
}

/// Validates config, bootstraps the watermark and assembles a session.
pub async fn build_session(config: &Config, store: Arc<dyn WatermarkStore>) -> Result<ExportSession> {
    config.validate()?;
    let mappings = config.export.mappings()?;

    bootstrap_watermark(
        store.as_ref(),
        config.export.initial_last_invoked_at.as_deref(),
    )?;

    let client = Arc::new(posthog_client(config)?);
    let definitions = load_definitions(
        &mappings,
        config.export.definitions_file.as_deref(),
        &client,
    )
    .await?;

    let action_ids: Vec<u64> = mappings.iter().map(|m| m.action_id).collect();
    let controller = FetchController::new(
        client.clone(),
        &action_ids,
        config.export.retry_policy(),
    );
    let extractor = ConversionExtractor::new(definitions, config.export.timestamp_policy)
        .with_person_lookup(client);

    let webhook_url = config.webhook.url.as_deref().unwrap_or_default();
    let sink = Arc::new(WebhookSink::new(webhook_url, config.webhook.timeout_secs)?);

    Ok(ExportSession::new(
        controller,
        extractor,
        DeliveryBatcher::new(sink),
        store,
    ))
}

fn print_report(report: &CycleReport) {
    println!(
        "fetched {} events, delivered {} conversions",
        report.events_fetched, report.delivered
    );
    if report.failed.is_empty() {
        println!(
            "watermark advanced to {}",
            crate::conversion::render_watermark(report.watermark_after)
        );
    } else {
        println!(
            "watermark held at {} (failed actions: {:?})",
            crate::conversion::render_watermark(report.watermark_after),
            report.failed
        );
    }
}

// One-shot export
pub mod r#run {
    use super::*;

    /// Runs a single export cycle.
    pub async fn run_once(config: Config) -> Result<CycleReport> {
        let store = open_store(&config)?;
        let mut session = build_session(&config, store).await?;

        tracing::info!("Starting export cycle");
        let report = session.run_cycle().await?;
        print_report(&report);
        Ok(report)
    }
}

// Continuous export
pub mod watch {
    use super::*;
    use crate::error::ExportError;
    use std::future::Future;
    use std::time::Duration;

    /// Whether an error should stop the watch loop.
    pub fn is_fatal(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<ExportError>(),
            Some(ExportError::UnsupportedFilterType(_))
                | Some(ExportError::InvalidWatermark(_))
                | Some(ExportError::MissingWatermark)
                | Some(ExportError::Storage(_))
        )
    }

    /// Runs export cycles every `interval_secs` until ctrl-c.
    pub async fn run_watch(config: Config, interval_secs: Option<u64>) -> Result<()> {
        let store = open_store(&config)?;
        let mut session = build_session(&config, store).await?;

        let period = Duration::from_secs(interval_secs.unwrap_or(config.export.poll_interval_secs).max(1));
        tracing::info!(interval_secs = period.as_secs(), "Watching for conversions");

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };
        watch_until(&mut session, period, shutdown).await?;
        Ok(())
    }

    /// Runs cycles every `period` until `shutdown` resolves, returning the
    /// number of completed cycles.
    ///
    /// Shutdown also interrupts a cycle in flight; its watermark is left
    /// unchanged.
    pub async fn watch_until<F>(session: &mut ExportSession, period: Duration, shutdown: F) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut completed = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Interrupted; stopping");
                    return Ok(completed);
                }
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Interrupted mid-cycle; watermark unchanged");
                    return Ok(completed);
                }
                result = session.run_cycle() => match result {
                    Ok(report) => {
                        completed += 1;
                        print_report(&report);
                    }
                    Err(e) if is_fatal(&e) => return Err(e),
                    Err(e) => tracing::error!(error = %e, "Export cycle failed; retrying next interval"),
                }
            }
        }
    }
}

// Configuration check
pub mod validate {
    use super::*;

    /// Loads definitions and prints what would be tracked.
    pub async fn run_validate(config: Config) -> Result<()> {
        config.validate()?;
        let mappings = config.export.mappings()?;
        let client = posthog_client(&config)?;
        let definitions = load_definitions(
            &mappings,
            config.export.definitions_file.as_deref(),
            &client,
        )
        .await?;

        println!("configuration OK");
        for definition in &definitions {
            println!(
                "action {} '{}': event '{}', {} property filter(s)",
                definition.id,
                definition.conversion_name,
                definition.event_name,
                definition.properties.len()
            );
        }
        Ok(())
    }
}

// Watermark inspection
pub mod watermark {
    use super::*;
    use crate::conversion::render_watermark;
    use crate::storage::{load_watermark, set_watermark};

    /// Prints the persisted watermark.
    pub fn show(config: &Config) -> Result<()> {
        let store = open_store(config)?;
        if store.get()?.is_none() {
            println!("watermark not set");
            return Ok(());
        }
        let watermark = load_watermark(store.as_ref())?;
        println!("{}", render_watermark(watermark));
        Ok(())
    }

    /// Overwrites the persisted watermark.
    pub fn set(config: &Config, timestamp: &str) -> Result<()> {
        let store = open_store(config)?;
        let watermark = set_watermark(store.as_ref(), timestamp)?;
        tracing::info!(watermark = %render_watermark(watermark), "Watermark overridden");
        println!("{}", render_watermark(watermark));
        Ok(())
    }
}
