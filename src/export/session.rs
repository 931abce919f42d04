//! Export session
//!
//! Owns everything one exporter instance needs between ticks: the fetch
//! controller, the extractor, the delivery batcher and the watermark
//! store. An external scheduler calls [`ExportSession::tick`]; each call
//! performs one step of the current cycle.

use crate::conversion::timestamp::render_watermark;
use crate::conversion::ConversionExtractor;
use crate::error::{ExportError, Result};
use crate::export::delivery::DeliveryBatcher;
use crate::export::fetch::{ActionOutcome, FetchController};
use crate::export::metrics::CycleMetrics;
use crate::storage::{advance_watermark, load_watermark, WatermarkStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a single [`ExportSession::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A new cycle was started from the persisted watermark
    Started,
    /// Page requests were issued or are waiting on backoff
    InProgress,
    /// The cycle finished
    Completed(CycleReport),
}

/// Summary of a finished cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Watermark the cycle fetched from
    pub watermark_before: DateTime<Utc>,
    /// Watermark after the cycle
    pub watermark_after: DateTime<Utc>,
    /// Events fetched by drained actions
    pub events_fetched: usize,
    /// Records sent to the webhook
    pub delivered: usize,
    /// Actions that drained
    pub drained: Vec<u64>,
    /// Actions that exhausted their retries
    pub failed: Vec<u64>,
}

impl CycleReport {
    /// Whether the watermark moved forward.
    pub fn advanced(&self) -> bool {
        self.watermark_after > self.watermark_before
    }
}

struct CycleState {
    watermark: DateTime<Utc>,
    started_at: DateTime<Utc>,
    metrics: CycleMetrics,
}

/// One exporter instance, driven tick by tick.
pub struct ExportSession {
    controller: FetchController,
    extractor: ConversionExtractor,
    batcher: DeliveryBatcher,
    store: Arc<dyn WatermarkStore>,
    cycle: Option<CycleState>,
}

impl ExportSession {
    /// Assembles a session. The watermark must already be bootstrapped.
    pub fn new(
        controller: FetchController,
        extractor: ConversionExtractor,
        batcher: DeliveryBatcher,
        store: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            controller,
            extractor,
            batcher,
            store,
            cycle: None,
        }
    }

    /// Whether no cycle is in flight.
    pub fn is_idle(&self) -> bool {
        self.controller.is_idle()
    }

    /// Performs one step.
    ///
    /// Starts a cycle when every action is idle, otherwise issues the next
    /// page request for each in-flight action. Once every action is
    /// drained or failed, converts the drained actions' events, delivers
    /// them as one batch and advances the watermark if no action failed.
    ///
    /// # Errors
    ///
    /// A missing or invalid watermark aborts before the cycle starts.
    /// Match-time configuration errors, delivery errors and storage errors
    /// abort the cycle; the session is idle again afterwards.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if self.controller.is_idle() {
            let watermark = load_watermark(self.store.as_ref())?;
            self.controller.start(&render_watermark(watermark))?;
            self.cycle = Some(CycleState {
                watermark,
                started_at: Utc::now(),
                metrics: CycleMetrics::start(),
            });
            return Ok(TickOutcome::Started);
        }

        if !self.controller.is_settled() {
            self.controller.step().await;
            return Ok(TickOutcome::InProgress);
        }

        let outcomes = self.controller.finish();
        let Some(cycle) = self.cycle.take() else {
            return Err(ExportError::Fetch("cycle state lost".to_string()).into());
        };

        match self.complete(cycle.watermark, cycle.started_at, outcomes).await {
            Ok(report) => {
                let status = if report.failed.is_empty() { "advanced" } else { "held" };
                cycle.metrics.record_completion(status, report.delivered);
                Ok(TickOutcome::Completed(report))
            }
            Err(e) => {
                self.batcher.clear();
                cycle.metrics.record_error(error_kind(&e));
                Err(e)
            }
        }
    }

    /// Ticks until the current (or a new) cycle completes.
    ///
    /// Sleeps through retry backoffs instead of spinning.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`tick`](Self::tick).
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        loop {
            if let TickOutcome::Completed(report) = self.tick().await? {
                return Ok(report);
            }
            if let Some(wait) = self.controller.time_until_ready() {
                debug!(wait_ms = wait.as_millis() as u64, "Waiting for retry backoff");
                tokio::time::sleep(wait).await;
            }
        }
    }

    async fn complete(
        &mut self,
        watermark: DateTime<Utc>,
        started_at: DateTime<Utc>,
        outcomes: Vec<ActionOutcome>,
    ) -> Result<CycleReport> {
        let mut drained = Vec::new();
        let mut failed = Vec::new();
        let mut events_fetched = 0;

        for outcome in &outcomes {
            match &outcome.failure {
                None => {
                    drained.push(outcome.action_id);
                    events_fetched += outcome.events.len();
                    for event in &outcome.events {
                        if let Some(record) = self.extractor.extract(event).await? {
                            self.batcher.push(record);
                        }
                    }
                }
                Some(reason) => {
                    warn!(
                        action_id = outcome.action_id,
                        reason = %reason,
                        "Action failed; watermark will not advance this cycle"
                    );
                    failed.push(outcome.action_id);
                }
            }
        }

        let delivered = self.batcher.flush().await?;

        let watermark_after = if failed.is_empty() {
            advance_watermark(self.store.as_ref(), started_at)?
        } else {
            watermark
        };

        info!(
            watermark_before = %render_watermark(watermark),
            watermark_after = %render_watermark(watermark_after),
            events = events_fetched,
            delivered,
            drained = drained.len(),
            failed = failed.len(),
            "Export cycle complete"
        );

        Ok(CycleReport {
            watermark_before: watermark,
            watermark_after,
            events_fetched,
            delivered,
            drained,
            failed,
        })
    }
}

fn error_kind(error: &anyhow::Error) -> &'static str {
    match error.downcast_ref::<ExportError>() {
        Some(ExportError::UnsupportedFilterType(_)) => "definition",
        Some(ExportError::Delivery(_)) => "delivery",
        Some(ExportError::Storage(_)) | Some(ExportError::InvalidWatermark(_)) => "storage",
        _ => "other",
    }
}
