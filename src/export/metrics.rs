//! Export cycle metrics
//!
//! Counters and histograms are recorded through the `metrics` facade. No
//! recorder is installed by this crate, so they are no-ops unless the
//! embedding process installs one.
//!
//! # Metrics
//!
//! - `gclid_export_events_fetched_total`: Events received from the source
//! - `gclid_export_fetch_retries_total`: Page fetches scheduled for retry
//! - `gclid_export_conversions_total`: Conversion records produced
//! - `gclid_export_unconvertible_total`: Matched events without a gclid
//! - `gclid_export_deliveries_total`: Webhook batches, by `outcome`
//! - `gclid_export_cycles_total`: Completed cycles, by `status`
//! - `gclid_export_cycle_duration_seconds`: Cycle wall time
//!
//! # Examples
//!
//! ```
//! use gclid_export::export::metrics::CycleMetrics;
//!
//! let metrics = CycleMetrics::start();
//! metrics.record_completion("advanced", 3);
//! ```

use metrics::{counter, histogram, increment_counter};
use std::cell::Cell;
use std::time::Instant;

/// Metrics for a single export cycle.
///
/// Records at most once; dropping without recording counts as an
/// abandoned cycle.
#[derive(Debug)]
pub struct CycleMetrics {
    start: Instant,
    recorded: Cell<bool>,
}

impl CycleMetrics {
    /// Starts timing a cycle.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            recorded: Cell::new(false),
        }
    }

    /// Seconds since the cycle started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Records a completed cycle.
    ///
    /// `status` is `advanced` when the watermark moved and `held` when at
    /// least one action failed.
    pub fn record_completion(&self, status: &str, delivered: usize) {
        if self.recorded.replace(true) {
            return;
        }

        increment_counter!("gclid_export_cycles_total", "status" => status.to_string());
        counter!("gclid_export_delivered_records_total", delivered as u64);
        histogram!(
            "gclid_export_cycle_duration_seconds",
            self.elapsed_secs(),
            "status" => status.to_string()
        );
    }

    /// Records a cycle aborted by an error.
    pub fn record_error(&self, error_type: &str) {
        if self.recorded.replace(true) {
            return;
        }

        increment_counter!(
            "gclid_export_cycles_total",
            "status" => "error",
            "error_type" => error_type.to_string()
        );
    }

    /// Whether a result was already recorded.
    pub fn is_recorded(&self) -> bool {
        self.recorded.get()
    }
}

impl Drop for CycleMetrics {
    fn drop(&mut self) {
        if !self.recorded.get() {
            increment_counter!("gclid_export_cycles_total", "status" => "abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_completion_once() {
        let metrics = CycleMetrics::start();
        assert!(!metrics.is_recorded());
        metrics.record_completion("advanced", 2);
        assert!(metrics.is_recorded());
        metrics.record_error("delivery");
        assert!(metrics.is_recorded());
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let metrics = CycleMetrics::start();
        let first = metrics.elapsed_secs();
        assert!(metrics.elapsed_secs() >= first);
        metrics.record_error("storage");
    }

    #[test]
    fn test_drop_without_recording() {
        let metrics = CycleMetrics::start();
        drop(metrics);
    }
}
