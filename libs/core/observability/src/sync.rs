//! Metrics for catalog classification and bundle sync runs.

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Sync metrics recorder
pub struct SyncMetrics;

impl SyncMetrics {
    /// Record the outcome of syncing one bundle
    pub fn record_bundle_outcome(outcome: &str, bundle_type: &str) {
        counter!(
            "price_bundle_outcomes_total",
            "outcome" => outcome.to_string(),
            "bundle_type" => bundle_type.to_string()
        )
        .increment(1);
    }

    /// Record the outcome of syncing one price
    pub fn record_price_outcome(outcome: &str) {
        counter!("price_outcomes_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_service_plan_outcome(outcome: &str) {
        counter!("service_plan_outcomes_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_retries(operation: &str, retries: u64) {
        if retries > 0 {
            counter!("sync_retries_total", "operation" => operation.to_string()).increment(retries);
        }
    }

    /// Record one classified entry on `axis`
    pub fn record_classification(axis: &str) {
        counter!("sku_classifications_total", "axis" => axis.to_string()).increment(1);
    }

    pub fn record_classification_failure(reason: &str) {
        counter!("sku_classification_failures_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn record_sync_duration(command: &str, seconds: f64) {
        histogram!("sync_duration_seconds", "command" => command.to_string()).record(seconds);

        tracing::debug!(command = command, duration_secs = seconds, "Sync command finished");
    }

    pub fn set_coverage(percent: f64) {
        gauge!("sync_coverage_percent").set(percent);
    }

    pub fn set_catalog_records(count: usize) {
        gauge!("catalog_records_last_run").set(count as f64);
    }
}

/// Timer guard for command duration.
///
/// Records the duration when `stop()` is called or when dropped.
pub struct SyncTimer {
    start: Instant,
    command: String,
    stopped: bool,
}

impl SyncTimer {
    pub fn new(command: &str) -> Self {
        Self {
            start: Instant::now(),
            command: command.to_string(),
            stopped: false,
        }
    }

    /// Stop the timer and record the duration. Returns elapsed seconds.
    pub fn stop(&mut self) -> f64 {
        if self.stopped {
            return 0.0;
        }
        self.stopped = true;

        let seconds = self.start.elapsed().as_secs_f64();
        SyncMetrics::record_sync_duration(&self.command, seconds);
        seconds
    }
}

impl Drop for SyncTimer {
    fn drop(&mut self) {
        if !self.stopped {
            self.stop();
        }
    }
}
