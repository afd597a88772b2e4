//! Observability utilities for the price-bundle sync.
//!
//! This crate provides:
//! - Prometheus recorder installation and text rendering
//! - [`SyncMetrics`] for bundle, price, retry and classification counters
//!
//! # Example
//!
//! ```rust,ignore
//! use observability::{init_metrics, render_metrics, SyncMetrics};
//!
//! init_metrics()?;
//! SyncMetrics::record_bundle_outcome("created", "component");
//! println!("{}", render_metrics());
//! ```

pub mod sync;

pub use sync::{SyncMetrics, SyncTimer};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus metrics recorder.
///
/// The first call installs the global recorder; later calls return the same handle.
pub fn init_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    METRICS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics recorder initialized");
        register_metric_descriptions();
        Ok(handle)
    })
}

/// Get the metrics handle (must call init_metrics first)
pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Prometheus exposition text of everything recorded so far
pub fn render_metrics() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

/// Register metric descriptions for documentation
fn register_metric_descriptions() {
    use metrics::describe_counter;
    use metrics::describe_gauge;
    use metrics::describe_histogram;

    describe_counter!(
        "price_bundle_outcomes_total",
        "Bundle sync outcomes by outcome and bundle type"
    );
    describe_counter!(
        "price_outcomes_total",
        "Price sync outcomes by outcome"
    );
    describe_counter!(
        "service_plan_outcomes_total",
        "Service plan creation outcomes by outcome"
    );
    describe_counter!(
        "sync_retries_total",
        "Retries spent on remote calls by operation"
    );
    describe_counter!(
        "sku_classifications_total",
        "Classified price entries by resource axis"
    );
    describe_counter!(
        "sku_classification_failures_total",
        "SKUs dropped during classification by reason"
    );
    describe_histogram!(
        "sync_duration_seconds",
        "Wall time of a sync command"
    );
    describe_gauge!(
        "sync_coverage_percent",
        "Classified entries attached to a synced bundle, in percent"
    );
    describe_gauge!(
        "catalog_records_last_run",
        "Catalog records read in the last run"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent_and_renders() {
        let first = init_metrics().unwrap() as *const PrometheusHandle;
        let second = init_metrics().unwrap() as *const PrometheusHandle;
        assert_eq!(first, second);

        SyncMetrics::record_bundle_outcome("created", "component");
        SyncMetrics::record_retries("create_bundle", 2);
        let text = render_metrics();
        assert!(text.contains("price_bundle_outcomes_total"));
        assert!(text.contains("sync_retries_total"));
    }
}
