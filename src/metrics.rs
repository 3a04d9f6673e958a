//! Prometheus metrics for bounded downstream resolution
//!
//! Exposes pool occupancy gauges alongside per-operation batch counters.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    /// Permits currently checked out, per pool
    static ref SEMAPHORE_CURRENT: IntGaugeVec = register_int_gauge_vec!(
        "fedgate_semaphore_current",
        "Number of units of work holding a permit",
        &["pool"]
    ).expect("fedgate_semaphore_current registers once");

    /// Pool capacity, per pool
    static ref SEMAPHORE_MAX: IntGaugeVec = register_int_gauge_vec!(
        "fedgate_semaphore_max",
        "Maximum number of concurrent units of work allowed by the pool",
        &["pool"]
    ).expect("fedgate_semaphore_max registers once");

    /// Per-item failures by operation and error type
    static ref ITEM_ERRORS: IntCounterVec = register_int_counter_vec!(
        "fedgate_item_errors_total",
        "Total number of failed item lookups",
        &["operation", "error_type"]
    ).expect("fedgate_item_errors_total registers once");

    /// Items dispatched by operation
    static ref BATCH_ITEMS: IntCounterVec = register_int_counter_vec!(
        "fedgate_batch_items_total",
        "Total number of ids submitted to batch operations",
        &["operation"]
    ).expect("fedgate_batch_items_total registers once");

    /// Whole-batch latency
    static ref BATCH_DURATION: HistogramVec = register_histogram_vec!(
        "fedgate_batch_duration_seconds",
        "Batch resolution duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("fedgate_batch_duration_seconds registers once");
}

/// Publish pool occupancy
pub fn record_pool_occupancy(pool: &str, current: usize, max: usize) {
    SEMAPHORE_CURRENT
        .with_label_values(&[pool])
        .set(current as i64);
    SEMAPHORE_MAX.with_label_values(&[pool]).set(max as i64);
}

/// Count one failed item
pub fn record_item_error(operation: &str, error_type: &str) {
    ITEM_ERRORS
        .with_label_values(&[operation, error_type])
        .inc();
}

/// Record a finished batch
pub fn record_batch(operation: &str, items: usize, duration_secs: f64) {
    BATCH_ITEMS
        .with_label_values(&[operation])
        .inc_by(items as u64);
    BATCH_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Render the default registry in the Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
