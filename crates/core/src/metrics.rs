//! Prometheus metrics for the order pipeline.
//!
//! Collectors are created lazily and registered by the server through
//! [`all_metrics`].

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Items
// =============================================================================

/// Items that finished processing, by outcome.
pub static ITEMS_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("oseo_items_processed_total", "Total items processed"),
        &["outcome"], // "completed", "failed", "stopped", "not_started"
    )
    .expect("valid metric definition")
});

/// Time spent driving one item from start to its final status.
pub static ITEM_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "oseo_item_duration_seconds",
            "Duration of item processing",
        )
        .buckets(vec![
            0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0,
        ]),
        &["outcome"],
    )
    .expect("valid metric definition")
});

/// Step retries after transient failures, by step.
pub static STEP_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("oseo_step_retries_total", "Total step retries"),
        &["step"], // "resolve", "fetch", "customize", "place"
    )
    .expect("valid metric definition")
});

/// Step failures that ended an item, by step.
pub static STEP_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("oseo_step_failures_total", "Total unrecoverable step failures"),
        &["step"],
    )
    .expect("valid metric definition")
});

// =============================================================================
// Batches and orders
// =============================================================================

/// Batches whose items all returned, by aggregate status.
pub static BATCHES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("oseo_batches_processed_total", "Total batches processed"),
        &["status"],
    )
    .expect("valid metric definition")
});

/// Orders whose submission finished, by resulting order status.
pub static ORDERS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("oseo_orders_finished_total", "Total order submissions finished"),
        &["status"],
    )
    .expect("valid metric definition")
});

/// Administrative cancellations, by scope.
pub static CANCELLATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("oseo_cancellations_total", "Total cancellation requests"),
        &["scope"], // "order", "batch", "item"
    )
    .expect("valid metric definition")
});

/// Download acknowledgements.
pub static DOWNLOADS_ACKNOWLEDGED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "oseo_downloads_acknowledged_total",
            "Total item download acknowledgements",
        ),
        &["first"], // "true" on Completed -> Downloaded
    )
    .expect("valid metric definition")
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Items
        Box::new(ITEMS_PROCESSED.clone()),
        Box::new(ITEM_DURATION.clone()),
        Box::new(STEP_RETRIES.clone()),
        Box::new(STEP_FAILURES.clone()),
        // Batches and orders
        Box::new(BATCHES_PROCESSED.clone()),
        Box::new(ORDERS_FINISHED.clone()),
        Box::new(CANCELLATIONS.clone()),
        Box::new(DOWNLOADS_ACKNOWLEDGED.clone()),
    ]
}
