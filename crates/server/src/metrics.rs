//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the OSEO daemon:
//! - HTTP request metrics (latency, counts)
//! - Orchestrator load (collected dynamically)
//! - Orders by status (collected dynamically)
//! - Pipeline counters registered from the core crate

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use oseo_core::{OrderFilter, Status};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "oseo_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .expect("valid metric definition")
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("oseo_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("valid metric definition")
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "oseo_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Orchestrator Metrics (collected dynamically)
// =============================================================================

/// Whether background submissions are accepted (1) or shutdown began (0).
pub static ORCHESTRATOR_ACCEPTING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "oseo_orchestrator_accepting",
        "Whether the orchestrator accepts new submissions",
    )
    .expect("valid metric definition")
});

pub static ORDERS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "oseo_orders_in_flight",
        "Orders whose submission is currently running",
    )
    .expect("valid metric definition")
});

pub static ITEMS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "oseo_items_in_flight",
        "Items currently inside the pipeline steps",
    )
    .expect("valid metric definition")
});

/// Stored orders by current status.
pub static ORDERS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("oseo_orders_by_status", "Current order count by status"),
        &["status"],
    )
    .expect("valid metric definition")
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // HTTP
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        // Orchestrator
        Box::new(ORCHESTRATOR_ACCEPTING.clone()),
        Box::new(ORDERS_IN_FLIGHT.clone()),
        Box::new(ITEMS_IN_FLIGHT.clone()),
        Box::new(ORDERS_BY_STATUS.clone()),
    ];

    // Core metrics (items, batches, orders)
    for metric in collectors.into_iter().chain(oseo_core::metrics::all_metrics()) {
        if let Err(e) = registry.register(metric) {
            tracing::error!("Failed to register metric: {}", e);
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the orchestrator and store.
pub fn collect_dynamic_metrics(state: &AppState) {
    let status = state.orchestrator().status();
    ORCHESTRATOR_ACCEPTING.set(i64::from(status.accepting));
    ORDERS_IN_FLIGHT.set(status.orders_in_flight as i64);
    ITEMS_IN_FLIGHT.set(status.items_in_flight as i64);

    for order_status in Status::ALL {
        let filter = OrderFilter::new().with_status(order_status);
        if let Ok(count) = state.orchestrator().count_orders(&filter) {
            ORDERS_BY_STATUS
                .with_label_values(&[order_status.as_str()])
                .set(count);
        }
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if is_uuid(segment) || (!segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_uuid(segment: &str) -> bool {
    segment.len() == 36
        && segment.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}
