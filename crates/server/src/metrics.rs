//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the opensite status server:
//! - HTTP request metrics (latency, counts)
//! - Node counts per lifecycle action (collected from the latest snapshot)
//! - Core orchestrator metrics, registered from `opensite_core::metrics`

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

use opensite_core::NodeAction;

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
            "opensite_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("opensite_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "opensite_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Run Metrics (collected dynamically)
// =============================================================================

/// Nodes per lifecycle action.
pub static NODES_BY_ACTION: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("opensite_nodes", "Number of nodes per lifecycle action"),
        &["action"],
    )
    .unwrap()
});

/// Tasks dispatched and not yet completed.
pub static TASKS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "opensite_tasks_in_flight",
        "Number of dispatched tasks not yet completed",
    )
    .unwrap()
});

/// Whether a run is in progress (1 = running, 0 = idle or finished).
pub static RUN_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("opensite_run_active", "Whether an orchestration run is in progress")
        .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Run
    registry
        .register(Box::new(NODES_BY_ACTION.clone()))
        .unwrap();
    registry
        .register(Box::new(TASKS_IN_FLIGHT.clone()))
        .unwrap();
    registry.register(Box::new(RUN_ACTIVE.clone())).unwrap();

    // Core metrics (dispatch, completion, size probes, outcomes)
    opensite_core::metrics::register_core_metrics(registry).unwrap();
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Update run gauges from the latest orchestrator snapshot.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let snapshot = state.snapshot();

    RUN_ACTIVE.set(i64::from(snapshot.running));
    TASKS_IN_FLIGHT.set(snapshot.in_flight as i64);

    for action in NodeAction::ALL {
        let count = snapshot.counts.get(&action).copied().unwrap_or(0);
        NODES_BY_ACTION
            .with_label_values(&[action.as_str()])
            .set(count as i64);
    }
}
