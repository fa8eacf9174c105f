//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator dispatch and completion per worker pool
//! - Remote size probes
//! - Run outcomes

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

// =============================================================================
// Orchestrator - Task Metrics
// =============================================================================

/// Tasks dispatched by pool.
pub static TASKS_DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("opensite_tasks_dispatched_total", "Total tasks dispatched"),
        &["pool"], // "io_bound", "cpu_bound", "inline"
    )
    .unwrap()
});

/// Tasks finished by resulting node action.
pub static TASKS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("opensite_tasks_finished_total", "Total tasks finished"),
        &["status"],
    )
    .unwrap()
});

/// Task duration in seconds.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "opensite_task_duration_seconds",
            "Duration of dispatched tasks",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["pool"],
    )
    .unwrap()
});

// =============================================================================
// Orchestrator - Scheduling Metrics
// =============================================================================

/// Remote size probes by result.
pub static SIZE_PROBES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("opensite_size_probes_total", "Total remote size probes"),
        &["result"], // "known", "unknown"
    )
    .unwrap()
});

/// Orchestration runs by outcome.
pub static RUN_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("opensite_run_outcomes_total", "Total orchestration runs"),
        &["outcome"], // "completed", "stalled"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_DISPATCHED.clone()),
        Box::new(TASKS_FINISHED.clone()),
        Box::new(TASK_DURATION.clone()),
        Box::new(SIZE_PROBES.clone()),
        Box::new(RUN_OUTCOMES.clone()),
    ]
}

/// Register every core metric with `registry`.
pub fn register_core_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}
