//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Install sessions (attempts, duration, transport recoveries)
//! - Install queue (drops, depth)
//! - Batches and notifications

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Install Session Metrics
// =============================================================================

/// Install sessions by final result.
pub static INSTALL_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "resigner_install_attempts_total",
            "Total install sessions by result",
        ),
        &["result"], // "succeeded", "account_invalid", "failed"
    )
    .unwrap()
});

/// Install session duration in seconds, including any retry.
pub static INSTALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "resigner_install_duration_seconds",
            "Duration of install sessions",
        )
        .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0]),
        &["result"],
    )
    .unwrap()
});

/// Transport daemon restarts.
pub static TRANSPORT_RECOVERIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "resigner_transport_recoveries_total",
        "Device transport restarts triggered by install sessions",
    )
    .unwrap()
});

// =============================================================================
// Queue Metrics
// =============================================================================

/// Requests that never reached the worker.
pub static QUEUE_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "resigner_queue_dropped_total",
            "Refresh requests dropped at submission",
        ),
        &["reason"], // "full", "not_running"
    )
    .unwrap()
});

/// Requests waiting in the queue.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("resigner_queue_depth", "Refresh requests waiting").unwrap()
});

// =============================================================================
// Batch / Notification Metrics
// =============================================================================

/// Finalized batches by outcome.
pub static BATCHES_FINALIZED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "resigner_batches_finalized_total",
            "Batches that completed",
        ),
        &["outcome"], // "all_succeeded", "with_failures"
    )
    .unwrap()
});

/// Notifications sent by result.
pub static NOTIFICATIONS_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "resigner_notifications_total",
            "Batch failure notifications",
        ),
        &["notifier", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Sessions
        Box::new(INSTALL_ATTEMPTS.clone()),
        Box::new(INSTALL_DURATION.clone()),
        Box::new(TRANSPORT_RECOVERIES.clone()),
        // Queue
        Box::new(QUEUE_DROPPED.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        // Batches
        Box::new(BATCHES_FINALIZED.clone()),
        Box::new(NOTIFICATIONS_SENT.clone()),
    ]
}
