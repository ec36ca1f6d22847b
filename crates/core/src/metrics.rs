//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Queues (enqueued, claimed, completed, failed, retried)
//! - Recovery (reaper outcomes, reconciliation) and chaining
//! - Stage execution time
//! - External services (transcoder, content store, ledger, notifier)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Queue Metrics
// =============================================================================

/// Jobs enqueued by queue.
pub static JOBS_ENQUEUED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mintline_jobs_enqueued_total", "Total jobs enqueued"),
        &["queue"],
    )
    .unwrap()
});

/// Jobs claimed by workers.
pub static JOBS_CLAIMED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mintline_jobs_claimed_total", "Total jobs claimed by workers"),
        &["queue"],
    )
    .unwrap()
});

/// Jobs completed.
pub static JOBS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mintline_jobs_completed_total", "Total jobs completed"),
        &["queue"],
    )
    .unwrap()
});

/// Jobs terminally failed by failure kind.
pub static JOBS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mintline_jobs_failed_total", "Total jobs terminally failed"),
        &["queue", "kind"], // kind: "transient", "permanent", "ambiguous"
    )
    .unwrap()
});

/// Failures that were scheduled for another attempt.
pub static JOB_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mintline_job_retries_total", "Total job retries scheduled"),
        &["queue", "kind"],
    )
    .unwrap()
});

/// Jobs cancelled before running.
pub static JOBS_CANCELLED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mintline_jobs_cancelled_total", "Total jobs cancelled"),
        &["queue"],
    )
    .unwrap()
});

// =============================================================================
// Recovery & Chaining Metrics
// =============================================================================

/// Abandoned jobs recovered by the reaper.
pub static JOBS_RECOVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mintline_jobs_recovered_total",
            "Abandoned jobs recovered by the reaper",
        ),
        &["queue", "outcome"], // outcome: "reconciled", "requeued", "failed"
    )
    .unwrap()
});

/// Guarded effects satisfied from an existing receipt instead of a new call.
pub static EFFECTS_REUSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mintline_effects_reused_total",
            "Irreversible effects satisfied from a recorded receipt",
        ),
        &["queue", "source"], // source: "local", "external"
    )
    .unwrap()
});

/// Next-stage jobs created by the chainer.
pub static JOBS_CHAINED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mintline_jobs_chained_total", "Next-stage jobs enqueued"),
        &["from", "to"],
    )
    .unwrap()
});

/// Stage execution duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mintline_stage_duration_seconds",
            "Duration of stage executions",
        )
        .buckets(vec![0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["queue", "result"], // result: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// External service request duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mintline_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// External service requests total.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mintline_external_service_requests_total",
            "Total external service requests",
        ),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record one external call.
pub fn observe_external(service: &str, operation: &str, elapsed_secs: f64, success: bool) {
    EXTERNAL_SERVICE_DURATION
        .with_label_values(&[service, operation])
        .observe(elapsed_secs);
    EXTERNAL_SERVICE_REQUESTS
        .with_label_values(&[service, operation, if success { "success" } else { "error" }])
        .inc();
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Queues
        Box::new(JOBS_ENQUEUED.clone()),
        Box::new(JOBS_CLAIMED.clone()),
        Box::new(JOBS_COMPLETED.clone()),
        Box::new(JOBS_FAILED.clone()),
        Box::new(JOB_RETRIES.clone()),
        Box::new(JOBS_CANCELLED.clone()),
        // Recovery & chaining
        Box::new(JOBS_RECOVERED.clone()),
        Box::new(EFFECTS_REUSED.clone()),
        Box::new(JOBS_CHAINED.clone()),
        Box::new(STAGE_DURATION.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
    ]
}
