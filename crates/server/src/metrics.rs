//! Prometheus metrics exported at `/metrics`.
//!
//! Server-side request and event-feed metrics live here; queue, stage and
//! external-service metrics come from `mintline_core::metrics` and are added
//! to the same registry. Job counts and runner state are gauges refreshed on
//! every scrape.

use once_cell::sync::Lazy;
use prometheus::{
    core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

use mintline_core::JobState;

use crate::state::AppState;

/// Registry served by the metrics endpoint.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    let collectors = server_metrics()
        .into_iter()
        .chain(mintline_core::metrics::all_metrics());
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("Failed to register metric: {}", e);
        }
    }
    registry
});

// =============================================================================
// API
// =============================================================================

/// Request latency, labelled by method, normalized path and status.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mintline_http_request_duration_seconds",
            "API request latency in seconds",
        )
        .buckets(vec![0.0025, 0.01, 0.05, 0.1, 0.25, 1.0, 5.0]),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mintline_http_requests_total", "API requests served"),
        &["method", "path", "status"],
    )
    .unwrap()
});

pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mintline_http_requests_in_flight",
        "API requests currently being handled",
    )
    .unwrap()
});

// =============================================================================
// Event feed
// =============================================================================

/// Open `/ws` subscriptions.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "mintline_ws_connections_active",
        "Event feed subscribers currently connected",
    )
    .unwrap()
});

pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mintline_ws_connections_total",
        "Event feed subscriptions opened",
    )
    .unwrap()
});

/// Events forwarded to subscribers, by event kind.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mintline_ws_messages_sent_total",
            "Pipeline events forwarded to subscribers",
        ),
        &["kind"],
    )
    .unwrap()
});

/// Times a subscriber fell behind the event bus and skipped events.
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mintline_ws_lag_events_total",
        "Subscriber lag notifications from the event bus",
    )
    .unwrap()
});

// =============================================================================
// Pipeline gauges (refreshed on scrape)
// =============================================================================

pub static JOBS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mintline_jobs_by_state", "Jobs per queue and state"),
        &["queue", "state"],
    )
    .unwrap()
});

/// 1 while the worker pools are running.
pub static RUNNER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("mintline_runner_running", "Pipeline runner state").unwrap()
});

pub static WORKERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("mintline_workers", "Worker tasks per queue"),
        &["queue"],
    )
    .unwrap()
});

fn server_metrics() -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()),
        Box::new(WS_CONNECTIONS_ACTIVE.clone()),
        Box::new(WS_CONNECTIONS_TOTAL.clone()),
        Box::new(WS_MESSAGES_SENT.clone()),
        Box::new(WS_LAG_EVENTS.clone()),
        Box::new(JOBS_BY_STATE.clone()),
        Box::new(RUNNER_RUNNING.clone()),
        Box::new(WORKERS.clone()),
    ]
}

/// Render the registry in the Prometheus text format.
pub fn encode_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Refresh gauges from the current pipeline state.
///
/// Called before encoding so a scrape always sees live queue counts.
pub fn collect_dynamic_metrics(state: &AppState) {
    let pipeline = state.pipeline();

    let status = pipeline.runner_status();
    RUNNER_RUNNING.set(i64::from(status.running));
    for pool in &status.pools {
        WORKERS
            .with_label_values(&[pool.queue.as_str()])
            .set(pool.workers as i64);
    }

    match pipeline.all_queue_stats() {
        Ok(stats) => {
            for queue_stats in stats {
                for job_state in JobState::ALL {
                    JOBS_BY_STATE
                        .with_label_values(&[queue_stats.queue.as_str(), job_state.as_str()])
                        .set(queue_stats.counts.get(job_state) as i64);
                }
            }
        }
        Err(e) => warn!("Failed to collect queue counts: {}", e),
    }
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Collapse job ids and numeric segments so path labels stay bounded.
pub fn normalize_path(path: &str) -> String {
    let without_uuids = UUID_RE.replace_all(path, "{id}");
    NUMERIC_RE
        .replace_all(&without_uuids, "/{id}$1")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_job_id() {
        let path = "/api/v1/jobs/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/jobs/{id}");
    }

    #[test]
    fn test_normalize_path_keeps_suffix() {
        let path = "/api/v1/pipelines/550e8400-e29b-41d4-a716-446655440000/jobs";
        assert_eq!(normalize_path(path), "/api/v1/pipelines/{id}/jobs");
    }

    #[test]
    fn test_normalize_path_numeric_segment() {
        assert_eq!(normalize_path("/api/v1/jobs/12345"), "/api/v1/jobs/{id}");
    }

    #[test]
    fn test_normalize_path_static_routes_untouched() {
        for path in ["/api/v1/queues/mint", "/api/v1/health", "/metrics"] {
            assert_eq!(normalize_path(path), path);
        }
    }

    #[test]
    fn test_encoded_registry_has_server_and_core_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/api/v1/health", "200"])
            .inc();
        HTTP_REQUEST_DURATION
            .with_label_values(&["GET", "/api/v1/health", "200"])
            .observe(0.01);
        WS_CONNECTIONS_TOTAL.inc();
        JOBS_BY_STATE.with_label_values(&["mint", "waiting"]).set(0);
        RUNNER_RUNNING.set(0);
        mintline_core::metrics::JOBS_ENQUEUED
            .with_label_values(&["transcode"])
            .inc();

        let output = encode_metrics();

        assert!(output.contains("# TYPE mintline_http_requests_total counter"));
        assert!(output.contains("mintline_http_request_duration_seconds"));
        assert!(output.contains("mintline_ws_connections_total"));
        assert!(output.contains("mintline_jobs_by_state"));
        assert!(output.contains("mintline_runner_running"));
        assert!(output.contains("mintline_jobs_enqueued_total"));
    }
}
