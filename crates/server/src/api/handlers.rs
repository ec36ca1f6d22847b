use axum::{extract::State, http::header, response::IntoResponse, Json};
use mintline_core::{ReaperReport, RunnerStatus, SanitizedConfig};
use serde::Serialize;
use std::sync::Arc;

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}

/// Worker pools and whether the runner is up.
pub async fn runner_status(State(state): State<Arc<AppState>>) -> Json<RunnerStatus> {
    Json(state.pipeline().runner_status())
}

/// Run one recovery sweep now instead of waiting for the reaper interval.
pub async fn reap(State(state): State<Arc<AppState>>) -> Json<ReaperReport> {
    Json(state.pipeline().reap().await)
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
