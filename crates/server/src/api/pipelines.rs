//! Pipeline run API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use mintline_core::{JobRecord, RunStatus, SubmitRequest, SubmitResponse};

use super::error::ApiError;
use crate::state::AppState;

/// Response for cancelling a run
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub correlation_id: String,
    /// Jobs that were still waiting and are now cancelled.
    pub cancelled: Vec<JobRecord>,
}

/// Response for listing the jobs of a run
#[derive(Debug, Serialize)]
pub struct RunJobsResponse {
    pub correlation_id: String,
    pub jobs: Vec<JobRecord>,
}

/// Submit an uploaded asset for onboarding.
///
/// Returns 201 when a run was started and 200 when the correlation id
/// already belongs to a live or minted run.
pub async fn submit_pipeline(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let response = state.pipeline().submit_pipeline(body)?;

    let status = if response.created {
        info!(
            "Pipeline run {} submitted (job {})",
            response.correlation_id, response.job_id
        );
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(response)))
}

/// Current status of a run.
pub async fn get_run_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunStatus>, ApiError> {
    Ok(Json(state.pipeline().run_status(&id)?))
}

/// Cancel every job of the run that has not started yet.
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelRunResponse>, ApiError> {
    let cancelled = state.pipeline().cancel_run(&id)?;
    info!("Cancelled {} job(s) of run {}", cancelled.len(), id);

    Ok(Json(CancelRunResponse {
        correlation_id: id,
        cancelled,
    }))
}

/// Every job of a run, oldest first.
pub async fn list_run_jobs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunJobsResponse>, ApiError> {
    let jobs = state.pipeline().list_run_jobs(&id)?;
    Ok(Json(RunJobsResponse {
        correlation_id: id,
        jobs,
    }))
}
