//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use mintline_core::{JobFilter, JobRecord, JobState, QueueName};

use super::error::ApiError;
use crate::state::AppState;

/// Maximum allowed limit for job queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for job queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by queue name
    pub queue: Option<String>,
    /// Filter by state
    pub state: Option<String>,
    /// Filter by run
    pub correlation_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobRecord>,
    pub limit: i64,
    pub offset: i64,
}

/// List jobs with optional filters, newest first.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);

    if let Some(ref queue) = params.queue {
        filter = filter.with_queue(QueueName::from_str(queue).map_err(ApiError::bad_request)?);
    }
    if let Some(ref job_state) = params.state {
        filter = filter.with_state(JobState::from_str(job_state).map_err(ApiError::bad_request)?);
    }
    if let Some(ref correlation_id) = params.correlation_id {
        filter = filter.with_correlation_id(correlation_id);
    }

    let jobs = state.pipeline().list_jobs(&filter)?;

    Ok(Json(ListJobsResponse {
        jobs,
        limit,
        offset,
    }))
}

/// Get a job by ID
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    Ok(Json(state.pipeline().get_job(&id)?))
}

/// Cancel a waiting or delayed job (DELETE endpoint)
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let job = state.pipeline().cancel_job(&id)?;
    info!("Cancelled job {} ({} of run {})", job.id, job.queue, job.correlation_id);
    Ok(Json(job))
}
