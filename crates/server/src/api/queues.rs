//! Queue statistics API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use std::str::FromStr;
use std::sync::Arc;

use mintline_core::{QueueName, QueueStats};

use super::error::ApiError;
use crate::state::AppState;

/// Statistics for all four queues, in pipeline order.
pub async fn list_queue_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<QueueStats>>, ApiError> {
    Ok(Json(state.pipeline().all_queue_stats()?))
}

/// Statistics for one queue.
pub async fn get_queue_stats(
    State(state): State<Arc<AppState>>,
    Path(queue): Path<String>,
) -> Result<Json<QueueStats>, ApiError> {
    let queue = QueueName::from_str(&queue).map_err(ApiError::not_found)?;
    Ok(Json(state.pipeline().queue_stats(queue)?))
}
