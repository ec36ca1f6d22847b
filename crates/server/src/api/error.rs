//! Mapping of pipeline errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use mintline_core::{JobError, PipelineError, QueueError};

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error with the status code it should be reported with.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

fn status_for_store(e: &JobError) -> StatusCode {
    match e {
        JobError::NotFound(_) | JobError::EffectNotFound(_) => StatusCode::NOT_FOUND,
        JobError::InvalidState { .. } | JobError::LeaseLost(_) => StatusCode::CONFLICT,
        JobError::Database(_) | JobError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::RunNotFound(_) | PipelineError::JobNotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::RunCancelled(_) | PipelineError::NothingToCancel(_) => {
                StatusCode::CONFLICT
            }
            PipelineError::Store(inner) | PipelineError::Queue(QueueError::Store(inner)) => {
                status_for_store(inner)
            }
            PipelineError::Queue(QueueError::Payload(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mintline_core::JobState;

    #[test]
    fn test_invalid_request_is_bad_request() {
        let err = ApiError::from(PipelineError::InvalidRequest("creator must not be empty".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("creator"));
    }

    #[test]
    fn test_not_found_variants() {
        assert_eq!(
            ApiError::from(PipelineError::RunNotFound("r".into())).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(PipelineError::Store(JobError::NotFound("j".into()))).status,
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_invalid_state_through_queue_is_conflict() {
        let err = ApiError::from(PipelineError::Queue(QueueError::Store(
            JobError::InvalidState {
                job_id: "j".into(),
                current_state: JobState::Active,
                operation: "cancel".into(),
            },
        )));
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_database_error_is_internal() {
        let err = ApiError::from(PipelineError::Store(JobError::Database("locked".into())));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
