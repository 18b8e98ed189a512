//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use scribe_orchestrator::OrchestratorError;
use scribe_storage::StorageError;
use scribe_store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] scribe_queue::QueueError),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) | ApiError::Store(_) | ApiError::Storage(_) | ApiError::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::JobNotFound(id) => Self::NotFound(format!("job {}", id)),
            StoreError::AlreadyExists(id) => Self::Conflict(format!("job {} already exists", id)),
            other => Self::Store(other),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidLocator(_) | StorageError::NotFound(_) => {
                Self::BadRequest(e.to_string())
            }
            other => Self::Storage(other),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::JobNotFound(id) => Self::NotFound(format!("job {}", id)),
            OrchestratorError::InvalidRequest(_) | OrchestratorError::Plan(_) => {
                Self::BadRequest(e.to_string())
            }
            OrchestratorError::Store(e) => e.into(),
            OrchestratorError::Storage(e) => e.into(),
            OrchestratorError::Queue(e) => Self::Queue(e),
            OrchestratorError::Postcondition(_) => Self::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_errors_map_to_status() {
        let cases = [
            (OrchestratorError::job_not_found("j"), StatusCode::NOT_FOUND),
            (OrchestratorError::invalid_request("bad"), StatusCode::BAD_REQUEST),
            (
                OrchestratorError::Store(StoreError::AlreadyExists("j".into())),
                StatusCode::CONFLICT,
            ),
            (
                OrchestratorError::Storage(StorageError::not_found("s3://b/k")),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestratorError::Store(StoreError::conflict("deadlock")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }
}
