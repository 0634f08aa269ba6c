use axum::extract::multipart::MultipartError;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use thiserror::Error;
use upscale_job_queue::JobQueueError;
use upscale_store::StoreError;

/// Top-level API error shared by all route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("job queue error: {0}")]
    JobQueue(#[from] JobQueueError),
    #[error("result store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::JobQueue(JobQueueError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::JobQueue(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::InvalidTtl) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Multipart(e) => e.status(),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        // Client errors carry the bare message so callers can match on it.
        let message = match self {
            ApiError::NotFound(m) | ApiError::BadRequest(m) => m,
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
