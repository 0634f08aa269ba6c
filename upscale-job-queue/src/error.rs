//! Error types for the job queue system.

use thiserror::Error;
use upscale_store::StoreError;

use crate::types::JobId;

/// Errors surfaced to callers of a job queue or status resolver.
#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("job queue backend is unavailable: {0}")]
    Unavailable(String),

    #[error("broker operation failed: {0}")]
    Broker(String),

    #[error("job not found: {0}")]
    NotFound(JobId),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for JobQueueError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Broker(err.to_string())
        }
    }
}

/// Failure raised by a transform capability.
///
/// Renders as the bare cause so it can be surfaced verbatim as a job's
/// failure reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransformError {
    message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of a failed executor run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("failed to store result: {0}")]
    Store(#[from] StoreError),

    #[error("transform task aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_error_renders_bare_cause() {
        let err = JobError::from(TransformError::new("model unavailable"));
        assert_eq!(err.to_string(), "model unavailable");
    }

    #[test]
    fn store_error_is_prefixed() {
        let err = JobError::from(StoreError::InvalidTtl);
        assert!(err.to_string().starts_with("failed to store result"));
    }
}
