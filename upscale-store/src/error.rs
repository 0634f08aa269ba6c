//! Error types for result storage.

use thiserror::Error;

/// Errors that may occur while reading or writing stored results.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("result ttl must be a positive duration")]
    InvalidTtl,

    #[error("result store backend is unavailable: {0}")]
    Unavailable(String),

    #[error("result store command failed: {0}")]
    Backend(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}
