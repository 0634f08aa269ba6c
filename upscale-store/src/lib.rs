//! Result storage for finished upscale jobs.
//!
//! Every entry is keyed by a job identifier and carries a time-to-live. Once
//! the TTL has elapsed the entry behaves exactly like one that was never
//! written; there is no explicit delete.
//!
//! # Architecture
//!
//! - [`ResultStore`] - The storage contract used by the executor and the ingress
//! - [`MemoryResultStore`] - Process-local backend with lazy and periodic eviction
//! - `RedisResultStore` - Networked backend relying on native key expiry (feature `redis`)

mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use error::StoreError;
pub use memory::MemoryResultStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisResultStore;

/// TTL applied when a caller does not specify one.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 3600);

/// A stored job result as returned by [`ResultStore::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResult {
    pub content: Bytes,
    pub content_type: String,
}

impl StoredResult {
    #[inline]
    pub fn new(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }
}

/// Key-value storage with per-entry expiry.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Store `result` under `job_id`, replacing any existing entry.
    ///
    /// `ttl` falls back to the store's default when `None`. A zero TTL is
    /// rejected.
    async fn put(
        &self,
        job_id: &str,
        result: StoredResult,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Fetch the entry for `job_id`. Unknown and expired keys both yield `Ok(None)`.
    async fn get(&self, job_id: &str) -> Result<Option<StoredResult>, StoreError>;

    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;
}

/// Resolve the effective TTL for a `put`, rejecting zero durations.
pub(crate) fn effective_ttl(
    requested: Option<Duration>,
    default: Duration,
) -> Result<Duration, StoreError> {
    let ttl = requested.unwrap_or(default);
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl);
    }
    Ok(ttl)
}

/// Expiry in whole milliseconds for backends with native key expiry.
///
/// Sub-millisecond TTLs round up to 1 ms so a positive TTL never becomes "no expiry".
pub fn expiry_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
