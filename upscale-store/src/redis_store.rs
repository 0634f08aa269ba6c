//! Redis-backed result store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::instrument;

use crate::{effective_ttl, expiry_millis, ResultStore, StoreError, StoredResult, DEFAULT_RESULT_TTL};

/// Content type assumed when the mime key is missing for a present payload.
const FALLBACK_CONTENT_TYPE: &str = "image/png";

/// [`ResultStore`] keeping payloads under `processed:{job_id}` and their
/// content type under `processed:{job_id}:mime`, both with native expiry.
#[derive(Clone)]
pub struct RedisResultStore {
    conn: MultiplexedConnection,
    default_ttl: Duration,
}

impl fmt::Debug for RedisResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisResultStore")
            .field("conn", &"<MultiplexedConnection>")
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl RedisResultStore {
    /// Connect to the Redis instance at `url`.
    pub async fn connect(url: &str, default_ttl: Option<Duration>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            default_ttl: default_ttl.unwrap_or(DEFAULT_RESULT_TTL),
        })
    }

    #[inline]
    fn payload_key(job_id: &str) -> String {
        format!("processed:{job_id}")
    }

    #[inline]
    fn mime_key(job_id: &str) -> String {
        format!("processed:{job_id}:mime")
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    #[instrument(skip(self, result), fields(size = result.content.len()), err)]
    async fn put(
        &self,
        job_id: &str,
        result: StoredResult,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let ttl = effective_ttl(ttl, self.default_ttl)?;
        let millis = expiry_millis(ttl);
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .pset_ex(Self::payload_key(job_id), result.content.as_ref(), millis)
            .ignore()
            .pset_ex(Self::mime_key(job_id), result.content_type, millis)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<StoredResult>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = conn.get(Self::payload_key(job_id)).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let mime: Option<String> = conn.get(Self::mime_key(job_id)).await?;
        let content_type = mime.unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
        Ok(Some(StoredResult {
            content: Bytes::from(payload),
            content_type,
        }))
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
