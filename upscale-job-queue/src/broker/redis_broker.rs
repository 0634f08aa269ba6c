//! Redis-backed broker for out-of-process worker pools.
//!
//! - **Queue**: `upscale:queue` list, `LPUSH` on enqueue and `BRPOP` on dequeue
//! - **Records**: JSON under `upscale:job:{job_id}`, expiring with the result TTL

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{instrument, warn};
use upscale_store::expiry_millis;

use super::{accepts_transition, Broker};
use crate::error::JobQueueError;
use crate::types::{BrokerRecord, JobId, WorkItem};

/// Default list key for queued work items.
const DEFAULT_QUEUE_KEY: &str = "upscale:queue";

/// Default record expiry, matching the default result TTL.
const DEFAULT_RECORD_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Clone)]
pub struct RedisBroker {
    conn: MultiplexedConnection,
    // BRPOP holds its connection for the whole wait; keep it off the shared one.
    blocking_conn: MultiplexedConnection,
    queue_key: String,
    record_ttl: Duration,
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("queue_key", &self.queue_key)
            .field("record_ttl", &self.record_ttl)
            .finish()
    }
}

impl RedisBroker {
    /// Connect to the broker at `url`.
    pub async fn connect(url: &str) -> Result<Self, JobQueueError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let blocking_conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn,
            blocking_conn,
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            record_ttl: DEFAULT_RECORD_TTL,
        })
    }

    /// How long job records are kept after their last update.
    #[must_use]
    pub fn with_record_ttl(mut self, ttl: Duration) -> Self {
        self.record_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_queue_key(mut self, key: impl Into<String>) -> Self {
        self.queue_key = key.into();
        self
    }

    #[inline]
    fn record_key(job_id: &JobId) -> String {
        format!("upscale:job:{job_id}")
    }

    async fn read_record(&self, job_id: &JobId) -> Result<Option<BrokerRecord>, JobQueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::record_key(job_id)).await?;
        raw.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| JobQueueError::Broker(format!("corrupt record for {job_id}: {e}")))
        })
        .transpose()
    }
}

#[async_trait]
impl Broker for RedisBroker {
    #[instrument(skip(self, item), fields(job_id = %item.job_id, queue = %self.queue_key), err)]
    async fn enqueue(&self, item: WorkItem) -> Result<(), JobQueueError> {
        let payload = serde_json::to_string(&item)
            .map_err(|e| JobQueueError::Broker(format!("failed to encode work item: {e}")))?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&self.queue_key, payload).await?;
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<WorkItem>, JobQueueError> {
        let mut conn = self.blocking_conn.clone();
        // A zero timeout would block forever.
        let timeout = wait.as_secs_f64().max(0.01);
        let popped: Option<(String, String)> = conn.brpop(&self.queue_key, timeout).await?;
        let Some((_, payload)) = popped else {
            return Ok(None);
        };

        match serde_json::from_str::<WorkItem>(&payload) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                let Some(job_id) = WorkItem::salvage_job_id(&payload) else {
                    warn!(error = %e, "discarding undecodable work item");
                    return Ok(None);
                };
                warn!(job_id = %job_id, error = %e, "failing undecodable work item");
                let cause = format!("undecodable work item: {e}");
                if let Err(err) = self.record(job_id, BrokerRecord::failure(cause)).await {
                    warn!(job_id = %job_id, error = %err, "failed to record undecodable item");
                }
                Ok(None)
            }
        }
    }

    async fn record(&self, job_id: JobId, record: BrokerRecord) -> Result<bool, JobQueueError> {
        // Check-then-set: only the single worker owning a job writes terminal
        // states, so the window here cannot race two terminal writers.
        let current = self.read_record(&job_id).await?;
        if !accepts_transition(current.as_ref()) {
            warn!(
                job_id = %job_id,
                attempted = ?record.state,
                "ignoring transition out of terminal state"
            );
            return Ok(false);
        }

        let payload = serde_json::to_string(&record)
            .map_err(|e| JobQueueError::Broker(format!("failed to encode record: {e}")))?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .pset_ex(
                Self::record_key(&job_id),
                payload,
                expiry_millis(self.record_ttl),
            )
            .await?;
        Ok(true)
    }

    async fn lookup(&self, job_id: &JobId) -> Result<Option<BrokerRecord>, JobQueueError> {
        self.read_record(job_id).await
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
