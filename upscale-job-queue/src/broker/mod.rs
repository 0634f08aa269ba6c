//! Broker abstraction: the queue and state-tracking facility between
//! submitters and the worker pool.

mod memory;
#[cfg(feature = "redis")]
mod redis_broker;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::JobQueueError;
use crate::types::{BrokerRecord, JobId, WorkItem};

pub use memory::MemoryBroker;
#[cfg(feature = "redis")]
pub use redis_broker::RedisBroker;

/// Queue plus per-job state tracking.
///
/// Records in a terminal state are absorbing: [`record`](Broker::record)
/// refuses to overwrite them and reports `false`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a work item for some worker to consume.
    async fn enqueue(&self, item: WorkItem) -> Result<(), JobQueueError>;

    /// Take the next work item, waiting up to `wait` for one to arrive.
    async fn dequeue(&self, wait: Duration) -> Result<Option<WorkItem>, JobQueueError>;

    /// Store the latest state for `job_id`. Returns whether it was applied.
    async fn record(&self, job_id: JobId, record: BrokerRecord) -> Result<bool, JobQueueError>;

    /// Current state for `job_id`, if the broker has ever seen it.
    async fn lookup(&self, job_id: &JobId) -> Result<Option<BrokerRecord>, JobQueueError>;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;
}

/// Whether a new record may replace `current`.
#[inline]
pub(crate) fn accepts_transition(current: Option<&BrokerRecord>) -> bool {
    !current.is_some_and(|r| r.state.is_terminal())
}
