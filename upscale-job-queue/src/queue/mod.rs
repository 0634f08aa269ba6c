//! Job submission with mode-dependent scheduling.

mod brokered;
mod eager;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::JobQueueError;
use crate::types::{JobHandle, JobId, JobState, QueueMode};

pub use brokered::BrokeredQueue;
pub use eager::EagerQueue;

/// Interface for submitting jobs and polling their state.
///
/// Both implementations hand out the same identifier format and the same
/// status vocabulary, so callers never need to know which one is active.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Scheduling mode of this queue.
    fn mode(&self) -> QueueMode;

    /// Submit `input` for transformation.
    async fn submit(&self, input: Bytes) -> Result<JobHandle, JobQueueError>;

    /// Current lifecycle state of `job_id`.
    async fn status(&self, job_id: &JobId) -> Result<JobState, JobQueueError>;
}
