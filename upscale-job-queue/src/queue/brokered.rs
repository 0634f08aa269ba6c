use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info};

use super::JobQueue;
use crate::broker::Broker;
use crate::error::JobQueueError;
use crate::resolver::StatusResolver;
use crate::types::{BrokerRecord, JobHandle, JobId, JobState, QueueMode, WorkItem};

/// Queue that hands jobs to a broker and returns immediately.
///
/// Execution happens in a worker pool consuming the same broker, possibly in
/// another process. Handles always come back PENDING.
#[derive(Clone)]
pub struct BrokeredQueue {
    broker: Arc<dyn Broker>,
    resolver: StatusResolver,
}

impl fmt::Debug for BrokeredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokeredQueue")
            .field("broker", &self.broker.name())
            .finish()
    }
}

impl BrokeredQueue {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            resolver: StatusResolver::Brokered(Arc::clone(&broker)),
            broker,
        }
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }
}

#[async_trait]
impl JobQueue for BrokeredQueue {
    fn mode(&self) -> QueueMode {
        QueueMode::Distributed
    }

    async fn submit(&self, input: Bytes) -> Result<JobHandle, JobQueueError> {
        let job_id = JobId::new();
        let input_len = input.len();

        // Record before enqueueing so a fast worker never finds the job unknown.
        self.broker.record(job_id, BrokerRecord::queued()).await?;
        if let Err(e) = self.broker.enqueue(WorkItem::new(job_id, input)).await {
            error!(job_id = %job_id, error = %e, "failed to enqueue job");
            let cause = format!("failed to enqueue job: {e}");
            if let Err(record_err) = self.broker.record(job_id, BrokerRecord::failure(cause)).await {
                error!(job_id = %job_id, error = %record_err, "failed to record enqueue failure");
            }
            return Err(e);
        }

        info!(job_id = %job_id, input_len, broker = self.broker.name(), "job enqueued");
        Ok(JobHandle {
            job_id,
            state: JobState::pending(),
        })
    }

    async fn status(&self, job_id: &JobId) -> Result<JobState, JobQueueError> {
        self.resolver.status(job_id).await
    }
}
