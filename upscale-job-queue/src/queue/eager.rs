use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};
use upscale_store::DEFAULT_RESULT_TTL;

use super::JobQueue;
use crate::error::JobQueueError;
use crate::executor::Executor;
use crate::ledger::JobLedger;
use crate::resolver::StatusResolver;
use crate::types::{JobHandle, JobId, JobState, QueueMode};

/// Queue that runs every job to completion inside [`submit`](JobQueue::submit).
///
/// The caller is blocked for the whole transform. PENDING is never
/// observable: the terminal outcome is recorded before the handle is returned.
#[derive(Clone)]
pub struct EagerQueue {
    executor: Executor,
    ledger: JobLedger,
    resolver: StatusResolver,
}

impl fmt::Debug for EagerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerQueue")
            .field("executor", &self.executor)
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl EagerQueue {
    /// Ledger records are kept as long as the executor's results.
    pub fn new(executor: Executor) -> Self {
        let retention = executor.result_ttl().unwrap_or(DEFAULT_RESULT_TTL);
        Self::with_ledger(executor, JobLedger::with_retention(retention))
    }

    pub fn with_ledger(executor: Executor, ledger: JobLedger) -> Self {
        Self {
            executor,
            resolver: StatusResolver::Eager(ledger.clone()),
            ledger,
        }
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.resolver
    }
}

#[async_trait]
impl JobQueue for EagerQueue {
    fn mode(&self) -> QueueMode {
        QueueMode::Eager
    }

    async fn submit(&self, input: Bytes) -> Result<JobHandle, JobQueueError> {
        let job_id = JobId::new();

        let state = match self.executor.run(job_id, input).await {
            Ok(()) => JobState::success(),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "eager job failed");
                JobState::failure(e.to_string())
            }
        };
        self.ledger.insert(job_id, state.clone()).await;

        info!(job_id = %job_id, status = %state.status, "eager job finished");
        Ok(JobHandle { job_id, state })
    }

    async fn status(&self, job_id: &JobId) -> Result<JobState, JobQueueError> {
        self.resolver.status(job_id).await
    }
}
