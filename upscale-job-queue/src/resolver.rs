//! Status resolution for submitted jobs.

use std::fmt;
use std::sync::Arc;

use crate::broker::Broker;
use crate::error::JobQueueError;
use crate::ledger::JobLedger;
use crate::types::{JobId, JobState, QueueMode};

/// Reports the lifecycle state of a job from whichever source the active
/// queue mode keeps it in.
///
/// Both sources share one state machine: PENDING moves to SUCCESS or FAILURE
/// once, and terminal states never change. An identifier the source has no
/// record of resolves to [`JobQueueError::NotFound`], never to PENDING.
#[derive(Clone)]
pub enum StatusResolver {
    /// Terminal records written by an eager queue at submission.
    Eager(JobLedger),
    /// Broker-side state written by the worker pool.
    Brokered(Arc<dyn Broker>),
}

impl fmt::Debug for StatusResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager(ledger) => f.debug_tuple("Eager").field(ledger).finish(),
            Self::Brokered(broker) => f.debug_tuple("Brokered").field(&broker.name()).finish(),
        }
    }
}

impl StatusResolver {
    pub fn mode(&self) -> QueueMode {
        match self {
            Self::Eager(_) => QueueMode::Eager,
            Self::Brokered(_) => QueueMode::Distributed,
        }
    }

    pub async fn status(&self, job_id: &JobId) -> Result<JobState, JobQueueError> {
        match self {
            Self::Eager(ledger) => ledger
                .get(job_id)
                .await
                .ok_or(JobQueueError::NotFound(*job_id)),
            Self::Brokered(broker) => broker
                .lookup(job_id)
                .await?
                .map(|record| record.job_state())
                .ok_or(JobQueueError::NotFound(*job_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::types::{BrokerRecord, JobStatus};

    #[tokio::test]
    async fn eager_unknown_job_is_not_found() {
        let resolver = StatusResolver::Eager(JobLedger::default());
        let err = resolver.status(&JobId::new()).await.unwrap_err();
        assert!(matches!(err, JobQueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn eager_reports_recorded_state() {
        let ledger = JobLedger::default();
        let id = JobId::new();
        ledger.insert(id, JobState::failure("bad input")).await;

        let resolver = StatusResolver::Eager(ledger);
        let state = resolver.status(&id).await.unwrap();
        assert_eq!(state.status, JobStatus::Failure);
        assert_eq!(state.error.as_deref(), Some("bad input"));
    }

    #[tokio::test]
    async fn brokered_maps_native_states() {
        let broker = Arc::new(MemoryBroker::new());
        let resolver = StatusResolver::Brokered(broker.clone());
        let id = JobId::new();

        assert!(matches!(
            resolver.status(&id).await,
            Err(JobQueueError::NotFound(_))
        ));

        broker.record(id, BrokerRecord::queued()).await.unwrap();
        assert_eq!(resolver.status(&id).await.unwrap(), JobState::pending());

        broker.record(id, BrokerRecord::started()).await.unwrap();
        assert_eq!(resolver.status(&id).await.unwrap(), JobState::pending());

        broker
            .record(id, BrokerRecord::failure("model unavailable"))
            .await
            .unwrap();
        assert_eq!(
            resolver.status(&id).await.unwrap(),
            JobState::failure("model unavailable")
        );
        assert_eq!(resolver.mode(), QueueMode::Distributed);
    }
}
