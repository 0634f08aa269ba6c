//! In-process broker.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

use super::{accepts_transition, Broker};
use crate::error::JobQueueError;
use crate::types::{BrokerRecord, JobId, WorkItem};

/// Broker living inside the current process.
///
/// Serves tests and single-process deployments that still want the
/// distributed submission semantics (PENDING handles, a separate worker pool).
#[derive(Default)]
pub struct MemoryBroker {
    queue: Mutex<VecDeque<WorkItem>>,
    notify: Notify,
    records: DashMap<JobId, BrokerRecord>,
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("queue", &"<Mutex<VecDeque<WorkItem>>>")
            .field("records", &self.records.len())
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items waiting to be dequeued.
    pub async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Drop terminal records last updated more than `max_age` ago.
    pub fn prune_terminal(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;
        let before = self.records.len();
        self.records
            .retain(|_, r| !(r.state.is_terminal() && r.updated_at < cutoff));
        before.saturating_sub(self.records.len())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, item: WorkItem) -> Result<(), JobQueueError> {
        self.queue.lock().await.push_back(item);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<WorkItem>, JobQueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(item) = self.queue.lock().await.pop_front() {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.queue.lock().await.pop_front());
            }
        }
    }

    async fn record(&self, job_id: JobId, record: BrokerRecord) -> Result<bool, JobQueueError> {
        match self.records.entry(job_id) {
            Entry::Occupied(mut existing) => {
                if !accepts_transition(Some(existing.get())) {
                    warn!(
                        job_id = %job_id,
                        current = ?existing.get().state,
                        attempted = ?record.state,
                        "ignoring transition out of terminal state"
                    );
                    return Ok(false);
                }
                existing.insert(record);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        Ok(true)
    }

    async fn lookup(&self, job_id: &JobId) -> Result<Option<BrokerRecord>, JobQueueError> {
        Ok(self.records.get(job_id).map(|r| r.value().clone()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BrokerState;
    use std::sync::Arc;

    #[tokio::test]
    async fn dequeue_is_fifo() {
        let broker = MemoryBroker::new();
        let first = WorkItem::new(JobId::new(), &b"1"[..]);
        let second = WorkItem::new(JobId::new(), &b"2"[..]);
        broker.enqueue(first.clone()).await.unwrap();
        broker.enqueue(second.clone()).await.unwrap();

        let wait = Duration::from_millis(10);
        assert_eq!(broker.dequeue(wait).await.unwrap(), Some(first));
        assert_eq!(broker.dequeue(wait).await.unwrap(), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_on_empty_queue() {
        let broker = MemoryBroker::new();
        let got = broker.dequeue(Duration::from_secs(5)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn waiting_dequeue_wakes_on_enqueue() {
        let broker = Arc::new(MemoryBroker::new());
        let consumer = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.dequeue(Duration::from_secs(30)).await })
        };

        tokio::task::yield_now().await;
        let item = WorkItem::new(JobId::new(), &b"late"[..]);
        broker.enqueue(item.clone()).await.unwrap();

        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got, Some(item));
    }

    #[tokio::test]
    async fn terminal_record_is_not_overwritten() {
        let broker = MemoryBroker::new();
        let id = JobId::new();

        assert!(broker.record(id, BrokerRecord::queued()).await.unwrap());
        assert!(broker.record(id, BrokerRecord::started()).await.unwrap());
        assert!(broker.record(id, BrokerRecord::success()).await.unwrap());
        assert!(!broker
            .record(id, BrokerRecord::failure("late"))
            .await
            .unwrap());

        let record = broker.lookup(&id).await.unwrap().unwrap();
        assert_eq!(record.state, BrokerState::Success);
    }

    #[tokio::test]
    async fn unknown_job_has_no_record() {
        let broker = MemoryBroker::new();
        assert!(broker.lookup(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_keeps_pending_and_recent_records() {
        let broker = MemoryBroker::new();
        let old = JobId::new();
        let pending = JobId::new();
        let fresh = JobId::new();

        let mut stale = BrokerRecord::success();
        stale.updated_at = Utc::now() - chrono::Duration::hours(2);
        broker.record(old, stale).await.unwrap();
        let mut waiting = BrokerRecord::queued();
        waiting.updated_at = Utc::now() - chrono::Duration::hours(2);
        broker.record(pending, waiting).await.unwrap();
        broker.record(fresh, BrokerRecord::success()).await.unwrap();

        assert_eq!(broker.prune_terminal(Duration::from_secs(3600)), 1);
        assert!(broker.lookup(&old).await.unwrap().is_none());
        assert!(broker.lookup(&pending).await.unwrap().is_some());
        assert!(broker.lookup(&fresh).await.unwrap().is_some());
    }
}
