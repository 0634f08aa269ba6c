//! Worker pool consuming a broker in distributed mode.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::executor::Executor;
use crate::types::{BrokerRecord, JobState, WorkItem};

/// How long a single dequeue waits before the loop rechecks for shutdown.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pulls work items from a [`Broker`] and runs them through an [`Executor`].
///
/// At most `concurrency` jobs run at once. Job failures are recorded in the
/// broker and never stop the pool.
pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    executor: Executor,
    concurrency: usize,
    poll_interval: Duration,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("broker", &self.broker.name())
            .field("executor", &self.executor)
            .field("concurrency", &self.concurrency)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(broker: Arc<dyn Broker>, executor: Executor, concurrency: usize) -> Self {
        Self {
            broker,
            executor,
            concurrency: concurrency.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Consume the broker until `shutdown` resolves, then drain in-flight jobs.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        info!(
            broker = self.broker.name(),
            concurrency = self.concurrency,
            "worker pool started"
        );

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Dequeue is not raced against shutdown so a popped item is never dropped.
            match self.broker.dequeue(self.poll_interval).await {
                Ok(Some(item)) => {
                    let broker = Arc::clone(&self.broker);
                    let executor = self.executor.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        process_item(broker.as_ref(), &executor, item).await;
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "dequeue failed; backing off");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "worker task panicked");
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = std::future::ready(()) => {}
            }
        }

        info!(in_flight = in_flight.len(), "worker pool stopping; draining jobs");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task panicked");
            }
        }
        info!("worker pool stopped");
    }
}

/// Run one work item and record its terminal state in the broker.
///
/// The result is stored by the executor before the terminal record is
/// written, so a poller that sees SUCCESS can always fetch the result.
pub async fn process_item(broker: &dyn Broker, executor: &Executor, item: WorkItem) -> JobState {
    let WorkItem { job_id, input } = item;

    if let Err(e) = broker.record(job_id, BrokerRecord::started()).await {
        warn!(job_id = %job_id, error = %e, "failed to mark job started");
    }
    debug!(job_id = %job_id, "job started");

    let (record, state) = match executor.run(job_id, input).await {
        Ok(()) => (BrokerRecord::success(), JobState::success()),
        Err(e) => {
            let cause = e.to_string();
            warn!(job_id = %job_id, error = %cause, "job failed");
            (BrokerRecord::failure(cause.clone()), JobState::failure(cause))
        }
    };

    match broker.record(job_id, record).await {
        Ok(true) => info!(job_id = %job_id, status = %state.status, "job finished"),
        Ok(false) => warn!(job_id = %job_id, "job already had a terminal state"),
        Err(e) => error!(job_id = %job_id, error = %e, "failed to record job outcome"),
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::error::TransformError;
    use crate::types::{BrokerState, JobId};
    use upscale_store::{MemoryResultStore, ResultStore};

    fn executor(
        transform: impl Fn(&[u8]) -> Result<Vec<u8>, TransformError> + Send + Sync + 'static,
    ) -> (Executor, MemoryResultStore) {
        let store = MemoryResultStore::new();
        (
            Executor::new(Arc::new(transform), Arc::new(store.clone())),
            store,
        )
    }

    #[tokio::test]
    async fn process_item_records_success_after_storing() {
        let broker = MemoryBroker::new();
        let (executor, store) = executor(|input| Ok(input.to_vec()));
        let id = JobId::new();
        broker.record(id, BrokerRecord::queued()).await.unwrap();

        let state = process_item(&broker, &executor, WorkItem::new(id, &b"img"[..])).await;

        assert_eq!(state, JobState::success());
        let record = broker.lookup(&id).await.unwrap().unwrap();
        assert_eq!(record.state, BrokerState::Success);
        assert!(store.get(&id.to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn process_item_records_failure_cause() {
        let broker = MemoryBroker::new();
        let (executor, store) = executor(|_| Err(TransformError::new("corrupt image")));
        let id = JobId::new();

        let state = process_item(&broker, &executor, WorkItem::new(id, &b"img"[..])).await;

        assert_eq!(state, JobState::failure("corrupt image"));
        let record = broker.lookup(&id).await.unwrap().unwrap();
        assert_eq!(record.error.as_deref(), Some("corrupt image"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn pool_stops_on_shutdown_and_drains() {
        let broker = Arc::new(MemoryBroker::new());
        let (executor, store) = executor(|input| Ok(input.to_vec()));
        let id = JobId::new();
        broker.record(id, BrokerRecord::queued()).await.unwrap();
        broker
            .enqueue(WorkItem::new(id, &b"payload"[..]))
            .await
            .unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let pool = WorkerPool::new(broker.clone(), executor, 2)
            .with_poll_interval(Duration::from_millis(20));
        let handle = tokio::spawn(pool.run_until(async move {
            let _ = stop_rx.await;
        }));

        for _ in 0..100 {
            if store.get(&id.to_string()).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        let record = broker.lookup(&id).await.unwrap().unwrap();
        assert_eq!(record.state, BrokerState::Success);
    }

    #[tokio::test]
    async fn panicking_transform_is_recorded_as_failure() {
        let broker = Arc::new(MemoryBroker::new());
        let (executor, store) = executor(|input| {
            if input == b"bad" {
                panic!("unsupported pixel layout");
            }
            Ok(input.to_vec())
        });
        let bad = JobId::new();
        let good = JobId::new();
        for (id, payload) in [(bad, &b"bad"[..]), (good, &b"good"[..])] {
            broker.record(id, BrokerRecord::queued()).await.unwrap();
            broker.enqueue(WorkItem::new(id, payload)).await.unwrap();
        }

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let pool = WorkerPool::new(broker.clone(), executor.offload_transform(false), 1)
            .with_poll_interval(Duration::from_millis(20));
        let handle = tokio::spawn(pool.run_until(async move {
            let _ = stop_rx.await;
        }));

        for _ in 0..100 {
            if store.get(&good.to_string()).await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop_tx.send(()).unwrap();
        handle.await.unwrap();

        let record = broker.lookup(&bad).await.unwrap().unwrap();
        assert_eq!(record.state, BrokerState::Failure);
        assert!(record
            .error
            .as_deref()
            .is_some_and(|e| e.contains("unsupported pixel layout")));
        let record = broker.lookup(&good).await.unwrap().unwrap();
        assert_eq!(record.state, BrokerState::Success);
    }
}
