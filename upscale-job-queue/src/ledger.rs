//! Record of terminal job states for eager-mode queues.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use upscale_store::DEFAULT_RESULT_TTL;

use crate::types::{JobId, JobState};

#[derive(Debug)]
struct LedgerEntry {
    state: JobState,
    recorded_at: Instant,
}

/// Internal storage optimized for both expiry order and lookup by ID.
#[derive(Debug)]
struct LedgerState {
    /// Insertion order of job IDs (oldest first), which is also expiry order.
    order: VecDeque<JobId>,
    records: HashMap<JobId, LedgerEntry>,
    retention: Duration,
}

impl LedgerState {
    fn new(retention: Duration) -> Self {
        Self {
            order: VecDeque::new(),
            records: HashMap::new(),
            retention,
        }
    }

    #[inline]
    fn is_live(&self, entry: &LedgerEntry, now: Instant) -> bool {
        entry
            .recorded_at
            .checked_add(self.retention)
            .map_or(true, |deadline| now < deadline)
    }

    /// Insert a record and drop the ones whose retention has elapsed.
    fn insert(&mut self, job_id: JobId, state: JobState, now: Instant) {
        let entry = LedgerEntry {
            state,
            recorded_at: now,
        };
        if let Some(previous) = self.records.insert(job_id, entry) {
            // Keep `order` sorted by record time.
            if previous.recorded_at != now {
                self.order.retain(|id| *id != job_id);
                self.order.push_back(job_id);
            }
        } else {
            self.order.push_back(job_id);
        }
        self.purge_expired(now);
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(oldest) = self.order.front() {
            let expired = self
                .records
                .get(oldest)
                .map_or(true, |entry| !self.is_live(entry, now));
            if !expired {
                break;
            }
            if let Some(id) = self.order.pop_front() {
                self.records.remove(&id);
                removed += 1;
            }
        }
        removed
    }

    #[inline]
    fn get(&self, job_id: &JobId, now: Instant) -> Option<&JobState> {
        self.records
            .get(job_id)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| &entry.state)
    }
}

/// Shared handle to the eager ledger.
///
/// A record stays visible for the retention period, which matches the result
/// TTL, so a job's status lives exactly as long as its stored result.
#[derive(Clone)]
pub struct JobLedger {
    state: Arc<RwLock<LedgerState>>,
}

impl fmt::Debug for JobLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobLedger")
            .field("state", &"<RwLock<LedgerState>>")
            .finish()
    }
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RESULT_TTL)
    }
}

impl JobLedger {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(LedgerState::new(retention))),
        }
    }

    pub async fn insert(&self, job_id: JobId, state: JobState) {
        self.state
            .write()
            .await
            .insert(job_id, state, Instant::now());
    }

    /// State of `job_id`, unless it was never recorded or its retention elapsed.
    pub async fn get(&self, job_id: &JobId) -> Option<JobState> {
        self.state
            .read()
            .await
            .get(job_id, Instant::now())
            .cloned()
    }

    /// Drop expired records. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        self.state.write().await.purge_expired(Instant::now())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn record_is_visible_until_retention_elapses() {
        let ledger = JobLedger::with_retention(Duration::from_secs(30));
        let id = JobId::new();
        ledger.insert(id, JobState::success()).await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(ledger.get(&id).await, Some(JobState::success()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(ledger.get(&id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn volume_does_not_evict_live_records() {
        let ledger = JobLedger::with_retention(Duration::from_secs(60));
        let first = JobId::new();
        ledger.insert(first, JobState::success()).await;
        for _ in 0..20_000 {
            ledger.insert(JobId::new(), JobState::success()).await;
        }

        assert_eq!(ledger.get(&first).await, Some(JobState::success()));
        assert_eq!(ledger.len().await, 20_001);
    }

    #[tokio::test(start_paused = true)]
    async fn inserts_purge_expired_records() {
        let ledger = JobLedger::with_retention(Duration::from_secs(10));
        let old = JobId::new();
        ledger.insert(old, JobState::failure("x")).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        let fresh = JobId::new();
        ledger.insert(fresh, JobState::success()).await;

        assert_eq!(ledger.len().await, 1);
        assert!(ledger.get(&old).await.is_none());
        assert!(ledger.get(&fresh).await.is_some());
        assert_eq!(ledger.purge_expired().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reinserting_refreshes_without_duplicating_order() {
        let ledger = JobLedger::with_retention(Duration::from_secs(10));
        let a = JobId::new();
        let b = JobId::new();
        ledger.insert(a, JobState::success()).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        ledger.insert(b, JobState::success()).await;
        ledger.insert(a, JobState::failure("x")).await;

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(ledger.get(&a).await, Some(JobState::failure("x")));
        assert!(ledger.get(&b).await.is_some());
        assert_eq!(ledger.purge_expired().await, 0);
        assert_eq!(ledger.len().await, 2);
    }
}
