//! Process-local result store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::{effective_ttl, ResultStore, StoreError, StoredResult, DEFAULT_RESULT_TTL};

#[derive(Debug, Clone)]
struct Entry {
    result: StoredResult,
    expires_at: Instant,
}

impl Entry {
    #[inline]
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory [`ResultStore`] backed by a sharded concurrent map.
///
/// Expired entries are dropped lazily when looked up and in bulk by
/// [`purge_expired`](Self::purge_expired), which [`spawn_sweeper`](Self::spawn_sweeper)
/// calls on an interval so results nobody fetches do not pile up.
#[derive(Clone)]
pub struct MemoryResultStore {
    entries: Arc<DashMap<String, Entry>>,
    default_ttl: Duration,
}

impl fmt::Debug for MemoryResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryResultStore")
            .field("entries", &self.entries.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl Default for MemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_RESULT_TTL)
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Spawn a background task that purges expired entries every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = store.len(), "purged expired results");
                }
            }
        })
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(
        &self,
        job_id: &str,
        result: StoredResult,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let ttl = effective_ttl(ttl, self.default_ttl)?;
        let entry = Entry {
            result,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(job_id.to_owned(), entry);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<StoredResult>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(job_id) {
            if entry.is_live(now) {
                return Ok(Some(entry.result.clone()));
            }
        } else {
            return Ok(None);
        }

        // Expired: the read guard is released above, so removing is safe here.
        self.entries.remove_if(job_id, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
