//! Construction of the store, transform, queue and workers from configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use upscale_config::{Config, StorageBackend};
use upscale_job_queue::{
    Broker, BrokeredQueue, EagerQueue, Executor, JobLedger, JobQueue, MemoryBroker, WorkerPool,
};
use upscale_store::{MemoryResultStore, ResultStore};

use crate::state::AppState;

/// Everything the HTTP server needs, built from one [`Config`].
pub struct Services {
    pub state: Arc<AppState>,
    /// Pool consuming the in-process broker. `None` in eager mode and when an
    /// external broker is configured (its workers run as separate processes).
    pub embedded_worker: Option<WorkerPool>,
    /// Housekeeping tasks (result sweeper, broker pruning).
    pub background: Vec<JoinHandle<()>>,
}

/// Build the result store and, for the memory backend, its sweeper task.
pub async fn build_store(
    cfg: &Config,
) -> anyhow::Result<(Arc<dyn ResultStore>, Option<JoinHandle<()>>)> {
    let ttl = cfg.storage.result_ttl();
    match cfg.storage.backend {
        StorageBackend::Memory => {
            let store = MemoryResultStore::with_default_ttl(ttl);
            let sweeper = store.spawn_sweeper(cfg.storage.sweep_interval());
            tracing::info!(result_ttl_secs = ttl.as_secs(), "using in-memory result store");
            Ok((Arc::new(store), Some(sweeper)))
        }
        StorageBackend::Redis => {
            let url = cfg
                .storage
                .redis_url
                .as_deref()
                .context("storage.redis_url is required for the redis backend")?;
            connect_redis_store(url, ttl).await.map(|s| (s, None))
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_redis_store(
    url: &str,
    ttl: std::time::Duration,
) -> anyhow::Result<Arc<dyn ResultStore>> {
    let store = upscale_store::RedisResultStore::connect(url, Some(ttl))
        .await
        .with_context(|| format!("failed to connect result store at {url}"))?;
    tracing::info!(result_ttl_secs = ttl.as_secs(), "using redis result store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis_store(
    _url: &str,
    _ttl: std::time::Duration,
) -> anyhow::Result<Arc<dyn ResultStore>> {
    anyhow::bail!("redis storage requires building with the `redis` feature")
}

#[cfg(feature = "redis")]
async fn connect_broker(cfg: &Config, url: &str) -> anyhow::Result<Arc<dyn Broker>> {
    let broker = upscale_job_queue::RedisBroker::connect(url)
        .await
        .with_context(|| format!("failed to connect broker at {url}"))?
        .with_record_ttl(cfg.storage.result_ttl());
    tracing::info!("using redis broker");
    Ok(Arc::new(broker))
}

#[cfg(not(feature = "redis"))]
async fn connect_broker(_cfg: &Config, _url: &str) -> anyhow::Result<Arc<dyn Broker>> {
    anyhow::bail!("an external broker requires building with the `redis` feature")
}

/// Build the executor shared by the eager queue and worker pools.
pub fn build_executor(cfg: &Config, store: Arc<dyn ResultStore>) -> Executor {
    let transform = upscale_image::build_transform(
        cfg.transform.fake,
        cfg.transform.model_path.as_ref().map(PathBuf::from),
    );
    Executor::new(transform, store)
        .with_result_ttl(cfg.storage.result_ttl())
        .offload_transform(true)
}

/// Periodically drop terminal records from an in-process broker.
fn spawn_broker_pruning(broker: Arc<MemoryBroker>, cfg: &Config) -> JoinHandle<()> {
    let max_age = cfg.storage.result_ttl();
    let interval = cfg.storage.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pruned = broker.prune_terminal(max_age);
            if pruned > 0 {
                tracing::debug!(pruned, "pruned finished job records");
            }
        }
    })
}

/// Wire up the HTTP server's services.
pub async fn build_server(cfg: &Config) -> anyhow::Result<Services> {
    let (store, sweeper) = build_store(cfg).await?;
    let mut background: Vec<JoinHandle<()>> = sweeper.into_iter().collect();
    let executor = build_executor(cfg, Arc::clone(&store));

    let (queue, embedded_worker): (Arc<dyn JobQueue>, Option<WorkerPool>) =
        if cfg.queue.always_eager {
            let retention = cfg.storage.result_ttl();
            tracing::info!(
                retention_secs = retention.as_secs(),
                "eager mode: jobs run inline at submission"
            );
            let ledger = JobLedger::with_retention(retention);
            (Arc::new(EagerQueue::with_ledger(executor, ledger)), None)
        } else if let Some(url) = cfg.queue.broker_url.as_deref() {
            let broker = connect_broker(cfg, url).await?;
            tracing::info!("distributed mode: jobs run in external workers");
            (Arc::new(BrokeredQueue::new(broker)), None)
        } else {
            let broker = Arc::new(MemoryBroker::new());
            background.push(spawn_broker_pruning(Arc::clone(&broker), cfg));
            tracing::info!(
                concurrency = cfg.queue.worker_concurrency,
                "distributed mode: jobs run in the embedded worker pool"
            );
            let pool = WorkerPool::new(broker.clone(), executor, cfg.queue.worker_concurrency);
            (Arc::new(BrokeredQueue::new(broker)), Some(pool))
        };

    let state = AppState::new(queue, store).with_public_url(cfg.server.public_url.clone());
    Ok(Services {
        state: Arc::new(state),
        embedded_worker,
        background,
    })
}

/// Wire up a standalone worker consuming the configured external broker.
pub async fn build_worker(cfg: &Config) -> anyhow::Result<(WorkerPool, Vec<JoinHandle<()>>)> {
    let url = cfg
        .queue
        .broker_url
        .as_deref()
        .context("worker mode requires queue.broker_url")?;
    let (store, sweeper) = build_store(cfg).await?;
    let broker = connect_broker(cfg, url).await?;
    let executor = build_executor(cfg, store);
    let pool = WorkerPool::new(broker, executor, cfg.queue.worker_concurrency);
    Ok((pool, sweeper.into_iter().collect()))
}
