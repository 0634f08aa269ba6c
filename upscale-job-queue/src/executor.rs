//! Executor: runs the transform for one job and stores its output.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};
use upscale_store::{ResultStore, StoredResult};

use crate::error::{JobError, TransformError};
use crate::types::JobId;

/// Content type of every stored job result.
pub const RESULT_CONTENT_TYPE: &str = "image/png";

/// The transformation capability applied to each job's input.
///
/// Implementations may hold expensive shared state; they are shared across
/// concurrently running jobs and must stay usable after any single call fails.
pub trait Transform: Send + Sync {
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>, TransformError> + Send + Sync,
{
    fn transform(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        self(input)
    }
}

/// Runs a [`Transform`] against a job's input and writes the output into a
/// [`ResultStore`].
///
/// A run is a single attempt: no retries. On failure nothing is written. The
/// store write has completed by the time [`run`](Self::run) returns `Ok`, so
/// callers that publish the terminal status afterwards never expose a
/// SUCCESS whose result is not yet readable.
#[derive(Clone)]
pub struct Executor {
    transform: Arc<dyn Transform>,
    store: Arc<dyn ResultStore>,
    result_ttl: Option<Duration>,
    offload: bool,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("transform", &"<Arc<dyn Transform>>")
            .field("store", &self.store.backend())
            .field("result_ttl", &self.result_ttl)
            .field("offload", &self.offload)
            .finish()
    }
}

impl Executor {
    pub fn new(transform: Arc<dyn Transform>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            transform,
            store,
            result_ttl: None,
            offload: false,
        }
    }

    /// TTL for stored results. Without it the store's default applies.
    #[must_use]
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = Some(ttl);
        self
    }

    /// Run the transform on tokio's blocking pool instead of the calling task.
    #[must_use]
    pub fn offload_transform(mut self, offload: bool) -> Self {
        self.offload = offload;
        self
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    pub fn result_ttl(&self) -> Option<Duration> {
        self.result_ttl
    }

    /// Transform `input` and store the output under `job_id`.
    pub async fn run(&self, job_id: JobId, input: Bytes) -> Result<(), JobError> {
        let started = Instant::now();
        let input_len = input.len();
        debug!(job_id = %job_id, input_len, offload = self.offload, "running transform");

        let output = if self.offload {
            let transform = Arc::clone(&self.transform);
            tokio::task::spawn_blocking(move || transform.transform(&input))
                .await
                .map_err(|e| JobError::Aborted(e.to_string()))??
        } else {
            let transform = &self.transform;
            panic::catch_unwind(AssertUnwindSafe(|| transform.transform(&input)))
                .map_err(|payload| JobError::Aborted(panic_message(payload.as_ref())))??
        };

        let output_len = output.len();
        self.store
            .put(
                &job_id.to_string(),
                StoredResult::new(output, RESULT_CONTENT_TYPE),
                self.result_ttl,
            )
            .await?;

        info!(
            job_id = %job_id,
            input_len,
            output_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job result stored"
        );
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str));
    match detail {
        Some(msg) => format!("transform panicked: {msg}"),
        None => "transform panicked".to_string(),
    }
}
