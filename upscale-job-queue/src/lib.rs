//! Asynchronous job lifecycle for the upscale service.
//!
//! A job is submitted with an opaque payload, transformed by a [`Transform`]
//! inside an [`Executor`], and its output lands in a
//! [`ResultStore`](upscale_store::ResultStore) keyed by the job identifier.
//! Callers poll the job's state and then fetch the result from the store.
//!
//! # Architecture
//!
//! - [`JobQueue`] - Submission and status interface shared by both modes
//! - [`EagerQueue`] - Runs each job inline before `submit` returns
//! - [`BrokeredQueue`] - Enqueues on a [`Broker`] and returns a PENDING handle
//! - [`StatusResolver`] - Maps ledger or broker state to PENDING/SUCCESS/FAILURE
//! - [`WorkerPool`] - Consumes a broker and runs the executor
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use upscale_job_queue::{EagerQueue, Executor, JobQueue, TransformError};
//! use upscale_store::MemoryResultStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let identity = |input: &[u8]| -> Result<Vec<u8>, TransformError> { Ok(input.to_vec()) };
//!     let executor = Executor::new(Arc::new(identity), Arc::new(MemoryResultStore::new()));
//!     let queue = EagerQueue::new(executor);
//!
//!     let handle = queue.submit(Bytes::from_static(b"...")).await.unwrap();
//!     println!("job {} finished: {}", handle.job_id, handle.state.status);
//! }
//! ```

pub mod broker;
mod error;
mod executor;
mod ledger;
mod queue;
mod resolver;
mod types;
mod worker;

pub use broker::{Broker, MemoryBroker};
#[cfg(feature = "redis")]
pub use broker::RedisBroker;
pub use error::{JobError, JobQueueError, TransformError};
pub use executor::{Executor, Transform, RESULT_CONTENT_TYPE};
pub use ledger::JobLedger;
pub use queue::{BrokeredQueue, EagerQueue, JobQueue};
pub use resolver::StatusResolver;
pub use types::{BrokerRecord, BrokerState, JobHandle, JobId, JobState, JobStatus, QueueMode, WorkItem};
pub use worker::{process_item, WorkerPool};

// Re-export async_trait for convenience when implementing Broker
pub use async_trait::async_trait;
