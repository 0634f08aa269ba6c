//! HTTP ingress for the upscale service.
//!
//! - `POST /upscale` - submit an image as a job
//! - `GET /tasks/{task_id}` - poll a job's status
//! - `GET /processed/{file}` - fetch a finished result
//! - `GET /health` - liveness

pub mod app;
pub mod error;
pub mod handlers;
pub mod services;
pub mod state;

pub use app::{build_router, build_router_with_limit};
