use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Default body limit: 50 MB
pub const DEFAULT_BODY_LIMIT: usize = 50 * 1024 * 1024;

/// Build the router with the default body limit.
pub fn build_router(state: Arc<AppState>) -> Router {
    build_router_with_limit(state, DEFAULT_BODY_LIMIT)
}

/// Build the router, rejecting request bodies larger than `body_limit` bytes.
pub fn build_router_with_limit(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/upscale", post(handlers::upload::upscale))
        .route("/tasks/{task_id}", get(handlers::tasks::get_task))
        .route("/processed/{file}", get(handlers::processed::get_processed))
        .route("/health", get(handlers::health::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(Extension(state))
}
