use std::fmt;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use upscale_job_queue::JobQueue;
use upscale_store::ResultStore;

/// Shared application state passed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn ResultStore>,
    public_url: Option<String>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("mode", &self.queue.mode())
            .field("store", &self.store.backend())
            .field("public_url", &self.public_url)
            .finish()
    }
}

impl AppState {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            queue,
            store,
            public_url: None,
        }
    }

    /// Base URL used for links handed back to clients, e.g. `https://img.example.com`.
    #[must_use]
    pub fn with_public_url(mut self, public_url: Option<String>) -> Self {
        self.public_url = public_url.map(|u| u.trim_end_matches('/').to_string());
        self
    }

    /// Absolute URL for `path`, based on the public URL or the request's Host header.
    pub fn external_url(&self, headers: &HeaderMap, path: &str) -> String {
        if let Some(base) = self.public_url.as_deref() {
            return format!("{base}{path}");
        }
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("localhost");
        format!("http://{host}{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use upscale_job_queue::{EagerQueue, Executor, TransformError};
    use upscale_store::MemoryResultStore;

    fn state() -> AppState {
        let store = Arc::new(MemoryResultStore::new());
        let identity = |input: &[u8]| -> Result<Vec<u8>, TransformError> { Ok(input.to_vec()) };
        let queue = EagerQueue::new(Executor::new(Arc::new(identity), store.clone()));
        AppState::new(Arc::new(queue), store)
    }

    #[test]
    fn external_url_uses_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("api.local:8000"));
        assert_eq!(
            state().external_url(&headers, "/tasks/abc"),
            "http://api.local:8000/tasks/abc"
        );
    }

    #[test]
    fn external_url_prefers_public_url() {
        let state = state().with_public_url(Some("https://img.example.com/".into()));
        assert_eq!(
            state.external_url(&HeaderMap::new(), "/processed/abc.png"),
            "https://img.example.com/processed/abc.png"
        );
    }
}
