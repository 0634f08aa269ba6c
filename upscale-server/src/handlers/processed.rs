use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::{error::ApiError, state::AppState};

/// `GET /processed/{file}` where `file` is `<task_id>` or `<task_id>.<ext>`.
///
/// Expired and never-written results are both 404, even when the task
/// itself reports SUCCESS.
pub async fn get_processed(
    Extension(state): Extension<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let task_id = file.split('.').next().unwrap_or_default();
    if task_id.is_empty() {
        return Err(ApiError::not_found("result not found"));
    }

    let stored = state
        .store
        .get(task_id)
        .await?
        .ok_or_else(|| ApiError::not_found("result not found"))?;

    Ok((
        [(header::CONTENT_TYPE, stored.content_type)],
        stored.content,
    )
        .into_response())
}
