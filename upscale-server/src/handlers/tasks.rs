use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use upscale_job_queue::{JobId, JobStatus};

use crate::{error::ApiError, state::AppState};

/// Extension used in result links; results are always PNG.
pub const RESULT_EXTENSION: &str = "png";

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /tasks/{task_id}`
pub async fn get_task(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let job_id: JobId = task_id
        .parse()
        .map_err(|_| ApiError::not_found(format!("unknown task: {task_id}")))?;
    let job = state.queue.status(&job_id).await?;

    let file_url = (job.status == JobStatus::Success).then(|| {
        state.external_url(
            &headers,
            &format!("/processed/{job_id}.{RESULT_EXTENSION}"),
        )
    });
    let error = match job.status {
        JobStatus::Failure => job.error,
        _ => None,
    };

    Ok(Json(TaskStatusResponse {
        task_id: job_id.to_string(),
        status: job.status,
        file_url,
        error,
    }))
}
