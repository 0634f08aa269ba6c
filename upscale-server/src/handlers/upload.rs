use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use crate::{error::ApiError, state::AppState};

/// Name of the multipart field carrying the image.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UpscaleAccepted {
    pub task_id: String,
    pub status_url: String,
}

/// `POST /upscale`: accept an image upload and submit it as a job.
pub async fn upscale(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UpscaleAccepted>), ApiError> {
    // A body that is not multipart at all has no file field either.
    let mut multipart = multipart.map_err(|_| ApiError::bad_request("file field required"))?;
    let input = read_file_field(&mut multipart).await?;

    let handle = state.queue.submit(input).await?;
    let task_id = handle.job_id.to_string();
    info!(
        task_id = %task_id,
        status = %handle.state.status,
        mode = ?state.queue.mode(),
        "upscale job accepted"
    );

    let status_url = state.external_url(&headers, &format!("/tasks/{task_id}"));
    Ok((
        StatusCode::ACCEPTED,
        Json(UpscaleAccepted {
            task_id,
            status_url,
        }),
    ))
}

/// Bytes of the first file part named [`FILE_FIELD`].
///
/// Parts without a filename are plain form values and do not count as the file.
async fn read_file_field(multipart: &mut Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let named = match field.file_name() {
            None => continue,
            Some(name) => !name.is_empty(),
        };
        if !named {
            return Err(ApiError::bad_request("empty filename"));
        }
        return Ok(field.bytes().await?);
    }
    Err(ApiError::bad_request("file field required"))
}
