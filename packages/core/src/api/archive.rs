//! Archived capture listing and download.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::{api_error, internal_error, ApiError, ApiState};
use crate::retention::{is_safe_file_name, ArchivedFile};
use crate::validation::is_valid_sensor_id;

/// `GET /api/archived-files`. Empty when archiving is not configured.
pub async fn list_archived_files(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ArchivedFile>>, ApiError> {
    let Some(archive) = &state.archive else {
        return Ok(Json(Vec::new()));
    };
    let files = archive.list().await.map_err(internal_error)?;
    Ok(Json(files))
}

/// `GET /api/archived-files/:folder/:file`
pub async fn download_archived_file(
    State(state): State<ApiState>,
    Path((folder, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    if !is_valid_sensor_id(&folder) || !is_safe_file_name(&file) {
        return Err(api_error(StatusCode::BAD_REQUEST, "Invalid archived file name"));
    }

    let not_found = || {
        api_error(
            StatusCode::NOT_FOUND,
            format!("Archived file {}/{} not found", folder, file),
        )
    };
    let archive = state.archive.as_ref().ok_or_else(not_found)?;
    let path = archive.locate(&folder, &file).await.ok_or_else(not_found)?;
    let bytes = tokio::fs::read(&path).await.map_err(internal_error)?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        file.replace('"', "_")
    ))
    .map_err(|_| api_error(StatusCode::BAD_REQUEST, "Invalid archived file name"))?;

    tracing::debug!(folder = %folder, file = %file, "Serving archived file");
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response())
}
