//! Path registry endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::info;

use xlrefresh_core::{Error, PathRequest, RegisteredPath};

use crate::{ApiError, AppState};

/// Trim the submitted path and reject blanks.
fn validated_path(req: &PathRequest) -> Result<&str, ApiError> {
    let path = req.path.trim();
    if path.is_empty() {
        return Err(Error::InvalidInput("path must not be empty".into()).into());
    }
    Ok(path)
}

pub async fn list_files(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let entries = state.registry.list().await?;
    Ok(Json(entries))
}

pub async fn add_file(
    State(state): State<AppState>,
    Json(req): Json<PathRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let path = validated_path(&req)?;
    let entry = state.registry.add(path).await?;
    info!(
        subsystem = "api",
        op = "add_file",
        path_id = entry.id,
        file_path = %entry.path,
        "Path registered"
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn update_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PathRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let path = validated_path(&req)?;
    if !state.registry.update_by_id(id, path).await? {
        return Err(ApiError::Conflict(format!(
            "Path already registered: {}",
            path
        )));
    }
    info!(subsystem = "api", op = "update_file", path_id = id, file_path = %path, "Path updated");
    Ok(Json(RegisteredPath {
        id,
        path: path.to_string(),
    }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry.delete_by_id(id).await?;
    info!(subsystem = "api", op = "delete_file", path_id = id, "Path deleted");
    Ok(StatusCode::NO_CONTENT)
}
