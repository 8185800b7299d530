//! Refresh run endpoints.
//!
//! `POST /run-refresh` returns as soon as the run is accepted; progress is
//! observable through `/runs/*` and the `/events` stream.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::{ApiError, AppState};

pub async fn run_refresh(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let settings = state.settings.get().await;
    let record = state.runner.start(settings).await?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}

pub async fn list_runs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runner.history().await)
}

pub async fn current_run(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    state
        .runner
        .current()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No refresh run in progress".into()))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .runner
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))
}

pub async fn cancel_run(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let run_id = state.runner.cancel().await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "run_id": run_id })),
    ))
}
