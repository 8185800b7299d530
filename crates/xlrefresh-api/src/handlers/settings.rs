use axum::{extract::State, response::IntoResponse, Json};

use xlrefresh_core::SettingsUpdate;

use crate::{ApiError, AppState};

pub async fn get_settings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.settings.get().await)
}

/// Replace both delays; a negative value is rejected with 400.
pub async fn set_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.settings.set(update).await?;
    Ok(Json(settings))
}
