//! Health, setup and event-stream endpoints.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use xlrefresh_core::EventEnvelope;
use xlrefresh_db::populate;

use crate::{ApiError, AppState};

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Liveness message kept for existing front ends.
pub async fn api_status() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Excel Refresh API is running",
    }))
}

pub async fn openapi_yaml() -> impl IntoResponse {
    const SPEC: &str = include_str!("../openapi.yaml");
    ([(header::CONTENT_TYPE, "application/yaml")], SPEC)
}

/// Populate the registry from the configured seed list.
pub async fn init_db(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let seed = state
        .seed
        .as_ref()
        .ok_or_else(|| ApiError::BadRequest("No seed list configured (set SEED_FILE)".into()))?;

    let report = populate(state.registry.as_ref(), seed).await?;
    info!(
        subsystem = "api",
        op = "init_db",
        added = report.added,
        already_present = report.already_present,
        "Registry initialized"
    );
    Ok(Json(report))
}

/// Stream refresh progress as Server-Sent Events.
///
/// The SSE `event` field carries the namespaced type (`file.finished`, ...);
/// `data` is the JSON [`EventEnvelope`]. Lagging clients silently miss events.
/// Streams end when the server shuts down.
pub async fn sse_events(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();

    let stream = tokio_stream::StreamExt::filter_map(
        BroadcastStream::new(rx),
        |result: Result<EventEnvelope, _>| match result {
            Ok(envelope) => match serde_json::to_string(&envelope) {
                Ok(json) => Some(Ok(Event::default()
                    .event(envelope.event_type.clone())
                    .data(json))),
                Err(_) => None,
            },
            Err(_) => None, // Skip lagged errors
        },
    );
    let stream = futures::StreamExt::take_until(stream, state.shutdown.clone().cancelled_owned());

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
