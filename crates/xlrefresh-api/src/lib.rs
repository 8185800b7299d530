//! # xlrefresh-api
//!
//! HTTP front end for xlrefresh: registry CRUD, refresh settings, the
//! run-refresh trigger with run tracking, and a Server-Sent Events stream of
//! refresh progress. Also hosts the [`client`] used by the `xlrefresh` CLI.

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::{Config, SwaggerUi};

use xlrefresh_core::{EventBus, PathRepository, SettingsStore};
use xlrefresh_db::SeedList;
use xlrefresh_jobs::RefreshRunner;

pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn PathRepository>,
    pub settings: SettingsStore,
    pub runner: RefreshRunner,
    pub events: EventBus,
    pub seed: Option<Arc<SeedList>>,
    /// Tripped on server shutdown; ends open event streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(registry: Arc<dyn PathRepository>, runner: RefreshRunner) -> Self {
        Self {
            registry,
            settings: SettingsStore::default(),
            events: runner.orchestrator().events().clone(),
            runner,
            seed: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: SettingsStore) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_seed(mut self, seed: SeedList) -> Self {
        self.seed = Some(Arc::new(seed));
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

/// OpenAPI documentation (utoipa metadata, used for Swagger UI configuration).
///
/// The full document is maintained in `openapi.yaml` and served at
/// `/openapi.yaml`. Swagger UI at `/docs` fetches from that endpoint.
#[allow(dead_code)]
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Excel Refresh API",
        version = "2026.10.0",
        description = "Registry of spreadsheet files and sequential recalculation runs"
    ),
    tags(
        (name = "Files", description = "Path registry CRUD"),
        (name = "Settings", description = "Refresh delay settings"),
        (name = "Runs", description = "Refresh runs and progress events"),
        (name = "System", description = "Health checks and setup")
    )
)]
struct ApiDoc;

/// Build the application router.
pub fn router(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    use handlers::{files, refresh, settings, system};

    Router::new()
        // System
        .route("/health", get(system::health_check))
        .route("/api", get(system::api_status))
        .route("/init-db", post(system::init_db))
        .route("/events", get(system::sse_events))
        // OpenAPI / Swagger UI
        .merge(
            SwaggerUi::new("/docs").config(
                Config::new(["/openapi.yaml"])
                    .try_it_out_enabled(true)
                    .display_request_duration(true),
            ),
        )
        .route("/openapi.yaml", get(system::openapi_yaml))
        // Registry
        .route("/files", get(files::list_files).post(files::add_file))
        .route(
            "/files/:id",
            put(files::update_file).delete(files::delete_file),
        )
        // Settings
        .route(
            "/settings",
            get(settings::get_settings).post(settings::set_settings),
        )
        // Runs
        .route("/run-refresh", post(refresh::run_refresh))
        .route("/runs", get(refresh::list_runs))
        .route("/runs/current", get(refresh::current_run))
        .route("/runs/current/cancel", post(refresh::cancel_run))
        .route("/runs/:id", get(refresh::get_run))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
                .max_age(Duration::from_secs(3600)),
        )
        .with_state(state)
}
