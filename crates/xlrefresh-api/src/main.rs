//! xlrefresh-api - HTTP API server for xlrefresh

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xlrefresh_api::{config::ServerConfig, router, AppState};
use xlrefresh_db::{Database, SeedList};
use xlrefresh_jobs::{
    BatchOrchestrator, BridgeConfig, BridgeEngine, EventBus, OrchestratorConfig, RefreshEngine,
    RefreshRunner,
};

/// How long shutdown waits for a cancelled run to release its engine.
const RUN_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let _file_guard = init_logging();

    let config = ServerConfig::from_env();

    // Registry
    let db = Database::connect(&config.database_url).await?;
    db.ensure_schema().await?;
    xlrefresh_db::log_pool_metrics(&db.pool);
    info!(database_url = %config.database_url, "Path registry ready");

    // Seed list (optional)
    let seed = match &config.seed_file {
        Some(path) => {
            let seed = SeedList::load(path).await?;
            info!(
                seed_file = %path.display(),
                file_count = seed.paths.len(),
                "Seed list loaded"
            );
            Some(seed)
        }
        None => None,
    };

    // Orchestration
    let mut orchestrator_config = OrchestratorConfig::from_env();
    if orchestrator_config.master_file.is_none() {
        if let Some(master) = seed.as_ref().and_then(|s| s.master_file.clone()) {
            orchestrator_config = orchestrator_config.with_master_file(master);
        }
    }
    match &orchestrator_config.master_file {
        Some(master) => info!(
            master_file = %master,
            master_macro = %orchestrator_config.master_macro,
            "Master-file post-pass enabled"
        ),
        None => info!("No master file configured; post-pass will be skipped"),
    }

    let bridge_config = BridgeConfig::from_env();
    let step_timeout = bridge_config.step_timeout;
    let engine = BridgeEngine::new(bridge_config);
    let engine = RefreshEngine::new(Arc::new(engine)).with_step_timeout(step_timeout);
    match engine.health_check().await {
        Ok(true) => info!(engine = engine.engine_name(), "Spreadsheet engine available"),
        Ok(false) | Err(_) => warn!(
            engine = engine.engine_name(),
            "Spreadsheet engine bridge not available; refresh runs will record launch faults"
        ),
    }

    let orchestrator = BatchOrchestrator::new(
        Arc::new(db.paths.clone()),
        engine,
        orchestrator_config,
        EventBus::default(),
    );
    let runner = RefreshRunner::new(orchestrator);

    let shutdown = CancellationToken::new();
    let mut state =
        AppState::new(Arc::new(db.paths.clone()), runner.clone()).with_shutdown(shutdown.clone());
    if let Some(seed) = seed {
        state = state.with_seed(seed);
    }

    let app = router(state, config.allowed_origins.clone());

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tokio::spawn(wait_for_shutdown_signal(shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    // Release the spreadsheet engine before exiting.
    if runner.cancel().await.is_ok() {
        info!("Waiting for the active refresh run to stop");
        if tokio::time::timeout(RUN_DRAIN_TIMEOUT, runner.wait_idle())
            .await
            .is_err()
        {
            warn!(
                timeout_secs = RUN_DRAIN_TIMEOUT.as_secs(),
                "Refresh run did not stop in time"
            );
        }
    }

    info!("Server stopped");
    Ok(())
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "xlrefresh_api=debug,xlrefresh_jobs=debug,tower_http=debug")
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "xlrefresh_api=debug,xlrefresh_jobs=debug,xlrefresh_db=info,tower_http=debug".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("xlrefresh-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

/// Cancel `token` on SIGINT/Ctrl-C or SIGTERM.
async fn wait_for_shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!(signal = "SIGINT", "Shutdown signal received"),
                    _ = sigterm.recv() => info!(signal = "SIGTERM", "Shutdown signal received"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot register SIGTERM handler; listening for Ctrl-C only");
                ctrl_c.await.ok();
                info!(signal = "SIGINT", "Shutdown signal received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!(signal = "SIGINT", "Shutdown signal received");
    }

    token.cancel();
}
