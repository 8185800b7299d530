//! Server configuration from the environment.

use std::path::PathBuf;

use axum::http::HeaderValue;

use xlrefresh_core::defaults;

/// Settings for the API server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// YAML seed list used by `POST /init-db`.
    pub seed_file: Option<PathBuf>,
    pub allowed_origins: Vec<HeaderValue>,
}

impl ServerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_URL` | `sqlite://excel_paths.db` | Registry store |
    /// | `HOST` | `127.0.0.1` | Bind host |
    /// | `PORT` | `8000` | Bind port |
    /// | `SEED_FILE` | unset | Seed list for `init-db` |
    /// | `ALLOWED_ORIGINS` | `http://127.0.0.1:8000,http://localhost:8000` | CORS allow-list |
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| defaults::DATABASE_URL.to_string());
        let host = std::env::var("HOST").unwrap_or_else(|_| defaults::SERVER_HOST.to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(defaults::SERVER_PORT);
        let seed_file = std::env::var("SEED_FILE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let allowed_origins = parse_allowed_origins(
            &std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| defaults::ALLOWED_ORIGINS.to_string()),
        );

        Self {
            database_url,
            host,
            port,
            seed_file,
            allowed_origins,
        }
    }
}

/// Parse a comma-separated origin list. Invalid entries are dropped with a
/// warning; an empty list falls back to the local defaults.
pub fn parse_allowed_origins(raw: &str) -> Vec<HeaderValue> {
    let origins: Vec<HeaderValue> = raw
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect();

    if origins.is_empty() && raw != defaults::ALLOWED_ORIGINS {
        return parse_allowed_origins(defaults::ALLOWED_ORIGINS);
    }
    origins
}
