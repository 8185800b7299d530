//! Error types for xlrefresh.

use thiserror::Error;
use uuid::Uuid;

use crate::models::EngineStage;

/// Result type alias using xlrefresh's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for xlrefresh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registry add/update rejected by the path uniqueness constraint
    #[error("Path already registered: {0}")]
    DuplicatePath(String),

    /// Refresh settings rejected at the update boundary
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A step of the external spreadsheet engine failed
    #[error("Engine error during {stage}: {message}")]
    Engine { stage: EngineStage, message: String },

    /// A refresh run is already active
    #[error("Refresh run already in progress: {0}")]
    RunInProgress(Uuid),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an engine fault at a given stage.
    pub fn engine(stage: EngineStage, message: impl Into<String>) -> Self {
        Error::Engine {
            stage,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
