//! Core traits for xlrefresh abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// PATH REGISTRY
// =============================================================================

/// Durable store of spreadsheet paths to refresh.
#[async_trait]
pub trait PathRepository: Send + Sync {
    /// Create the backing schema if it does not exist. Idempotent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Register a new path.
    ///
    /// Fails with [`Error::DuplicatePath`](crate::Error::DuplicatePath) when
    /// the path is already registered; the registry is left unchanged.
    async fn add(&self, path: &str) -> Result<RegisteredPath>;

    /// All entries in insertion order.
    async fn list(&self) -> Result<Vec<RegisteredPath>>;

    /// Get an entry by id.
    async fn get(&self, id: i64) -> Result<Option<RegisteredPath>>;

    /// Replace the path of an existing entry.
    ///
    /// Returns `Ok(false)` when `new_path` belongs to a different entry (both
    /// entries stay unchanged). Updating an entry to its own current path
    /// succeeds. Fails with `NotFound` when `id` does not exist.
    async fn update_by_id(&self, id: i64, new_path: &str) -> Result<bool>;

    /// Delete an entry. Deleting an unknown id is a no-op.
    async fn delete_by_id(&self, id: i64) -> Result<()>;
}

// =============================================================================
// EXTERNAL SPREADSHEET ENGINE
// =============================================================================

/// Factory for isolated spreadsheet application instances.
///
/// Every call to [`launch`](SpreadsheetEngine::launch) must yield a fresh
/// instance; instances are never shared between files.
#[async_trait]
pub trait SpreadsheetEngine: Send + Sync {
    /// Start a new application instance.
    async fn launch(&self) -> Result<Box<dyn SpreadsheetSession>>;

    /// Check if the engine's external dependencies are available.
    async fn health_check(&self) -> Result<bool>;

    /// Human-readable name of this engine.
    fn name(&self) -> &str;
}

/// One running application instance with at most one open document.
///
/// Step failures are reported as [`Error::Engine`](crate::Error::Engine).
#[async_trait]
pub trait SpreadsheetSession: Send {
    /// Open the document at `path`.
    async fn open(&mut self, path: &str) -> Result<()>;

    /// Request a full recalculation of the open document.
    ///
    /// Returns once the request is accepted; completion is not observable.
    async fn recalculate(&mut self) -> Result<()>;

    /// Invoke a named macro against the open document.
    async fn run_macro(&mut self, name: &str) -> Result<()>;

    /// Save the open document in place.
    async fn save(&mut self) -> Result<()>;

    /// Close the open document without saving.
    async fn close(&mut self) -> Result<()>;

    /// Terminate the application instance.
    async fn quit(&mut self) -> Result<()>;
}
