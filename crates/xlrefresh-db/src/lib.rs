//! # xlrefresh-db
//!
//! SQLite storage layer for xlrefresh.
//!
//! This crate provides:
//! - Connection pool management
//! - The path registry ([`SqlitePathRepository`])
//! - Seed-list population for first-time setup
//!
//! ## Example
//!
//! ```rust,ignore
//! use xlrefresh_db::{Database, PathRepository};
//!
//! let db = Database::connect("sqlite://excel_paths.db").await?;
//! db.ensure_schema().await?;
//! let entry = db.paths.add(r"C:\Data\report.xlsx").await?;
//! println!("Registered {} as {}", entry.path, entry.id);
//! ```

pub mod paths;
pub mod pool;
pub mod seed;

// Re-export core types
pub use xlrefresh_core::*;

pub use paths::SqlitePathRepository;
pub use pool::{create_pool, log_pool_metrics};
pub use seed::{populate, SeedList};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::SqlitePool,
    /// Path registry.
    pub paths: SqlitePathRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            paths: SqlitePathRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create every table this crate owns. Safe to call on every start.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.paths.ensure_schema().await
    }
}
