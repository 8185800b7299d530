//! Path registry repository backed by SQLite.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use xlrefresh_core::{Error, PathRepository, RegisteredPath, Result};

/// `AUTOINCREMENT` keeps ids monotonic and prevents reuse after deletes.
const CREATE_PATHS_TABLE: &str = "CREATE TABLE IF NOT EXISTS paths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL UNIQUE
)";

/// SQLite path registry.
#[derive(Clone)]
pub struct SqlitePathRepository {
    pool: SqlitePool,
}

impl SqlitePathRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of registered paths.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM paths")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl PathRepository for SqlitePathRepository {
    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_PATHS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        debug!(subsystem = "db", component = "registry", op = "ensure_schema", "Registry schema ready");
        Ok(())
    }

    async fn add(&self, path: &str) -> Result<RegisteredPath> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            warn!(
                subsystem = "db",
                component = "registry",
                file_path = path,
                "Registering a path that does not exist on disk"
            );
        }

        let result = sqlx::query("INSERT INTO paths (file_path) VALUES (?)")
            .bind(path)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => {
                let entry = RegisteredPath {
                    id: done.last_insert_rowid(),
                    path: path.to_string(),
                };
                info!(
                    subsystem = "db",
                    component = "registry",
                    op = "add",
                    path_id = entry.id,
                    file_path = path,
                    "Path registered"
                );
                Ok(entry)
            }
            Err(e) if is_unique_violation(&e) => Err(Error::DuplicatePath(path.to_string())),
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn list(&self) -> Result<Vec<RegisteredPath>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, file_path FROM paths ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|(id, path)| RegisteredPath { id, path })
            .collect())
    }

    async fn get(&self, id: i64) -> Result<Option<RegisteredPath>> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, file_path FROM paths WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(row.map(|(id, path)| RegisteredPath { id, path }))
    }

    async fn update_by_id(&self, id: i64, new_path: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE paths SET file_path = ? WHERE id = ?")
            .bind(new_path)
            .bind(id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                Err(Error::NotFound(format!("Path {} not found", id)))
            }
            Ok(_) => {
                info!(
                    subsystem = "db",
                    component = "registry",
                    op = "update",
                    path_id = id,
                    file_path = new_path,
                    "Path updated"
                );
                Ok(true)
            }
            Err(e) if is_unique_violation(&e) => {
                warn!(
                    subsystem = "db",
                    component = "registry",
                    op = "update",
                    path_id = id,
                    file_path = new_path,
                    "Update rejected: path already registered"
                );
                Ok(false)
            }
            Err(e) => Err(Error::Database(e)),
        }
    }

    async fn delete_by_id(&self, id: i64) -> Result<()> {
        let done = sqlx::query("DELETE FROM paths WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        debug!(
            subsystem = "db",
            component = "registry",
            op = "delete",
            path_id = id,
            deleted = done.rows_affected(),
            "Path delete processed"
        );
        Ok(())
    }
}
