use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::error::{AppError, Result};

const REGISTRY_SCHEMA_V1: &str = include_str!("../../../../resources/schema.sql");

/// Shared handle to the run registry database.
#[derive(Debug, Clone)]
pub struct RegistryDb {
    pool: SqlitePool,
}

impl RegistryDb {
    /// Open (creating if missing) and migrate the registry database.
    pub async fn connect(db_path: &Path) -> Result<Self> {
        let db_url = db_path_to_url(db_path)?;
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| AppError::DatabaseError(format!("Failed to parse registry DB URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect registry DB: {e}")))?;

        let db = Self { pool };
        db.apply_migrations().await?;
        Ok(db)
    }

    /// In-memory registry for tests.
    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::DatabaseError(format!("Failed to parse registry DB URL: {e}")))?
            .pragma("foreign_keys", "ON");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect registry DB: {e}")))?;
        let db = Self { pool };
        db.apply_migrations().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn apply_migrations(&self) -> Result<()> {
        // PRAGMA user_version tracks the schema version; v1 is the full
        // embedded schema. Future versions apply incremental statements.
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to read registry user_version: {e}"))
            })?;

        if version < 1 {
            for statement in REGISTRY_SCHEMA_V1.split(';') {
                let stmt = statement.trim();
                if stmt.is_empty() {
                    continue;
                }
                sqlx::query(stmt).execute(&self.pool).await.map_err(|e| {
                    AppError::DatabaseError(format!("Failed to apply registry schema: {e}"))
                })?;
            }
            sqlx::query("PRAGMA user_version = 1")
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to set registry user_version: {e}"))
                })?;
        }

        Ok(())
    }
}

fn db_path_to_url(db_path: &Path) -> Result<String> {
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| AppError::DatabaseError("Registry DB path is not valid UTF-8".to_string()))?;
    Ok(format!("sqlite://{}", db_path_str.replace('\\', "/")))
}
