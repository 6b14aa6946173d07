//! Pool construction and schema migration.
//!
//! SQLite in WAL mode with foreign keys on. SQLite serializes writers, so
//! the claim transaction stays atomic without row locks; a Postgres
//! deployment of the same schema would add `FOR UPDATE SKIP LOCKED` to the
//! claim select.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

use crate::error::StoreResult;

/// Embedded migrations, applied on every connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Open (creating if missing) and migrate the database at `database_url`.
///
/// # Errors
///
/// Returns [`crate::StoreError`] if the URL is malformed, the database
/// cannot be opened, or a migration fails.
pub async fn connect(database_url: &str) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    info!(database_url, "registry database ready");
    Ok(pool)
}

/// Open an in-memory database (tests).
///
/// Capped at one connection: each in-memory SQLite connection is its own
/// database.
///
/// # Errors
///
/// Returns [`crate::StoreError`] if the pool cannot be opened or a
/// migration fails.
pub async fn connect_memory() -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_database_migrates() {
        let pool = connect_memory().await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn file_database_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/registry.db", dir.path().display());
        let pool = connect(&url).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
