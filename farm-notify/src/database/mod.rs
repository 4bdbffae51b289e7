//! SQLite storage.
//!
//! Holds all state that must survive between polls: rules, feed snapshots and
//! job history, per-phase notification state, pending messages and digest
//! markers.

pub mod models;
pub mod repositories;
pub mod time;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::info;

pub type DbPool = Pool<Sqlite>;

const POOL_SIZE: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Open a pool on `database_url` (e.g. `sqlite:farm-notify.db?mode=rwc`).
///
/// File databases run in WAL mode. Tests pass `sqlite::memory:` with a single
/// connection, since every in-memory connection is its own database.
pub async fn init_pool_with_size(database_url: &str, max_connections: u32) -> crate::Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    info!(max_connections, "Database pool ready");
    Ok(pool)
}

pub async fn init_pool(database_url: &str) -> crate::Result<DbPool> {
    init_pool_with_size(database_url, POOL_SIZE).await
}

/// Apply pending schema migrations from `migrations/`.
pub async fn run_migrations(pool: &DbPool) -> crate::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_migrates() {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'pending_message'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }
}
