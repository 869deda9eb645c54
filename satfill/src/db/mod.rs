//! Database access for satfill
//!
//! The only persistent state is the existence cache, one SQLite file.

pub mod existence_cache;

pub use existence_cache::{CacheStats, ExistenceCache, CACHE_FILE_NAME};

use satfill_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Default upper bound on pooled connections
pub const DEFAULT_MAX_CONNECTIONS: u32 = 16;

/// Open (or create) the cache database and prepare its schema
///
/// Connection options are applied to every pooled connection, so WAL mode
/// and the busy timeout hold no matter which connection a task checks out.
pub async fn init_cache_pool(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let newly_created = !db_path.exists();

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    if newly_created {
        tracing::info!(path = %db_path.display(), "Initialized new existence cache");
    } else {
        tracing::info!(path = %db_path.display(), "Opened existing existence cache");
    }

    check_integrity(&pool).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Fail when SQLite reports the file as damaged
async fn check_integrity(pool: &SqlitePool) -> Result<()> {
    let verdict: String = sqlx::query_scalar("PRAGMA quick_check")
        .fetch_one(pool)
        .await?;
    if verdict != "ok" {
        return Err(Error::CacheUnavailable(format!(
            "integrity check failed: {}",
            verdict
        )));
    }
    Ok(())
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS slot_cache (
            satellite TEXT NOT NULL,
            product TEXT NOT NULL,
            slot_time INTEGER NOT NULL,
            present INTEGER NOT NULL,
            local_path TEXT,
            last_checked TEXT NOT NULL,
            error_info TEXT,
            PRIMARY KEY (satellite, product, slot_time)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Existence cache schema ready");
    Ok(())
}
