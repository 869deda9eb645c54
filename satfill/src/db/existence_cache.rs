//! Persistent slot existence cache
//!
//! Maps `(satellite, product, timestamp)` to whether the slot's raster is in
//! the local archive. Backed by a pooled SQLite database: every operation
//! checks out its own connection for its duration, so no connection is ever
//! used by two tasks at the same time.
//!
//! # Failure semantics
//!
//! Opening is strict: a missing directory that cannot be created, an
//! unreadable or corrupted file all surface as [`Error::CacheUnavailable`].
//! After that the cache never fails a run. The first error flips it into
//! degraded mode: lookups return nothing (every slot gets re-verified against
//! disk) and writes are dropped with a warning.

use crate::models::{CacheRecord, ProductSpec, SatelliteId, SlotKey};
use crate::utils::retry_on_lock;
use chrono::{DateTime, Utc};
use satfill_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// File name of the cache database inside the cache directory
pub const CACHE_FILE_NAME: &str = "existence_cache.db";

/// Max time spent retrying a locked database before giving up
const LOCK_WAIT_MS: u64 = 5000;

const SELECT_COLUMNS: &str =
    "SELECT satellite, product, slot_time, present, local_path, last_checked, error_info FROM slot_cache";

const UPSERT_PRESENT: &str = r#"
    INSERT INTO slot_cache (satellite, product, slot_time, present, local_path, last_checked, error_info)
    VALUES (?, ?, ?, 1, ?, ?, NULL)
    ON CONFLICT(satellite, product, slot_time) DO UPDATE SET
        present = 1,
        local_path = excluded.local_path,
        last_checked = excluded.last_checked,
        error_info = NULL
"#;

const UPSERT_ABSENT: &str = r#"
    INSERT INTO slot_cache (satellite, product, slot_time, present, local_path, last_checked, error_info)
    VALUES (?, ?, ?, 0, NULL, ?, ?)
    ON CONFLICT(satellite, product, slot_time) DO UPDATE SET
        present = 0,
        local_path = NULL,
        last_checked = excluded.last_checked,
        error_info = excluded.error_info
"#;

/// Record counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub total: u64,
    pub present: u64,
    pub absent: u64,
    /// Absent records carrying an error from a failed fetch
    pub failed: u64,
}

/// Shared, cloneable handle to the existence cache
#[derive(Debug, Clone)]
pub struct ExistenceCache {
    pool: SqlitePool,
    degraded: Arc<AtomicBool>,
}

impl ExistenceCache {
    /// Open the cache file inside `cache_dir`
    pub async fn open(cache_dir: &Path) -> Result<Self> {
        Self::open_file(&cache_dir.join(CACHE_FILE_NAME)).await
    }

    /// Open a specific cache file
    pub async fn open_file(db_path: &Path) -> Result<Self> {
        let pool = crate::db::init_cache_pool(db_path, crate::db::DEFAULT_MAX_CONNECTIONS)
            .await
            .map_err(|e| match e {
                Error::CacheUnavailable(_) => e,
                other => Error::CacheUnavailable(format!("{}: {}", db_path.display(), other)),
            })?;

        Ok(Self {
            pool,
            degraded: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Whether a mid-run failure switched the cache off
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn degrade(&self, operation: &str, err: &Error) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::error!(
                operation,
                error = %err,
                "Existence cache unusable, treating every slot as absent for the rest of this run"
            );
        } else {
            tracing::debug!(operation, error = %err, "Existence cache degraded, operation skipped");
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_degraded() {
            return Err(Error::CacheUnavailable("cache is in degraded mode".to_string()));
        }
        Ok(())
    }

    /// Point lookup; local read only
    pub async fn lookup(&self, key: &SlotKey) -> Option<CacheRecord> {
        if self.is_degraded() {
            return None;
        }
        match self.try_lookup(key).await {
            Ok(record) => record,
            Err(e) => {
                self.degrade("lookup", &e);
                None
            }
        }
    }

    async fn try_lookup(&self, key: &SlotKey) -> Result<Option<CacheRecord>> {
        let pool = &self.pool;
        let satellite = key.satellite().code();
        let product = key.product().slug();
        let product = product.as_str();
        let slot_time = key.timestamp().timestamp();

        let sql = format!(
            "{} WHERE satellite = ? AND product = ? AND slot_time = ?",
            SELECT_COLUMNS
        );
        let sql = sql.as_str();

        let row = retry_on_lock("cache lookup", LOCK_WAIT_MS, || async move {
            Ok(sqlx::query(sql)
                .bind(satellite)
                .bind(product)
                .bind(slot_time)
                .fetch_optional(pool)
                .await?)
        })
        .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Batched lookup
    ///
    /// Issues one range query per (satellite, product) group rather than one
    /// per key. Keys without a record are absent from the returned map.
    pub async fn bulk_lookup(&self, keys: &[SlotKey]) -> HashMap<SlotKey, CacheRecord> {
        if self.is_degraded() || keys.is_empty() {
            return HashMap::new();
        }
        match self.try_bulk_lookup(keys).await {
            Ok(records) => records,
            Err(e) => {
                self.degrade("bulk_lookup", &e);
                HashMap::new()
            }
        }
    }

    async fn try_bulk_lookup(&self, keys: &[SlotKey]) -> Result<HashMap<SlotKey, CacheRecord>> {
        let wanted: HashSet<SlotKey> = keys.iter().copied().collect();

        let mut groups: HashMap<(SatelliteId, ProductSpec), (i64, i64)> = HashMap::new();
        for key in keys {
            let ts = key.timestamp().timestamp();
            groups
                .entry((key.satellite(), key.product()))
                .and_modify(|(lo, hi)| {
                    *lo = (*lo).min(ts);
                    *hi = (*hi).max(ts);
                })
                .or_insert((ts, ts));
        }

        let sql = format!(
            "{} WHERE satellite = ? AND product = ? AND slot_time BETWEEN ? AND ?",
            SELECT_COLUMNS
        );
        let sql = sql.as_str();
        let pool = &self.pool;

        let mut records = HashMap::with_capacity(keys.len());
        for ((satellite, product), (lo, hi)) in groups {
            let satellite = satellite.code();
            let product = product.slug();
            let product = product.as_str();

            let rows = retry_on_lock("cache bulk lookup", LOCK_WAIT_MS, || async move {
                Ok(sqlx::query(sql)
                    .bind(satellite)
                    .bind(product)
                    .bind(lo)
                    .bind(hi)
                    .fetch_all(pool)
                    .await?)
            })
            .await?;

            for row in rows {
                match row_to_record(&row) {
                    Ok(record) if wanted.contains(&record.key) => {
                        records.insert(record.key, record);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed cache row"),
                }
            }
        }

        Ok(records)
    }

    /// Record a slot as present at `local_path` (idempotent)
    pub async fn mark_present(&self, key: &SlotKey, local_path: &Path) {
        if self.is_degraded() {
            return;
        }
        if let Err(e) = self
            .try_mark_present_many(&[(*key, local_path.to_path_buf())])
            .await
        {
            self.degrade("mark_present", &e);
        }
    }

    /// Record many slots as present in one transaction
    pub async fn mark_present_many(&self, entries: &[(SlotKey, PathBuf)]) {
        if self.is_degraded() || entries.is_empty() {
            return;
        }
        if let Err(e) = self.try_mark_present_many(entries).await {
            self.degrade("mark_present_many", &e);
        }
    }

    async fn try_mark_present_many(&self, entries: &[(SlotKey, PathBuf)]) -> Result<()> {
        let pool = &self.pool;
        let checked_at = Utc::now().to_rfc3339();
        let checked_at = checked_at.as_str();

        retry_on_lock("cache mark present", LOCK_WAIT_MS, || async move {
            let mut tx = pool.begin().await?;
            for (key, path) in entries {
                sqlx::query(UPSERT_PRESENT)
                    .bind(key.satellite().code())
                    .bind(key.product().slug())
                    .bind(key.timestamp().timestamp())
                    .bind(path.to_string_lossy().into_owned())
                    .bind(checked_at)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Record a slot as absent, optionally with the error that made it so (idempotent)
    pub async fn mark_absent(&self, key: &SlotKey, error_info: Option<&str>) {
        if self.is_degraded() {
            return;
        }
        if let Err(e) = self.try_mark_absent(key, error_info).await {
            self.degrade("mark_absent", &e);
        }
    }

    async fn try_mark_absent(&self, key: &SlotKey, error_info: Option<&str>) -> Result<()> {
        let pool = &self.pool;
        let satellite = key.satellite().code();
        let product = key.product().slug();
        let product = product.as_str();
        let slot_time = key.timestamp().timestamp();
        let checked_at = Utc::now().to_rfc3339();
        let checked_at = checked_at.as_str();

        retry_on_lock("cache mark absent", LOCK_WAIT_MS, || async move {
            sqlx::query(UPSERT_ABSENT)
                .bind(satellite)
                .bind(product)
                .bind(slot_time)
                .bind(checked_at)
                .bind(error_info)
                .execute(pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Slots in range recorded absent with a fetch error, ascending
    pub async fn failed_keys(
        &self,
        satellite: SatelliteId,
        product: ProductSpec,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SlotKey>> {
        self.ensure_usable()?;

        let sql = format!(
            "{} WHERE satellite = ? AND product = ? AND slot_time BETWEEN ? AND ? \
             AND present = 0 AND error_info IS NOT NULL ORDER BY slot_time",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(satellite.code())
            .bind(product.slug())
            .bind(start.timestamp())
            .bind(end.timestamp())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row_to_record(row).map(|r| r.key))
            .collect()
    }

    /// Delete one record; the only way a record disappears besides [`reset`](Self::reset)
    pub async fn evict(&self, key: &SlotKey) -> Result<bool> {
        self.ensure_usable()?;
        let result = sqlx::query(
            "DELETE FROM slot_cache WHERE satellite = ? AND product = ? AND slot_time = ?",
        )
        .bind(key.satellite().code())
        .bind(key.product().slug())
        .bind(key.timestamp().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record
    pub async fn reset(&self) -> Result<u64> {
        self.ensure_usable()?;
        let result = sqlx::query("DELETE FROM slot_cache")
            .execute(&self.pool)
            .await?;
        tracing::info!(removed = result.rows_affected(), "Existence cache reset");
        Ok(result.rows_affected())
    }

    /// Record counts
    pub async fn stats(&self) -> Result<CacheStats> {
        self.ensure_usable()?;
        let (total, present, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(present), 0),
                COALESCE(SUM(CASE WHEN present = 0 AND error_info IS NOT NULL THEN 1 ELSE 0 END), 0)
            FROM slot_cache
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            total: total as u64,
            present: present as u64,
            absent: (total - present) as u64,
            failed: failed as u64,
        })
    }

    /// Close every pooled connection
    ///
    /// Any later operation degrades the cache.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_record(row: &SqliteRow) -> Result<CacheRecord> {
    let satellite: String = row.try_get("satellite")?;
    let product: String = row.try_get("product")?;
    let slot_time: i64 = row.try_get("slot_time")?;
    let present: bool = row.try_get("present")?;
    let local_path: Option<String> = row.try_get("local_path")?;
    let last_checked: String = row.try_get("last_checked")?;
    let error_info: Option<String> = row.try_get("error_info")?;

    let satellite: SatelliteId = satellite.parse()?;
    let product = ProductSpec::from_slug(&product)?;
    let timestamp = DateTime::<Utc>::from_timestamp(slot_time, 0)
        .ok_or_else(|| Error::Internal(format!("slot_time out of range: {}", slot_time)))?;
    let last_checked = DateTime::parse_from_rfc3339(&last_checked)
        .map_err(|e| Error::Internal(format!("bad last_checked '{}': {}", last_checked, e)))?
        .with_timezone(&Utc);

    Ok(CacheRecord {
        key: SlotKey::new(satellite, product, timestamp),
        present,
        local_path: local_path.map(PathBuf::from),
        last_checked,
        error_info,
    })
}
