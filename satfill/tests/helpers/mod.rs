//! Test helper utilities
//!
//! Shared fixtures and test doubles for the satfill integration tests

#![allow(dead_code)]

pub mod fakes;

pub use fakes::{BrokenRenderer, CopyRenderer, FakeStore, FixedSpace, SplitSpace};

use chrono::{DateTime, TimeDelta, Utc};
use satfill::config::FetchSettings;
use satfill::db::ExistenceCache;
use satfill::services::time_index::local_path;
use satfill::services::RetryPolicy;
use satfill::{ProductSpec, SatelliteId, Sector, SlotKey};
use satfill_common::time::truncate_to_minute;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub fn fd13() -> ProductSpec {
    ProductSpec::new(Sector::FullDisk, 13).unwrap()
}

pub fn key(ts: DateTime<Utc>) -> SlotKey {
    SlotKey::new(SatelliteId::Goes16, fd13(), ts)
}

/// Whole minute `days` ago, rounded down to a 10 minute boundary
pub fn days_ago(days: i64) -> DateTime<Utc> {
    let ts = truncate_to_minute(Utc::now() - TimeDelta::days(days));
    ts - TimeDelta::minutes(i64::from(chrono::Timelike::minute(&ts) % 10))
}

/// `count` consecutive keys, 10 minutes apart, starting at `start`
pub fn keys_from(start: DateTime<Utc>, count: usize) -> Vec<SlotKey> {
    (0..count)
        .map(|i| key(start + TimeDelta::minutes(10 * i as i64)))
        .collect()
}

/// Settings that never sleep between retries
pub fn fast_settings() -> FetchSettings {
    FetchSettings {
        retry: RetryPolicy::immediate(3),
        attempt_timeout: Duration::from_secs(5),
        progress_interval: Duration::from_millis(10),
        ..FetchSettings::default()
    }
}

/// Place a raster on disk where the archive layout expects it
pub fn write_local(base_dir: &Path, key: &SlotKey) -> PathBuf {
    let path = local_path(key, base_dir);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"\xFF\xD8\xFFjpeg").unwrap();
    path
}

/// Archive root plus an open cache in its own directory
pub struct Workspace {
    pub archive: TempDir,
    pub cache_dir: TempDir,
    pub cache: ExistenceCache,
}

impl Workspace {
    pub async fn new() -> Self {
        let archive = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let cache = ExistenceCache::open(cache_dir.path()).await.unwrap();
        Self {
            archive,
            cache_dir,
            cache,
        }
    }

    pub fn base_dir(&self) -> &Path {
        self.archive.path()
    }
}
