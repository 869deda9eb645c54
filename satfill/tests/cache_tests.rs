//! Existence cache persistence, maintenance and concurrent access

mod helpers;

use chrono::{TimeDelta, TimeZone, Utc};
use helpers::*;
use satfill::db::{CacheStats, ExistenceCache, CACHE_FILE_NAME};
use satfill::{ProductSpec, SatelliteId, Sector, SlotKey};
use satfill_common::Error;
use std::collections::HashSet;
use tempfile::TempDir;
use tokio::task::JoinSet;

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let slot = key(t0());
    let path = dir.path().join("frame.jpg");

    {
        let cache = ExistenceCache::open(dir.path()).await.unwrap();
        cache.mark_present(&slot, &path).await;
        cache.close().await;
    }

    let cache = ExistenceCache::open(dir.path()).await.unwrap();
    let record = cache.lookup(&slot).await.unwrap();
    assert!(record.present);
    assert_eq!(record.local_path, Some(path));
    assert!(dir.path().join(CACHE_FILE_NAME).is_file());
}

#[tokio::test]
async fn test_bulk_lookup_returns_only_requested_keys() {
    let dir = TempDir::new().unwrap();
    let cache = ExistenceCache::open(dir.path()).await.unwrap();
    let keys = keys_from(t0(), 6);
    let other_product = SlotKey::new(
        SatelliteId::Goes16,
        ProductSpec::new(Sector::Conus, 13).unwrap(),
        t0(),
    );

    let entries: Vec<_> = keys
        .iter()
        .map(|k| (*k, dir.path().join(k.to_string().replace('/', "_"))))
        .collect();
    cache.mark_present_many(&entries).await;
    cache.mark_present(&other_product, dir.path()).await;

    let wanted = vec![keys[1], keys[3], key(t0() + TimeDelta::days(1)), other_product];
    let found = cache.bulk_lookup(&wanted).await;

    let found_keys: HashSet<SlotKey> = found.keys().copied().collect();
    let expected: HashSet<SlotKey> = [keys[1], keys[3], other_product].into_iter().collect();
    assert_eq!(found_keys, expected);
}

#[tokio::test]
async fn test_failed_keys_and_maintenance() {
    let dir = TempDir::new().unwrap();
    let cache = ExistenceCache::open(dir.path()).await.unwrap();
    let keys = keys_from(t0(), 4);

    cache.mark_present(&keys[0], dir.path()).await;
    cache.mark_absent(&keys[1], None).await;
    cache.mark_absent(&keys[2], Some("Timed out: attempt exceeded 60000 ms")).await;
    cache.mark_absent(&keys[3], Some("Not found: HTTP 404")).await;

    let failed = cache
        .failed_keys(SatelliteId::Goes16, fd13(), t0(), t0() + TimeDelta::hours(1))
        .await
        .unwrap();
    assert_eq!(failed, vec![keys[2], keys[3]]);

    assert_eq!(
        cache.stats().await.unwrap(),
        CacheStats {
            total: 4,
            present: 1,
            absent: 3,
            failed: 2
        }
    );

    assert!(cache.evict(&keys[3]).await.unwrap());
    assert!(!cache.evict(&keys[3]).await.unwrap());
    assert!(cache.lookup(&keys[3]).await.is_none());

    assert_eq!(cache.reset().await.unwrap(), 3);
    assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
}

#[tokio::test]
async fn test_corrupted_file_is_unavailable() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(CACHE_FILE_NAME),
        b"this is definitely not an sqlite database, just some bytes padding it out",
    )
    .unwrap();

    let err = ExistenceCache::open(dir.path()).await.unwrap_err();
    assert!(matches!(err, Error::CacheUnavailable(_)));
}

#[tokio::test]
async fn test_concurrent_writers_do_not_lose_records() {
    let ws = Workspace::new().await;
    let keys = keys_from(t0(), 40);
    let mut join_set = JoinSet::new();

    for (i, slot) in keys.iter().copied().enumerate() {
        let cache = ws.cache.clone();
        let path = ws.base_dir().join(format!("{}.jpg", i));
        join_set.spawn(async move {
            if i % 2 == 0 {
                cache.mark_present(&slot, &path).await;
            } else {
                cache.mark_absent(&slot, Some("Network error: reset")).await;
            }
            cache.lookup(&slot).await.is_some()
        });
    }

    while let Some(result) = join_set.join_next().await {
        assert!(result.expect("task panicked"));
    }

    assert!(!ws.cache.is_degraded());
    let stats = ws.cache.stats().await.unwrap();
    assert_eq!(stats.total, 40);
    assert_eq!(stats.present, 20);
    assert_eq!(stats.failed, 20);
}
