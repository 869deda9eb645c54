//! Expected-versus-present diffing
//!
//! Works out which slots of a request are missing locally. The cache answers
//! first; anything it cannot vouch for is checked against the archive
//! directories, one listing per day directory. Nothing here touches the
//! network.

use crate::db::ExistenceCache;
use crate::models::{FillRequest, ReconcilePlan, SlotKey};
use crate::services::archive_scanner::scan_day_dir_async;
use crate::services::time_index::{day_dir, expected_grid, local_path};
use satfill_common::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Computes the missing set for a request
#[derive(Debug, Clone)]
pub struct Reconciler {
    cache: ExistenceCache,
}

impl Reconciler {
    pub fn new(cache: ExistenceCache) -> Self {
        Self { cache }
    }

    /// Diff the request's expected grid against cache and disk
    ///
    /// Deterministic for a given cache and disk state: `missing` is always
    /// in ascending timestamp order.
    pub async fn compute_missing(&self, request: &FillRequest) -> Result<ReconcilePlan> {
        if !request.base_dir.is_dir() {
            return Err(Error::DirectoryNotFound(request.base_dir.clone()));
        }

        let interval = request.effective_interval();
        let grid = expected_grid(request.start, request.end, interval)?;
        let keys: Vec<SlotKey> = grid
            .into_iter()
            .map(|ts| SlotKey::new(request.satellite, request.product, ts))
            .collect();
        let total_expected = keys.len();

        tracing::debug!(
            satellite = %request.satellite,
            product = %request.product,
            interval_min = interval.num_minutes(),
            total_expected,
            "Expected grid built"
        );

        // Cache pass; only records pointing into this base_dir count
        let records = self.cache.bulk_lookup(&keys).await;
        let mut satisfied: HashSet<SlotKey> = HashSet::new();
        let mut stale = 0usize;
        for key in &keys {
            if let Some(record) = records.get(key) {
                if record.is_satisfied_at(&local_path(key, &request.base_dir)) {
                    satisfied.insert(*key);
                } else if record.is_stale() {
                    stale += 1;
                    self.cache
                        .mark_absent(key, Some("local file missing"))
                        .await;
                }
            }
        }
        if stale > 0 {
            tracing::info!(stale, "Cached slots whose file vanished re-marked absent");
        }

        // Disk pass, one listing per day directory
        let mut by_day: BTreeMap<PathBuf, Vec<SlotKey>> = BTreeMap::new();
        for key in keys.iter().filter(|k| !satisfied.contains(k)) {
            let dir = day_dir(
                &request.base_dir,
                key.satellite(),
                &key.product(),
                key.timestamp(),
            );
            by_day.entry(dir).or_default().push(*key);
        }

        let mut discovered = Vec::new();
        for (dir, day_keys) in by_day {
            let on_disk = scan_day_dir_async(dir).await?;
            for key in day_keys {
                if let Some(path) = on_disk.get(&key) {
                    satisfied.insert(key);
                    discovered.push((key, path.clone()));
                }
            }
        }
        if !discovered.is_empty() {
            tracing::debug!(count = discovered.len(), "Slots found on disk, recording in cache");
            self.cache.mark_present_many(&discovered).await;
        }

        let missing: Vec<SlotKey> = keys
            .into_iter()
            .filter(|k| !satisfied.contains(k))
            .collect();
        let already_present = total_expected - missing.len();

        tracing::info!(
            total_expected,
            already_present,
            missing = missing.len(),
            "Reconciliation complete"
        );

        Ok(ReconcilePlan {
            total_expected,
            already_present,
            missing,
        })
    }
}
