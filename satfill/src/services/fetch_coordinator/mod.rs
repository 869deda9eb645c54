//! Fetch coordination
//!
//! Splits the missing set between the recent and archive stores, then runs
//! one bounded worker pool per store so a slow archive never starves the
//! CDN (or the reverse). Each slot is probed, fetched, retried with backoff
//! and recorded in the existence cache. Per-slot failures are collected, never
//! propagated.
//!
//! # Stopping early
//!
//! The caller's cancellation token and the optional overall deadline both stop
//! scheduling immediately. Tasks already running finish their current attempt
//! and stop at the next retry checkpoint. Slots that never reached a terminal
//! state are reported as still missing, not failed.

mod progress;
mod retry;

pub use progress::{spawn_progress_monitor, ProgressTracker};
pub use retry::RetryPolicy;

use crate::db::ExistenceCache;
use crate::error::FetchError;
use crate::models::{FailedSlot, FillRequest, SlotKey};
use crate::services::time_index::{is_recent, local_path};
use crate::stores::{RemoteStore, StoreKind};
use crate::utils::disk_space::{estimate_required_bytes, SpaceProbe};
use chrono::{DateTime, Utc};
use satfill_common::events::{EventBus, FillEvent};
use satfill_common::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Work item for one missing slot
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub key: SlotKey,
    pub target: StoreKind,
    pub attempt_count: u32,
    pub last_error: Option<FetchError>,
}

impl FetchTask {
    pub fn new(key: SlotKey, target: StoreKind) -> Self {
        Self {
            key,
            target,
            attempt_count: 0,
            last_error: None,
        }
    }
}

/// Terminal state of one task
#[derive(Debug)]
enum SlotOutcome {
    Fetched(SlotKey),
    /// Appeared on disk or in the cache after reconciliation
    AlreadySatisfied(SlotKey),
    Failed(FailedSlot),
    /// Never attempted, or stopped at a retry checkpoint
    Abandoned(SlotKey),
}

/// What the fetch phase did with the missing set
///
/// Every input key appears in exactly one list. All lists are ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillOutcome {
    pub newly_fetched: Vec<SlotKey>,
    pub already_satisfied: Vec<SlotKey>,
    pub failed: Vec<FailedSlot>,
    pub still_missing: Vec<SlotKey>,
    /// Stopped by the caller's cancellation token
    pub cancelled: bool,
    /// Stopped by the overall deadline
    pub deadline_exceeded: bool,
}

impl FillOutcome {
    fn absorb(&mut self, outcome: SlotOutcome) {
        match outcome {
            SlotOutcome::Fetched(key) => self.newly_fetched.push(key),
            SlotOutcome::AlreadySatisfied(key) => self.already_satisfied.push(key),
            SlotOutcome::Failed(failed) => self.failed.push(failed),
            SlotOutcome::Abandoned(key) => self.still_missing.push(key),
        }
    }

    fn sort(&mut self) {
        self.newly_fetched.sort();
        self.already_satisfied.sort();
        self.failed.sort_by(|a, b| a.key.cmp(&b.key));
        self.still_missing.sort();
    }
}

/// Split keys into (recent, archive) by age relative to `now`
///
/// Input order is preserved within each partition.
pub fn partition(
    missing: &[SlotKey],
    now: DateTime<Utc>,
    window_days: u32,
) -> (Vec<SlotKey>, Vec<SlotKey>) {
    missing
        .iter()
        .copied()
        .partition(|key| is_recent(key.timestamp(), now, window_days))
}

/// Everything a worker task needs, shared by reference count
struct SlotContext {
    run_id: Uuid,
    cache: ExistenceCache,
    event_bus: EventBus,
    base_dir: PathBuf,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    progress: Arc<ProgressTracker>,
    stop: CancellationToken,
}

/// Runs fetch tasks for a missing set
pub struct FetchCoordinator {
    cache: ExistenceCache,
    recent: Arc<dyn RemoteStore>,
    archive: Arc<dyn RemoteStore>,
    event_bus: EventBus,
    space_probe: Arc<dyn SpaceProbe>,
    /// Where archive payloads are staged before rendering
    scratch_dir: Option<PathBuf>,
}

impl FetchCoordinator {
    pub fn new(
        cache: ExistenceCache,
        recent: Arc<dyn RemoteStore>,
        archive: Arc<dyn RemoteStore>,
        event_bus: EventBus,
        space_probe: Arc<dyn SpaceProbe>,
    ) -> Self {
        Self {
            cache,
            recent,
            archive,
            event_bus,
            space_probe,
            scratch_dir: None,
        }
    }

    /// Also require room on the volume holding archive scratch files
    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(scratch_dir.into());
        self
    }

    /// Refuse to start when the archive batch would not fit on disk
    ///
    /// Only archive slots are counted; recent frames are small. Payloads pass
    /// through the scratch directory on their way to `base_dir`, so the
    /// tighter of the two volumes decides.
    pub fn check_disk_space(&self, request: &FillRequest, archive_pending: usize) -> Result<()> {
        let settings = &request.settings;
        let required = estimate_required_bytes(
            archive_pending,
            settings.avg_archive_payload_bytes,
            settings.disk_safety_margin,
        );
        if required == 0 {
            return Ok(());
        }

        let mut available = self.space_probe.available_space(&request.base_dir)?;
        if let Some(scratch_dir) = self.scratch_dir.as_deref() {
            if scratch_dir != request.base_dir {
                let scratch_available = self.space_probe.available_space(scratch_dir)?;
                tracing::debug!(
                    scratch_dir = %scratch_dir.display(),
                    scratch_available,
                    "Scratch volume space"
                );
                available = available.min(scratch_available);
            }
        }
        tracing::debug!(
            archive_pending,
            required,
            available,
            "Disk space check"
        );

        if required > available {
            tracing::warn!(required, available, "Not enough disk space for archive batch");
            return Err(Error::InsufficientDiskSpace {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Fetch every key in `missing`
    ///
    /// Returns `Err` only for pre-flight failures (disk space); in that case
    /// no fetch was attempted.
    pub async fn execute(
        &self,
        run_id: Uuid,
        request: &FillRequest,
        missing: Vec<SlotKey>,
        cancel: &CancellationToken,
    ) -> Result<FillOutcome> {
        let mut outcome = FillOutcome::default();
        if missing.is_empty() {
            return Ok(outcome);
        }

        let (recent_keys, archive_keys) =
            partition(&missing, Utc::now(), request.recency_window_days);

        self.event_bus.emit_lossy(FillEvent::PartitionPlanned {
            run_id,
            recent: recent_keys.len(),
            archive: archive_keys.len(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            %run_id,
            recent = recent_keys.len(),
            archive = archive_keys.len(),
            "Missing slots partitioned"
        );

        self.check_disk_space(request, archive_keys.len())?;

        let settings = &request.settings;
        let stop = cancel.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let deadline_watcher = settings.overall_deadline.map(|deadline| {
            let stop = stop.clone();
            let deadline_hit = deadline_hit.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        tracing::warn!(deadline_ms = deadline.as_millis() as u64, "Overall deadline reached, no new attempts will start");
                        deadline_hit.store(true, Ordering::SeqCst);
                        stop.cancel();
                    }
                }
            })
        });

        let progress = Arc::new(ProgressTracker::new(missing.len()));
        let monitor_stop = CancellationToken::new();
        let monitor = spawn_progress_monitor(
            progress.clone(),
            self.event_bus.clone(),
            run_id,
            settings.progress_interval,
            monitor_stop.clone(),
        );

        let ctx = Arc::new(SlotContext {
            run_id,
            cache: self.cache.clone(),
            event_bus: self.event_bus.clone(),
            base_dir: request.base_dir.clone(),
            retry: settings.retry,
            attempt_timeout: settings.attempt_timeout,
            progress: progress.clone(),
            stop: stop.clone(),
        });

        let (recent_outcomes, archive_outcomes) = tokio::join!(
            run_partition(
                ctx.clone(),
                self.recent.clone(),
                recent_keys,
                settings.recent_concurrency
            ),
            run_partition(
                ctx.clone(),
                self.archive.clone(),
                archive_keys,
                settings.archive_concurrency
            ),
        );

        monitor_stop.cancel();
        if let Err(e) = monitor.await {
            tracing::warn!(error = %e, "Progress monitor task failed");
        }

        let deadline_exceeded = deadline_hit.load(Ordering::SeqCst);
        // Releases the watcher when the run ended before the deadline
        stop.cancel();
        if let Some(watcher) = deadline_watcher {
            let _ = watcher.await;
        }

        for slot in recent_outcomes.into_iter().chain(archive_outcomes) {
            outcome.absorb(slot);
        }
        outcome.sort();
        outcome.cancelled = cancel.is_cancelled();
        outcome.deadline_exceeded = deadline_exceeded;

        tracing::info!(
            %run_id,
            fetched = outcome.newly_fetched.len(),
            skipped = outcome.already_satisfied.len(),
            failed = outcome.failed.len(),
            still_missing = outcome.still_missing.len(),
            cancelled = outcome.cancelled,
            deadline_exceeded,
            "Fetch phase finished"
        );

        Ok(outcome)
    }
}

/// Worker pool for one store
///
/// Scheduling stops as soon as `ctx.stop` fires; unscheduled keys come back
/// as abandoned.
async fn run_partition(
    ctx: Arc<SlotContext>,
    store: Arc<dyn RemoteStore>,
    keys: Vec<SlotKey>,
    concurrency: usize,
) -> Vec<SlotOutcome> {
    let kind = store.kind();
    let mut outcomes = Vec::with_capacity(keys.len());
    if keys.is_empty() {
        return outcomes;
    }

    tracing::debug!(partition = %kind, slots = keys.len(), concurrency, "Partition starting");

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks: JoinSet<SlotOutcome> = JoinSet::new();
    let mut spawned: HashMap<task::Id, SlotKey> = HashMap::new();
    let mut pending = keys.into_iter();

    while let Some(key) = pending.next() {
        let permit = tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            ctx.progress.finished();
            outcomes.push(SlotOutcome::Abandoned(key));
            for rest in pending.by_ref() {
                ctx.progress.finished();
                outcomes.push(SlotOutcome::Abandoned(rest));
            }
            break;
        };

        let ctx = ctx.clone();
        let store = store.clone();
        let handle = tasks.spawn(async move {
            let outcome = fetch_slot(&ctx, store.as_ref(), key).await;
            ctx.progress.finished();
            drop(permit);
            outcome
        });
        spawned.insert(handle.id(), key);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, outcome)) => {
                spawned.remove(&id);
                outcomes.push(outcome);
            }
            Err(e) => match spawned.remove(&e.id()) {
                // Panicked before reaching a terminal state; the slot stays missing
                Some(key) => {
                    tracing::error!(partition = %kind, key = %key, error = %e, "Fetch task panicked");
                    ctx.progress.finished();
                    outcomes.push(SlotOutcome::Abandoned(key));
                }
                None => tracing::error!(partition = %kind, error = %e, "Unknown fetch task failed"),
            },
        }
    }

    tracing::debug!(partition = %kind, "Partition finished");
    outcomes
}

/// Drive one slot to a terminal state
async fn fetch_slot(ctx: &SlotContext, store: &dyn RemoteStore, key: SlotKey) -> SlotOutcome {
    if ctx.stop.is_cancelled() {
        return SlotOutcome::Abandoned(key);
    }

    let dest = local_path(&key, &ctx.base_dir);

    // Satisfied since reconciliation (another run, or a duplicate request)
    if let Some(record) = ctx.cache.lookup(&key).await {
        if record.is_satisfied_at(&dest) {
            tracing::debug!(key = %key, "Slot already satisfied, skipping");
            return SlotOutcome::AlreadySatisfied(key);
        }
    }
    if dest.is_file() {
        ctx.cache.mark_present(&key, &dest).await;
        tracing::debug!(key = %key, "Slot appeared on disk, skipping");
        return SlotOutcome::AlreadySatisfied(key);
    }

    ctx.progress.started(key.to_string());
    let mut task = FetchTask::new(key, store.kind());
    let max_attempts = ctx.retry.attempts();

    loop {
        if task.attempt_count > 0 {
            let delay = ctx.retry.delay(task.attempt_count);
            tracing::debug!(
                key = %key,
                attempt = task.attempt_count + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );
            tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => {
                    tracing::debug!(key = %key, attempts = task.attempt_count, "Stopped at retry checkpoint");
                    return SlotOutcome::Abandoned(key);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        task.attempt_count += 1;
        match attempt(store, &key, &dest, ctx.attempt_timeout).await {
            Ok(path) => {
                ctx.cache.mark_present(&key, &path).await;
                tracing::info!(
                    key = %key,
                    partition = %task.target,
                    attempts = task.attempt_count,
                    "Slot fetched"
                );
                return SlotOutcome::Fetched(key);
            }
            Err(err) => {
                let terminal = !err.is_retryable() || task.attempt_count >= max_attempts;
                if !terminal {
                    tracing::warn!(
                        key = %key,
                        attempt = task.attempt_count,
                        error = %err,
                        "Fetch attempt failed, will retry"
                    );
                    task.last_error = Some(err);
                    continue;
                }

                return fail_slot(ctx, task, err).await;
            }
        }
    }
}

/// One probe + fetch under the per-attempt timeout
async fn attempt(
    store: &dyn RemoteStore,
    key: &SlotKey,
    dest: &std::path::Path,
    timeout: Duration,
) -> std::result::Result<PathBuf, FetchError> {
    let work = async {
        if !store.exists(key).await? {
            return Err(FetchError::NotFound(format!(
                "{} has no data for {}",
                store.kind(),
                key
            )));
        }
        store.fetch(key, dest).await
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(format!(
            "attempt for {} exceeded {} ms",
            key,
            timeout.as_millis()
        ))),
    }
}

async fn fail_slot(ctx: &SlotContext, task: FetchTask, err: FetchError) -> SlotOutcome {
    let message = err.to_string();
    ctx.cache.mark_absent(&task.key, Some(&message)).await;

    tracing::warn!(
        key = %task.key,
        partition = %task.target,
        attempts = task.attempt_count,
        error = %message,
        "Slot failed"
    );
    ctx.event_bus.emit_lossy(FillEvent::SlotFailed {
        run_id: ctx.run_id,
        key: task.key.to_string(),
        partition: task.target,
        error: message,
        attempts: task.attempt_count,
        timestamp: Utc::now(),
    });

    SlotOutcome::Failed(FailedSlot {
        key: task.key,
        error: err,
        attempts: task.attempt_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductSpec, SatelliteId, Sector};
    use chrono::{TimeDelta, TimeZone};

    fn key_at(ts: DateTime<Utc>) -> SlotKey {
        SlotKey::new(
            SatelliteId::Goes16,
            ProductSpec::new(Sector::FullDisk, 13).unwrap(),
            ts,
        )
    }

    #[test]
    fn test_partition_by_recency() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
        let fresh = key_at(now - TimeDelta::days(1));
        let boundary = key_at(now - TimeDelta::days(7));
        let old = key_at(now - TimeDelta::days(8));

        let (recent, archive) = partition(&[old, fresh, boundary], now, 7);

        assert_eq!(recent, vec![fresh]);
        assert_eq!(archive, vec![old, boundary]);
    }

    #[test]
    fn test_outcome_sorted_and_disjoint() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let mut outcome = FillOutcome::default();
        outcome.absorb(SlotOutcome::Abandoned(key_at(t0 + TimeDelta::minutes(20))));
        outcome.absorb(SlotOutcome::Fetched(key_at(t0 + TimeDelta::minutes(10))));
        outcome.absorb(SlotOutcome::Abandoned(key_at(t0)));
        outcome.sort();

        assert_eq!(outcome.newly_fetched.len(), 1);
        assert_eq!(
            outcome.still_missing,
            vec![key_at(t0), key_at(t0 + TimeDelta::minutes(20))]
        );
        assert!(outcome.failed.is_empty());
    }
}
