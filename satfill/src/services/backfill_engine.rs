//! Reconcile + fill orchestration
//!
//! Ties the reconciler and fetch coordinator together for one request and
//! publishes the run lifecycle on the event bus:
//!
//! `RunStarted` → `ReconcileComplete` → `PartitionPlanned` → `Progress`* →
//! `RunCompleted`

use crate::config::EngineConfig;
use crate::db::ExistenceCache;
use crate::models::{FillRequest, ReconcilePlan, ReconcileResult, SlotKey};
use crate::services::fetch_coordinator::{FetchCoordinator, FillOutcome};
use crate::services::reconciler::Reconciler;
use crate::stores::{
    ArchiveStore, CommandRenderer, RecentStore, RemoteStore, Renderer, UnconfiguredRenderer,
};
use crate::utils::{FsSpaceProbe, SpaceProbe};
use chrono::Utc;
use satfill_common::events::{EventBus, FillEvent, FillPhase};
use satfill_common::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Entry point for reconcile and backfill runs
pub struct BackfillEngine {
    cache: ExistenceCache,
    reconciler: Reconciler,
    coordinator: FetchCoordinator,
    event_bus: EventBus,
}

impl BackfillEngine {
    pub fn new(
        cache: ExistenceCache,
        recent: Arc<dyn RemoteStore>,
        archive: Arc<dyn RemoteStore>,
        event_bus: EventBus,
        space_probe: Arc<dyn SpaceProbe>,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(cache.clone()),
            coordinator: FetchCoordinator::new(
                cache.clone(),
                recent,
                archive,
                event_bus.clone(),
                space_probe,
            ),
            cache,
            event_bus,
        }
    }

    /// Open the cache and build the production stores
    pub async fn from_config(config: &EngineConfig, event_bus: EventBus) -> Result<Self> {
        let cache = ExistenceCache::open(&config.cache_dir).await?;

        let renderer: Arc<dyn Renderer> = match &config.renderer {
            Some(renderer) => Arc::new(CommandRenderer::from(renderer)),
            None => {
                tracing::warn!("No renderer configured, archive slots cannot be filled");
                Arc::new(UnconfiguredRenderer)
            }
        };

        std::fs::create_dir_all(&config.scratch_dir)?;
        let recent = RecentStore::new(config.endpoints.recent_base_url.clone())
            .map_err(|e| Error::Config(format!("Recent store client: {}", e)))?;
        let archive = ArchiveStore::new(
            config.endpoints.archive_url_template.clone(),
            renderer,
            config.scratch_dir.clone(),
        )
        .map_err(|e| Error::Config(format!("Archive store client: {}", e)))?;

        Ok(Self::new(
            cache,
            Arc::new(recent),
            Arc::new(archive),
            event_bus,
            Arc::new(FsSpaceProbe),
        )
        .with_scratch_dir(config.scratch_dir.clone()))
    }

    /// See [`FetchCoordinator::with_scratch_dir`]
    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<std::path::PathBuf>) -> Self {
        self.coordinator = self.coordinator.with_scratch_dir(scratch_dir);
        self
    }

    pub fn cache(&self) -> &ExistenceCache {
        &self.cache
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Reconcile only; nothing is fetched
    pub async fn check(&self, request: &FillRequest) -> Result<ReconcilePlan> {
        self.reconciler.compute_missing(request).await
    }

    /// Reconcile, then fetch everything missing
    ///
    /// Pre-flight problems (missing base directory, bad interval, not enough
    /// disk space) fail the call before any fetch. Per-slot failures end up
    /// in the result.
    pub async fn run(
        &self,
        request: &FillRequest,
        cancel: CancellationToken,
    ) -> Result<ReconcileResult> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        self.announce_start(run_id, request);

        let plan = self.reconciler.compute_missing(request).await?;
        self.event_bus.emit_lossy(FillEvent::ReconcileComplete {
            run_id,
            total_expected: plan.total_expected,
            already_present: plan.already_present,
            missing: plan.missing.len(),
            timestamp: Utc::now(),
        });

        if plan.is_complete() {
            tracing::info!(%run_id, "Nothing missing, archive complete for range");
            let result = ReconcileResult::from_complete_plan(&plan);
            self.announce_completion(run_id, &result, started);
            return Ok(result);
        }

        self.fill(
            run_id,
            request,
            plan.total_expected,
            plan.already_present,
            plan.missing,
            cancel,
            started,
        )
        .await
    }

    /// Re-attempt only slots the cache records as failed
    ///
    /// Skips reconciliation and the archive scan; useful after transient
    /// outages. `total_expected` in the result counts the retried slots only.
    pub async fn retry_failed(
        &self,
        request: &FillRequest,
        cancel: CancellationToken,
    ) -> Result<ReconcileResult> {
        if !request.base_dir.is_dir() {
            return Err(Error::DirectoryNotFound(request.base_dir.clone()));
        }

        let run_id = Uuid::new_v4();
        let started = Instant::now();
        self.announce_start(run_id, request);

        let failed = self
            .cache
            .failed_keys(request.satellite, request.product, request.start, request.end)
            .await?;
        tracing::info!(%run_id, failed = failed.len(), "Retrying previously failed slots");

        self.event_bus.emit_lossy(FillEvent::ReconcileComplete {
            run_id,
            total_expected: failed.len(),
            already_present: 0,
            missing: failed.len(),
            timestamp: Utc::now(),
        });

        if failed.is_empty() {
            let result = ReconcileResult::from_complete_plan(&ReconcilePlan {
                total_expected: 0,
                already_present: 0,
                missing: Vec::new(),
            });
            self.announce_completion(run_id, &result, started);
            return Ok(result);
        }

        let total = failed.len();
        self.fill(run_id, request, total, 0, failed, cancel, started).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fill(
        &self,
        run_id: Uuid,
        request: &FillRequest,
        total_expected: usize,
        already_present: usize,
        missing: Vec<SlotKey>,
        cancel: CancellationToken,
        started: Instant,
    ) -> Result<ReconcileResult> {
        let missing_count = missing.len();
        let outcome = if cancel.is_cancelled() {
            tracing::info!(%run_id, "Cancelled before fetching started");
            FillOutcome {
                still_missing: missing,
                cancelled: true,
                ..FillOutcome::default()
            }
        } else {
            self.coordinator
                .execute(run_id, request, missing, &cancel)
                .await?
        };

        let completed = missing_count - outcome.still_missing.len();
        self.emit_phase(run_id, completed, missing_count, FillPhase::Finalizing);

        let result = ReconcileResult {
            total_expected,
            already_present: already_present + outcome.already_satisfied.len(),
            newly_fetched: outcome.newly_fetched,
            failed: outcome.failed,
            still_missing: outcome.still_missing,
            cancelled: outcome.cancelled,
        };

        let final_phase = if result.cancelled || outcome.deadline_exceeded {
            FillPhase::Cancelled
        } else {
            FillPhase::Completed
        };
        self.emit_phase(run_id, completed, missing_count, final_phase);

        self.announce_completion(run_id, &result, started);
        Ok(result)
    }

    fn announce_start(&self, run_id: Uuid, request: &FillRequest) {
        tracing::info!(
            %run_id,
            satellite = %request.satellite,
            product = %request.product,
            start = %request.start,
            end = %request.end,
            "Run started"
        );
        self.event_bus.emit_lossy(FillEvent::RunStarted {
            run_id,
            satellite: request.satellite.to_string(),
            product: request.product.to_string(),
            start: request.start,
            end: request.end,
            timestamp: Utc::now(),
        });
        self.emit_phase(run_id, 0, 0, FillPhase::Reconciling);
    }

    fn emit_phase(&self, run_id: Uuid, completed: usize, total: usize, phase: FillPhase) {
        self.event_bus.emit_lossy(FillEvent::Progress {
            run_id,
            completed,
            total,
            current_key: None,
            phase,
            timestamp: Utc::now(),
        });
    }

    fn announce_completion(&self, run_id: Uuid, result: &ReconcileResult, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            %run_id,
            total_expected = result.total_expected,
            already_present = result.already_present,
            newly_fetched = result.newly_fetched.len(),
            failed = result.failed.len(),
            still_missing = result.still_missing.len(),
            cancelled = result.cancelled,
            elapsed_ms,
            "Run completed"
        );
        self.event_bus.emit_lossy(FillEvent::RunCompleted {
            run_id,
            newly_fetched: result.newly_fetched.len(),
            failed: result.failed.len(),
            still_missing: result.still_missing.len(),
            cancelled: result.cancelled,
            elapsed_ms,
            timestamp: Utc::now(),
        });
    }
}
