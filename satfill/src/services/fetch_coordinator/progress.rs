//! Rate-limited progress reporting
//!
//! Workers bump counters on a shared [`ProgressTracker`]; a single monitor
//! task samples it on an interval and publishes `FillEvent::Progress`. Event
//! volume is therefore bounded by the interval, not by the number of slots.

use satfill_common::events::{EventBus, FillEvent, FillPhase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Counters shared between fetch workers and the monitor
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    current_key: Mutex<Option<String>>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            current_key: Mutex::new(None),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Note the slot a worker just picked up
    pub fn started(&self, key: String) {
        if let Ok(mut current) = self.current_key.lock() {
            *current = Some(key);
        }
    }

    /// A slot reached a terminal state (fetched, failed, skipped or abandoned)
    pub fn finished(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_key(&self) -> Option<String> {
        self.current_key.lock().ok().and_then(|c| c.clone())
    }

    pub fn event(&self, run_id: Uuid, phase: FillPhase) -> FillEvent {
        FillEvent::Progress {
            run_id,
            completed: self.completed(),
            total: self.total,
            current_key: self.current_key(),
            phase,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Spawn the monitor; it exits when `stop` is cancelled
///
/// Publishes only when the completed count moved since the last tick.
pub fn spawn_progress_monitor(
    tracker: Arc<ProgressTracker>,
    event_bus: EventBus,
    run_id: Uuid,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(%run_id, "Progress monitor started");
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_reported: Option<usize> = None;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let completed = tracker.completed();
                    if last_reported == Some(completed) {
                        continue;
                    }
                    last_reported = Some(completed);

                    tracing::debug!(
                        %run_id,
                        completed,
                        total = tracker.total(),
                        "Fetch progress"
                    );
                    event_bus.emit_lossy(tracker.event(run_id, FillPhase::Fetching));
                }
            }
        }

        tracing::debug!(%run_id, "Progress monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_monitor_reports_changes_only() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let tracker = Arc::new(ProgressTracker::new(3));
        let stop = CancellationToken::new();
        let run_id = Uuid::new_v4();

        let handle = spawn_progress_monitor(
            tracker.clone(),
            bus.clone(),
            run_id,
            Duration::from_millis(10),
            stop.clone(),
        );

        tracker.started("GOES16/FD-C13/2024-03-05T12:00Z".to_string());
        tracker.finished();
        tokio::time::sleep(Duration::from_millis(60)).await;
        stop.cancel();
        handle.await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let FillEvent::Progress { completed, total, .. } = event {
                assert_eq!(total, 3);
                seen.push(completed);
            }
        }
        // Several ticks elapsed but the count changed at most twice (0 then 1)
        assert!(!seen.is_empty());
        assert!(seen.len() <= 2);
        assert_eq!(seen.last(), Some(&1));
    }
}
