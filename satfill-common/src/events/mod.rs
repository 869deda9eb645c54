//! Event types for the satfill event system
//!
//! Provides fill-run event definitions and the EventBus that progress
//! consumers subscribe to.

mod fill_types;

pub use fill_types::{FillPhase, PartitionKind};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Fill run events
///
/// Slot keys are carried in their display form (`GOES16/FD-C13/2024-03-05T12:00Z`)
/// so consumers do not need the engine's types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FillEvent {
    /// Run accepted and reconciliation starting
    RunStarted {
        run_id: Uuid,
        satellite: String,
        product: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// Missing set computed
    ReconcileComplete {
        run_id: Uuid,
        total_expected: usize,
        already_present: usize,
        missing: usize,
        timestamp: DateTime<Utc>,
    },

    /// Missing set split across the two remote sources
    PartitionPlanned {
        run_id: Uuid,
        recent: usize,
        archive: usize,
        timestamp: DateTime<Utc>,
    },

    /// Periodic progress update
    ///
    /// Emitted at a bounded rate, never per byte.
    Progress {
        run_id: Uuid,
        completed: usize,
        total: usize,
        current_key: Option<String>,
        phase: FillPhase,
        timestamp: DateTime<Utc>,
    },

    /// One slot failed terminally
    SlotFailed {
        run_id: Uuid,
        key: String,
        partition: PartitionKind,
        error: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Run finished (normally, partially, or cancelled)
    RunCompleted {
        run_id: Uuid,
        newly_fetched: usize,
        failed: usize,
        still_missing: usize,
        cancelled: bool,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl FillEvent {
    /// Run the event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            FillEvent::RunStarted { run_id, .. }
            | FillEvent::ReconcileComplete { run_id, .. }
            | FillEvent::PartitionPlanned { run_id, .. }
            | FillEvent::Progress { run_id, .. }
            | FillEvent::SlotFailed { run_id, .. }
            | FillEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast bus for fill events
///
/// Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FillEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    ///
    /// # Examples
    ///
    /// ```
    /// use satfill_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// let mut rx = event_bus.subscribe();
    /// assert!(rx.try_recv().is_err());
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<FillEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: FillEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(run_id: Uuid, completed: usize) -> FillEvent {
        FillEvent::Progress {
            run_id,
            completed,
            total: 10,
            current_key: None,
            phase: FillPhase::Fetching,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(10);
        bus.emit_lossy(progress(Uuid::new_v4(), 1));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_past_capacity() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        for completed in 1..=4 {
            bus.emit_lossy(progress(run_id, completed));
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        match rx.recv().await.unwrap() {
            FillEvent::Progress { completed, .. } => assert_eq!(completed, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.emit_lossy(progress(run_id, 1));
        bus.emit_lossy(progress(run_id, 2));

        for expected in [1, 2] {
            match rx.recv().await.unwrap() {
                FillEvent::Progress { completed, .. } => assert_eq!(completed, expected),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let run_id = Uuid::new_v4();
        let json = serde_json::to_value(progress(run_id, 3)).unwrap();
        assert_eq!(json["type"], "Progress");
        assert_eq!(json["phase"], "Fetching");
        assert_eq!(json["completed"], 3);
        assert_eq!(progress(run_id, 3).run_id(), run_id);
    }
}
