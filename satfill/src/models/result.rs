//! Reconcile plan and run result

use super::slot::SlotKey;
use crate::error::FetchError;
use serde::Serialize;

/// Output of reconciliation, before anything is fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub total_expected: usize,
    pub already_present: usize,
    /// Ascending by timestamp
    pub missing: Vec<SlotKey>,
}

impl ReconcilePlan {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// A slot that failed terminally during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedSlot {
    pub key: SlotKey,
    pub error: FetchError,
    pub attempts: u32,
}

/// Final report of a reconcile + fill run
///
/// Slots that were never attempted (cancellation, deadline) are listed in
/// `still_missing`, not in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub total_expected: usize,
    pub already_present: usize,
    pub newly_fetched: Vec<SlotKey>,
    pub failed: Vec<FailedSlot>,
    pub still_missing: Vec<SlotKey>,
    pub cancelled: bool,
}

impl ReconcileResult {
    /// Result for a run that found nothing to fetch
    pub fn from_complete_plan(plan: &ReconcilePlan) -> Self {
        Self {
            total_expected: plan.total_expected,
            already_present: plan.already_present,
            newly_fetched: Vec::new(),
            failed: Vec::new(),
            still_missing: Vec::new(),
            cancelled: false,
        }
    }

    /// Every expected slot is now on disk
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.still_missing.is_empty()
    }

    /// Slots a follow-up run would still need to fetch
    pub fn outstanding(&self) -> Vec<SlotKey> {
        let mut keys: Vec<SlotKey> = self
            .failed
            .iter()
            .map(|f| f.key)
            .chain(self.still_missing.iter().copied())
            .collect();
        keys.sort();
        keys
    }
}
