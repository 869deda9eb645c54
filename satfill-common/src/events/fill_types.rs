//! Fill workflow supporting types

use serde::{Deserialize, Serialize};

/// Stage of a reconcile/fill run, carried on progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPhase {
    /// Building the grid and diffing it against cache and disk
    Reconciling,
    /// Fetch tasks are being scheduled and executed
    Fetching,
    /// All tasks finished or were abandoned; result being assembled
    Finalizing,
    /// Run finished normally
    Completed,
    /// Run stopped by cancellation or deadline
    Cancelled,
}

/// Which remote source a partition targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKind {
    /// Short-retention image CDN
    Recent,
    /// Long-retention object archive
    Archive,
}

impl std::fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionKind::Recent => write!(f, "recent"),
            PartitionKind::Archive => write!(f, "archive"),
        }
    }
}
