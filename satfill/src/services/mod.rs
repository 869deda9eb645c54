//! Engine services
//!
//! - `time_index`: slot grid, locators and local paths (pure functions)
//! - `archive_scanner`: local day-directory listing
//! - `reconciler`: expected-versus-present diffing
//! - `fetch_coordinator`: partitioned, retried, cancellable fetching
//! - `backfill_engine`: run orchestration and lifecycle events

pub mod archive_scanner;
pub mod backfill_engine;
pub mod fetch_coordinator;
pub mod reconciler;
pub mod time_index;

pub use backfill_engine::BackfillEngine;
pub use fetch_coordinator::{FetchCoordinator, FillOutcome, RetryPolicy};
pub use reconciler::Reconciler;
