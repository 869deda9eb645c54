//! Data model shared by the reconciler, cache and fetch pipeline

pub mod request;
pub mod result;
pub mod satellite;
pub mod slot;

pub use request::FillRequest;
pub use result::{FailedSlot, ReconcilePlan, ReconcileResult};
pub use satellite::{ProductSpec, SatelliteId, Sector};
pub use slot::{CacheRecord, SlotKey};
