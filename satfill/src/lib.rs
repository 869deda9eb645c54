//! satfill library interface
//!
//! Reconciles a local satellite imagery archive against the expected scan
//! schedule and backfills gaps from a recent-imagery CDN or the long-term
//! object archive.
//!
//! Exposes public APIs for the binary and for integration testing.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod stores;
pub mod utils;

pub use crate::config::{EngineConfig, FetchSettings};
pub use crate::db::ExistenceCache;
pub use crate::error::FetchError;
pub use crate::models::{
    FillRequest, ProductSpec, ReconcilePlan, ReconcileResult, SatelliteId, Sector, SlotKey,
};
pub use crate::services::BackfillEngine;
