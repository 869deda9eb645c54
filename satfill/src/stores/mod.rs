//! Remote data sources
//!
//! The coordinator only sees [`RemoteStore`] trait objects. Two backends ship:
//! the recent-imagery CDN and the long-retention archive, the latter paired
//! with a [`Renderer`] that turns raw payloads into rasters.

pub mod archive;
pub mod atomic;
pub mod recent;
pub mod render;

pub use archive::ArchiveStore;
pub use recent::RecentStore;
pub use render::{CommandRenderer, RenderError, Renderer, UnconfiguredRenderer};

use crate::error::FetchError;
use crate::models::SlotKey;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Which partition a store serves
pub type StoreKind = satfill_common::events::PartitionKind;

/// A source of slot rasters
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Metadata-only probe; `Ok(false)` when the remote has no data for the slot
    async fn exists(&self, key: &SlotKey) -> Result<bool, FetchError>;

    /// Place the slot's raster at `dest`
    ///
    /// `dest` either holds the complete raster afterwards or is untouched.
    async fn fetch(&self, key: &SlotKey, dest: &Path) -> Result<PathBuf, FetchError>;
}
