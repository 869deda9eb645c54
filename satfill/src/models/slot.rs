//! Slot identity and cache records

use super::satellite::{ProductSpec, SatelliteId};
use chrono::{DateTime, Utc};
use satfill_common::time::truncate_to_minute;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// One expected frame: satellite, product and scan timestamp
///
/// The timestamp is normalised to whole minutes at construction, so two keys
/// built from the same scan compare equal no matter where the time came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    satellite: SatelliteId,
    product: ProductSpec,
    timestamp: DateTime<Utc>,
}

impl SlotKey {
    pub fn new(satellite: SatelliteId, product: ProductSpec, timestamp: DateTime<Utc>) -> Self {
        Self {
            satellite,
            product,
            timestamp: truncate_to_minute(timestamp),
        }
    }

    pub fn satellite(&self) -> SatelliteId {
        self.satellite
    }

    pub fn product(&self) -> ProductSpec {
        self.product
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

// Ascending by time first so sorted key lists are in scan order
impl Ord for SlotKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.satellite.cmp(&other.satellite))
            .then_with(|| self.product.cmp(&other.product))
    }
}

impl PartialOrd for SlotKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.satellite,
            self.product,
            self.timestamp.format("%Y-%m-%dT%H:%MZ")
        )
    }
}

/// Snapshot of what the existence cache knows about a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: SlotKey,
    pub present: bool,
    pub local_path: Option<PathBuf>,
    pub last_checked: DateTime<Utc>,
    pub error_info: Option<String>,
}

impl CacheRecord {
    /// Present at exactly `expected` and that file is on disk
    ///
    /// The cache is shared by every archive root, so a record pointing into
    /// another root says nothing about `expected`.
    pub fn is_satisfied_at(&self, expected: &Path) -> bool {
        self.present && self.local_path.as_deref() == Some(expected) && expected.is_file()
    }

    /// Marked present, but the recorded file has gone missing since
    pub fn is_stale(&self) -> bool {
        self.present && !self.local_path.as_ref().is_some_and(|p| p.is_file())
    }
}
