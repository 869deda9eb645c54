//! Reconcile/fill request

use super::satellite::{ProductSpec, SatelliteId};
use crate::config::FetchSettings;
use chrono::{DateTime, TimeDelta, Utc};
use std::path::PathBuf;

/// Everything one run needs; no tunable is read from anywhere else
#[derive(Debug, Clone)]
pub struct FillRequest {
    pub base_dir: PathBuf,
    pub satellite: SatelliteId,
    pub product: ProductSpec,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// `None` falls back to the sector's nominal cadence
    pub interval: Option<TimeDelta>,
    pub recency_window_days: u32,
    pub settings: FetchSettings,
}

impl FillRequest {
    pub fn new(
        base_dir: impl Into<PathBuf>,
        satellite: SatelliteId,
        product: ProductSpec,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            satellite,
            product,
            start,
            end,
            interval: None,
            recency_window_days: 7,
            settings: FetchSettings::default(),
        }
    }

    pub fn with_interval(mut self, interval: TimeDelta) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_recency_window_days(mut self, days: u32) -> Self {
        self.recency_window_days = days;
        self
    }

    pub fn with_settings(mut self, settings: FetchSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Interval the grid is built with
    pub fn effective_interval(&self) -> TimeDelta {
        self.interval
            .unwrap_or_else(|| crate::services::time_index::default_interval(&self.product))
    }
}
