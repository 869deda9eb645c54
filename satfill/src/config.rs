//! Engine settings
//!
//! Runtime values derived from the bootstrap TOML configuration. Everything a
//! run needs travels inside [`FetchSettings`] on the request; nothing is read
//! from global state.

use crate::services::fetch_coordinator::RetryPolicy;
use satfill_common::config::{EndpointsConfig, FetchConfig, TomlConfig};
use satfill_common::time::millis_to_duration;
use std::path::PathBuf;
use std::time::Duration;

/// Fetch tuning for one run
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub recent_concurrency: usize,
    pub archive_concurrency: usize,
    pub retry: RetryPolicy,
    /// Budget for one `exists` + `fetch` attempt
    pub attempt_timeout: Duration,
    /// No new attempts are scheduled once this has elapsed
    pub overall_deadline: Option<Duration>,
    pub avg_archive_payload_bytes: u64,
    pub disk_safety_margin: f64,
    pub progress_interval: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for FetchSettings {
    fn from(config: &FetchConfig) -> Self {
        Self {
            recent_concurrency: config.recent_concurrency.max(1),
            archive_concurrency: config.archive_concurrency.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                base_delay: millis_to_duration(config.base_delay_ms),
                max_delay: millis_to_duration(config.max_delay_ms),
                max_jitter: millis_to_duration(config.max_jitter_ms),
            },
            attempt_timeout: millis_to_duration(config.attempt_timeout_ms),
            overall_deadline: config.overall_deadline_ms.map(millis_to_duration),
            avg_archive_payload_bytes: config.avg_archive_payload_bytes,
            disk_safety_margin: config.disk_safety_margin.max(0.0),
            progress_interval: millis_to_duration(config.progress_interval_ms),
        }
    }
}

/// Fully resolved engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub root_folder: PathBuf,
    pub cache_dir: PathBuf,
    pub endpoints: EndpointsConfig,
    pub fetch: FetchSettings,
    pub recency_window_days: u32,
    pub renderer: Option<satfill_common::config::RendererConfig>,
    /// Where archive payloads are downloaded before rendering
    pub scratch_dir: PathBuf,
}

impl EngineConfig {
    /// Resolve folders (CLI → env → TOML → default) and convert tunables
    pub fn resolve(
        toml: &TomlConfig,
        root_folder_arg: Option<&std::path::Path>,
        cache_dir_arg: Option<&std::path::Path>,
    ) -> Self {
        let root_folder = satfill_common::config::resolve_root_folder(root_folder_arg, toml);
        let cache_dir = satfill_common::config::resolve_cache_dir(cache_dir_arg, toml);
        let scratch_dir = cache_dir.join("scratch");

        Self {
            root_folder,
            cache_dir,
            endpoints: toml.endpoints.clone(),
            fetch: FetchSettings::from(&toml.fetch),
            recency_window_days: toml.fetch.recency_window_days,
            renderer: toml.renderer.clone(),
            scratch_dir,
        }
    }
}
