//! Configuration loading and folder resolution
//!
//! Bootstrap configuration lives in a TOML file. Every value has a built-in
//! default so a missing file is never an error; tunables are handed to the
//! engine as plain values, nothing here is read by the engine at runtime.
//!
//! # Resolution priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SATFILL_CONFIG";
/// Environment variable overriding the archive root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "SATFILL_ROOT_FOLDER";
/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV_VAR: &str = "SATFILL_CACHE_DIR";

/// Bootstrap configuration loaded from `satfill.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root of the local imagery archive
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Directory holding the existence cache database
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Remote endpoints
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Fetch tuning
    #[serde(default)]
    pub fetch: FetchConfig,

    /// External rendering program (archive payload to raster)
    #[serde(default)]
    pub renderer: Option<RendererConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Remote data source endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// Base URL of the short-retention image CDN
    #[serde(default = "default_recent_base_url")]
    pub recent_base_url: String,

    /// Archive bucket URL template; `{bucket}` is replaced per satellite
    #[serde(default = "default_archive_url_template")]
    pub archive_url_template: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            recent_base_url: default_recent_base_url(),
            archive_url_template: default_archive_url_template(),
        }
    }
}

/// Fetch tuning values
///
/// Durations are expressed in milliseconds so the file stays flat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: u32,
    #[serde(default = "default_recent_concurrency")]
    pub recent_concurrency: usize,
    #[serde(default = "default_archive_concurrency")]
    pub archive_concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Overall batch deadline; unset means no deadline
    #[serde(default)]
    pub overall_deadline_ms: Option<u64>,
    #[serde(default = "default_avg_archive_payload_bytes")]
    pub avg_archive_payload_bytes: u64,
    /// Extra fraction of space required on top of the estimate (0.2 = 20%)
    #[serde(default = "default_disk_safety_margin")]
    pub disk_safety_margin: f64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            recency_window_days: default_recency_window_days(),
            recent_concurrency: default_recent_concurrency(),
            archive_concurrency: default_archive_concurrency(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            overall_deadline_ms: None,
            avg_archive_payload_bytes: default_avg_archive_payload_bytes(),
            disk_safety_margin: default_disk_safety_margin(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

/// External renderer invocation
///
/// The program is called as `program [args...] <input> <output>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_recent_base_url() -> String {
    "https://cdn.star.nesdis.noaa.gov".to_string()
}

fn default_archive_url_template() -> String {
    "https://{bucket}.s3.amazonaws.com".to_string()
}

fn default_recency_window_days() -> u32 {
    7
}

fn default_recent_concurrency() -> usize {
    8
}

fn default_archive_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_jitter_ms() -> u64 {
    250
}

fn default_attempt_timeout_ms() -> u64 {
    60_000
}

fn default_avg_archive_payload_bytes() -> u64 {
    // Full disk CMI payloads for the IR bands run around 30 MB
    30 * 1024 * 1024
}

fn default_disk_safety_margin() -> f64 {
    0.2
}

fn default_progress_interval_ms() -> u64 {
    500
}

/// Locate the config file: CLI → `SATFILL_CONFIG` → user config dir
///
/// Returns `None` when no file exists; callers fall back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    default_config_path().filter(|p| p.exists())
}

/// `satfill/satfill.toml` under the user config dir, whether or not it exists
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("satfill").join("satfill.toml"))
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the config file if one resolves, otherwise defaults
pub fn load_or_default(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            load_toml_config(&path)
        }
        None => {
            tracing::info!("No configuration file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write a config file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Resolve the archive root folder
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    resolve_folder(
        cli_arg,
        ROOT_FOLDER_ENV_VAR,
        config.root_folder.as_deref(),
        default_root_folder,
    )
}

/// Resolve the existence cache directory
pub fn resolve_cache_dir(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    resolve_folder(
        cli_arg,
        CACHE_DIR_ENV_VAR,
        config.cache_dir.as_deref(),
        default_cache_dir,
    )
}

fn resolve_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
    fallback: fn() -> PathBuf,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    // Priority 4: OS-dependent compiled default
    fallback()
}

fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("satfill").join("archive"))
        .unwrap_or_else(|| PathBuf::from("./satfill_data/archive"))
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("satfill"))
        .unwrap_or_else(|| PathBuf::from("./satfill_data/cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert!(config.root_folder.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.fetch.recency_window_days, 7);
        assert_eq!(config.fetch.recent_concurrency, 8);
        assert_eq!(config.fetch.archive_concurrency, 4);
        assert_eq!(config.fetch.max_attempts, 3);
        assert!(config.fetch.overall_deadline_ms.is_none());
        assert!(config.renderer.is_none());
    }

    #[test]
    fn test_partial_fetch_section() {
        let config: TomlConfig = toml::from_str(
            r#"
            root_folder = "/data/goes"

            [fetch]
            archive_concurrency = 2
            overall_deadline_ms = 600000

            [renderer]
            program = "/usr/local/bin/render-cmi"
            args = ["--palette", "ir"]
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/data/goes")));
        assert_eq!(config.fetch.archive_concurrency, 2);
        assert_eq!(config.fetch.recent_concurrency, 8);
        assert_eq!(config.fetch.overall_deadline_ms, Some(600_000));
        let renderer = config.renderer.unwrap();
        assert_eq!(renderer.program, PathBuf::from("/usr/local/bin/render-cmi"));
        assert_eq!(renderer.args, vec!["--palette", "ir"]);
    }

    #[test]
    fn test_cli_argument_wins() {
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolved = resolve_root_folder(Some(Path::new("/from/cli")), &config);
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }
}
