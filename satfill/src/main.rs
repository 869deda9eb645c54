//! satfill - satellite imagery archive reconciliation and backfill
//!
//! Subcommands:
//! - `check`: report which slots of a range are missing locally
//! - `fill`: reconcile, then fetch every missing slot
//! - `retry-failed`: re-attempt slots the cache recorded as failed
//! - `cache-stats`: existence cache record counts
//! - `init-config`: write a config file populated with the defaults

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use satfill::models::FailedSlot;
use satfill::{
    BackfillEngine, EngineConfig, ExistenceCache, FillRequest, ProductSpec, ReconcileResult,
    SatelliteId,
};
use satfill_common::config::TomlConfig;
use satfill_common::events::{EventBus, FillEvent};
use std::path::{Path, PathBuf};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for satfill
#[derive(Parser, Debug)]
#[command(name = "satfill")]
#[command(about = "Reconcile and backfill a local GOES imagery archive")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ~/.config/satfill/satfill.toml)
    #[arg(long, global = true, env = "SATFILL_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the existence cache
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report missing slots without fetching anything
    Check(RangeArgs),
    /// Reconcile and fetch every missing slot
    Fill(RangeArgs),
    /// Re-attempt slots recorded as failed by earlier runs
    RetryFailed(RangeArgs),
    /// Show existence cache record counts
    CacheStats,
    /// Write a config file holding the default settings
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct RangeArgs {
    /// Satellite (GOES16/east, GOES18/west)
    #[arg(short, long)]
    satellite: SatelliteId,

    /// Product slug, sector and band (e.g. FD-C13, CONUS-C02)
    #[arg(short, long)]
    product: ProductSpec,

    /// Range start, UTC (RFC 3339 or YYYY-MM-DDTHH:MM)
    #[arg(long, value_parser = parse_utc)]
    start: DateTime<Utc>,

    /// Range end, UTC, inclusive
    #[arg(long, value_parser = parse_utc)]
    end: DateTime<Utc>,

    /// Scan interval in minutes (default: sector cadence)
    #[arg(short, long)]
    interval_minutes: Option<i64>,

    /// Local archive root folder
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Frames younger than this many days come from the recent store
    #[arg(long)]
    recency_window_days: Option<u32>,
}

fn parse_utc(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(format!("'{}' is not a UTC timestamp", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // init-config's target usually does not exist yet, so it is not loaded
    let toml_config = match cli.command {
        Command::InitConfig { .. } => TomlConfig::default(),
        _ => satfill_common::config::load_or_default(cli.config.as_deref())
            .context("Failed to load configuration")?,
    };

    // RUST_LOG wins over the config file
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = &toml_config.logging.level;
                format!("satfill={level},satfill_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("satfill {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::InitConfig { force } => {
            let path = init_config(cli.config.as_deref(), force)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Command::CacheStats => {
            let engine_config = EngineConfig::resolve(&toml_config, None, cli.cache_dir.as_deref());
            cache_stats(&engine_config, cli.json).await
        }
        Command::Check(args) => {
            let (engine, request) = prepare(&toml_config, cli.cache_dir.as_deref(), &args).await?;
            let plan = engine.check(&request).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!(
                    "{} expected, {} present, {} missing",
                    plan.total_expected,
                    plan.already_present,
                    plan.missing.len()
                );
                for key in &plan.missing {
                    println!("  missing {}", key);
                }
            }
            Ok(())
        }
        Command::Fill(args) => {
            let (engine, request) = prepare(&toml_config, cli.cache_dir.as_deref(), &args).await?;
            let result = with_cancellation(&engine, |cancel| engine.run(&request, cancel)).await?;
            report(&result, cli.json)
        }
        Command::RetryFailed(args) => {
            let (engine, request) = prepare(&toml_config, cli.cache_dir.as_deref(), &args).await?;
            let result =
                with_cancellation(&engine, |cancel| engine.retry_failed(&request, cancel)).await?;
            report(&result, cli.json)
        }
    }
}

async fn prepare(
    toml_config: &satfill_common::config::TomlConfig,
    cache_dir: Option<&std::path::Path>,
    args: &RangeArgs,
) -> Result<(BackfillEngine, FillRequest)> {
    let engine_config = EngineConfig::resolve(toml_config, args.root_folder.as_deref(), cache_dir);
    info!(
        root_folder = %engine_config.root_folder.display(),
        cache_dir = %engine_config.cache_dir.display(),
        "Folders resolved"
    );

    let engine = BackfillEngine::from_config(&engine_config, EventBus::default())
        .await
        .context("Failed to initialize engine")?;

    let mut request = FillRequest::new(
        engine_config.root_folder.clone(),
        args.satellite,
        args.product,
        args.start,
        args.end,
    )
    .with_recency_window_days(
        args.recency_window_days
            .unwrap_or(engine_config.recency_window_days),
    )
    .with_settings(engine_config.fetch.clone());
    if let Some(minutes) = args.interval_minutes {
        request = request.with_interval(TimeDelta::minutes(minutes));
    }

    Ok((engine, request))
}

/// Run `work` with Ctrl-C wired to its cancellation token and events logged
async fn with_cancellation<F, Fut>(
    engine: &BackfillEngine,
    work: F,
) -> satfill_common::Result<ReconcileResult>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = satfill_common::Result<ReconcileResult>>,
{
    let cancel = CancellationToken::new();

    let ctrl_c_token = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing in-flight downloads");
                ctrl_c_token.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });

    let mut events = engine.event_bus().subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let result = work(cancel).await;

    ctrl_c.abort();
    logger.abort();
    result
}

fn log_event(event: &FillEvent) {
    match event {
        FillEvent::Progress {
            completed,
            total,
            current_key,
            phase,
            ..
        } if *total > 0 => {
            info!(
                completed,
                total,
                phase = ?phase,
                current = current_key.as_deref().unwrap_or("-"),
                "Progress {:.0}%",
                (*completed as f64 / *total as f64) * 100.0
            );
        }
        FillEvent::SlotFailed { key, error, attempts, .. } => {
            tracing::warn!(key = %key, attempts, "Failed: {}", error);
        }
        _ => tracing::debug!(?event, "Fill event"),
    }
}

fn report(result: &ReconcileResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!(
        "{} expected, {} already present, {} fetched, {} failed, {} still missing{}",
        result.total_expected,
        result.already_present,
        result.newly_fetched.len(),
        result.failed.len(),
        result.still_missing.len(),
        if result.cancelled { " (cancelled)" } else { "" }
    );
    for FailedSlot { key, error, attempts } in &result.failed {
        println!("  failed {} after {} attempt(s): {}", key, attempts, error);
    }
    Ok(())
}

/// Write the default configuration to `path` (or the user config dir)
///
/// Folder settings are filled in with what they currently resolve to so the
/// file documents where data will go.
fn init_config(path: Option<&Path>, force: bool) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => satfill_common::config::default_config_path()
            .context("No user config directory on this platform; pass --config")?,
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to replace it)", path.display());
    }

    let defaults = TomlConfig::default();
    let config = TomlConfig {
        root_folder: Some(satfill_common::config::resolve_root_folder(None, &defaults)),
        cache_dir: Some(satfill_common::config::resolve_cache_dir(None, &defaults)),
        ..defaults
    };
    satfill_common::config::write_toml_config(&config, &path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

async fn cache_stats(config: &EngineConfig, json: bool) -> Result<()> {
    let cache = ExistenceCache::open(&config.cache_dir)
        .await
        .context("Failed to open existence cache")?;
    let stats = cache.stats().await?;
    cache.close().await;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "total": stats.total,
                "present": stats.present,
                "absent": stats.absent,
                "failed": stats.failed,
            })
        );
    } else {
        println!(
            "{} records: {} present, {} absent ({} with fetch errors)",
            stats.total, stats.present, stats.absent, stats.failed
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_utc_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        assert_eq!(parse_utc("2024-03-05T12:00:00Z").unwrap(), expected);
        assert_eq!(parse_utc("2024-03-05T12:00").unwrap(), expected);
        assert_eq!(parse_utc("2024-03-05 12:00").unwrap(), expected);
        assert!(parse_utc("yesterday").is_err());
    }

    #[test]
    fn test_cli_parses_fill() {
        let cli = Cli::try_parse_from([
            "satfill",
            "fill",
            "--satellite",
            "east",
            "--product",
            "FD-C13",
            "--start",
            "2024-03-05T00:00",
            "--end",
            "2024-03-05T01:00",
        ])
        .unwrap();
        match cli.command {
            Command::Fill(args) => {
                assert_eq!(args.satellite, SatelliteId::Goes16);
                assert_eq!(args.product.slug(), "FD-C13");
                assert!(args.interval_minutes.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("satfill.toml");

        let written = init_config(Some(&path), false).unwrap();
        assert_eq!(written, path);
        let config = satfill_common::config::load_toml_config(&path).unwrap();
        assert!(config.root_folder.is_some());
        assert!(config.cache_dir.is_some());
        assert_eq!(config.logging.level, "info");

        std::fs::write(&path, "root_folder = \"/elsewhere\"\n").unwrap();
        assert!(init_config(Some(&path), false).is_err());
        assert_eq!(
            satfill_common::config::load_toml_config(&path).unwrap().root_folder,
            Some(PathBuf::from("/elsewhere"))
        );

        init_config(Some(&path), true).unwrap();
        let replaced = satfill_common::config::load_toml_config(&path).unwrap();
        assert_ne!(replaced.root_folder, Some(PathBuf::from("/elsewhere")));
    }

    #[test]
    fn test_cli_parses_init_config() {
        let cli = Cli::try_parse_from(["satfill", "init-config", "--force"]).unwrap();
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }
}
