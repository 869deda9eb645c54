//! Configuration resolution tests
//!
//! Tests that manipulate SATFILL_* environment variables are marked with
//! #[serial] so they never run in parallel.

use satfill_common::config::{
    default_config_path, load_or_default, load_toml_config, resolve_cache_dir, resolve_config_path,
    resolve_root_folder, write_toml_config, FetchConfig, RendererConfig, TomlConfig,
    CACHE_DIR_ENV_VAR, CONFIG_ENV_VAR, ROOT_FOLDER_ENV_VAR,
};
use satfill_common::Error;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn clear_env() {
    env::remove_var(CONFIG_ENV_VAR);
    env::remove_var(ROOT_FOLDER_ENV_VAR);
    env::remove_var(CACHE_DIR_ENV_VAR);
}

#[test]
#[serial]
fn test_root_folder_priority_order() {
    clear_env();
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    // TOML beats the compiled default
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/toml"));

    // Environment beats TOML
    env::set_var(ROOT_FOLDER_ENV_VAR, "/from/env");
    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/env"));

    // CLI beats everything
    assert_eq!(
        resolve_root_folder(Some(Path::new("/from/cli")), &config),
        PathBuf::from("/from/cli")
    );

    clear_env();
}

#[test]
#[serial]
fn test_blank_env_var_is_ignored() {
    clear_env();
    env::set_var(CACHE_DIR_ENV_VAR, "   ");
    let config = TomlConfig {
        cache_dir: Some(PathBuf::from("/from/toml/cache")),
        ..Default::default()
    };

    assert_eq!(resolve_cache_dir(None, &config), PathBuf::from("/from/toml/cache"));
    clear_env();
}

#[test]
#[serial]
fn test_compiled_default_is_used_without_overrides() {
    clear_env();
    let folder = resolve_root_folder(None, &TomlConfig::default());
    assert!(!folder.as_os_str().is_empty());
    assert!(folder.to_string_lossy().contains("satfill"));
}

#[test]
#[serial]
fn test_config_path_from_env() {
    clear_env();
    env::set_var(CONFIG_ENV_VAR, "/etc/satfill/custom.toml");
    assert_eq!(
        resolve_config_path(None),
        Some(PathBuf::from("/etc/satfill/custom.toml"))
    );
    assert_eq!(
        resolve_config_path(Some(Path::new("/cli/satfill.toml"))),
        Some(PathBuf::from("/cli/satfill.toml"))
    );
    clear_env();
}

#[test]
fn test_write_then_load_preserves_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("satfill.toml");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/data/goes")),
        fetch: FetchConfig {
            archive_concurrency: 2,
            overall_deadline_ms: Some(900_000),
            ..FetchConfig::default()
        },
        renderer: Some(RendererConfig {
            program: PathBuf::from("/usr/local/bin/cmi2jpg"),
            args: vec!["--colormap".into(), "ir".into()],
        }),
        ..Default::default()
    };

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded.root_folder, config.root_folder);
    assert_eq!(loaded.fetch.archive_concurrency, 2);
    assert_eq!(loaded.fetch.overall_deadline_ms, Some(900_000));
    assert_eq!(loaded.renderer.unwrap().args, vec!["--colormap", "ir"]);
}

#[test]
fn test_malformed_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("satfill.toml");
    std::fs::write(&path, "[fetch\nrecent_concurrency = ").unwrap();

    assert!(matches!(load_toml_config(&path), Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_explicit_missing_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(matches!(load_or_default(Some(&missing)), Err(Error::Config(_))));
}

#[test]
fn test_default_config_path_is_under_satfill_dir() {
    if let Some(path) = default_config_path() {
        assert!(path.ends_with("satfill/satfill.toml"));
    }
}
