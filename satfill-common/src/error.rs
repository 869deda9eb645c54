//! Common error types for satfill

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for satfill operations
pub type Result<T> = std::result::Result<T, Error>;

/// Run-level errors shared across the workspace
///
/// Per-slot fetch failures are not represented here; they are collected into
/// the reconcile result instead of aborting a run.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scan interval is zero or negative
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Archive base directory does not exist
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// Not enough free space for the pending archive batch
    #[error("Insufficient disk space: {required} bytes required, {available} bytes available")]
    InsufficientDiskSpace { required: u64, available: u64 },

    /// Existence cache could not be opened or is corrupted
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
