//! # satfill common library
//!
//! Shared code for the satfill workspace:
//! - Error and result types
//! - Bootstrap configuration (TOML file, root folder and cache directory resolution)
//! - Fill event types and the broadcast EventBus
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
