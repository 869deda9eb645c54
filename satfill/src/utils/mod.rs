//! Utility modules for satfill

pub mod db_retry;
pub mod disk_space;

pub use db_retry::retry_on_lock;
pub use disk_space::{FsSpaceProbe, SpaceProbe};
