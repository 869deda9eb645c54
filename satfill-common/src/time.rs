//! Timestamp utilities

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Drop seconds and sub-seconds from a timestamp
///
/// Slot timestamps never carry anything finer than a minute.
pub fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}
