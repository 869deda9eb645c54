//! Timestamp ⇄ locator/path mapping
//!
//! Pure functions only: no I/O, no clock reads. Everything that names a slot
//! (remote URL, archive object pattern, local file) is derived here so the
//! reconciler, the stores and the cache agree on one layout.

use crate::models::{ProductSpec, SatelliteId, SlotKey};
use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Timelike, Utc};
use regex::Regex;
use satfill_common::time::truncate_to_minute;
use satfill_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Extension of every raster in the local archive
pub const RASTER_EXTENSION: &str = "jpg";

/// Expected scan timestamps from `start` to `end` inclusive
///
/// Both ends are truncated to the minute first. `end` is included only when it
/// falls on the grid. An empty grid is returned when `start > end`.
pub fn expected_grid(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: TimeDelta,
) -> Result<Vec<DateTime<Utc>>> {
    if interval <= TimeDelta::zero() {
        return Err(Error::InvalidInterval(format!(
            "interval must be positive, got {}s",
            interval.num_seconds()
        )));
    }
    if interval.num_milliseconds() % 60_000 != 0 {
        return Err(Error::InvalidInterval(format!(
            "interval must be a whole number of minutes, got {}s",
            interval.num_seconds()
        )));
    }

    let start = truncate_to_minute(start);
    let end = truncate_to_minute(end);
    if start > end {
        return Ok(Vec::new());
    }

    let steps = (end - start).num_minutes() / interval.num_minutes();
    let mut grid = Vec::with_capacity(steps as usize + 1);
    for step in 0..=steps {
        // Multiply rather than accumulate so every point depends only on start
        let offset = TimeDelta::minutes(interval.num_minutes() * step);
        grid.push(start + offset);
    }
    Ok(grid)
}

/// Nominal cadence of the product's sector
///
/// Used when a request leaves the interval unspecified.
pub fn default_interval(product: &ProductSpec) -> TimeDelta {
    product.sector().nominal_cadence()
}

/// `{YYYY}{DDD}{HH}{MM}` stamp shared by CDN and local file names
fn julian_stamp(ts: DateTime<Utc>) -> String {
    format!(
        "{:04}{:03}{:02}{:02}",
        ts.year(),
        ts.ordinal(),
        ts.hour(),
        ts.minute()
    )
}

/// URL of the ready-made frame on the short-retention CDN
///
/// Layout: `{base}/GOES16/ABI/FD/13/20240651200_GOES16-ABI-FD-13-1808x1808.jpg`
pub fn recent_locator(key: &SlotKey, base_url: &str) -> String {
    let product = key.product();
    let sector = product.sector();
    format!(
        "{}/{}/ABI/{}/{:02}/{}_{}-ABI-{}-{:02}-{}.{}",
        base_url.trim_end_matches('/'),
        key.satellite().code(),
        sector.cdn_path(),
        product.band(),
        julian_stamp(key.timestamp()),
        key.satellite().code(),
        sector.code(),
        product.band(),
        sector.cdn_resolution(),
        RASTER_EXTENSION
    )
}

/// Location of a slot's raw payload in the long-retention archive
///
/// Object names embed the scan mode, seconds, end time and creation time,
/// none of which are known in advance, so the slot is described as a pattern
/// with a single-character wildcard for the scan mode and a trailing `*`.
#[derive(Debug, Clone)]
pub struct ArchiveLocator {
    /// Bucket namespace, e.g. `noaa-goes16`
    pub bucket: String,
    /// Hour directory, e.g. `ABI-L2-CMIPF/2024/065/12/`
    pub prefix: String,
    /// Full object key pattern (`?` = one char, `*` = any run)
    pub pattern: String,
    matcher: Regex,
}

impl ArchiveLocator {
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Result<Self> {
        let pattern = pattern.into();
        let matcher = wildcard_regex(&pattern)?;
        Ok(Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            pattern,
            matcher,
        })
    }

    /// Literal part of the pattern before the first wildcard
    ///
    /// This is what a listing call filters on server side.
    pub fn list_prefix(&self) -> &str {
        let end = self
            .pattern
            .find(['?', '*'])
            .unwrap_or(self.pattern.len());
        &self.pattern[..end]
    }

    /// Whether an object key satisfies the pattern
    pub fn matches(&self, object_key: &str) -> bool {
        self.matcher.is_match(object_key)
    }

    /// Pick the object for the slot among listed keys
    ///
    /// Several candidates can exist for one slot (reprocessed files); the
    /// lexicographically latest wins.
    pub fn select<'a, I>(&self, keys: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter().filter(|k| self.matches(k)).max()
    }
}

/// Anchored regex for a `?`/`*` wildcard pattern; everything else is literal
fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::from("(?s)^");
    let mut literal_start = 0;
    for (at, wildcard) in pattern.match_indices(['?', '*']) {
        expr.push_str(&regex::escape(&pattern[literal_start..at]));
        expr.push_str(if wildcard == "?" { "." } else { ".*" });
        literal_start = at + wildcard.len();
    }
    expr.push_str(&regex::escape(&pattern[literal_start..]));
    expr.push('$');
    Regex::new(&expr).map_err(|e| Error::Internal(format!("archive pattern {}: {}", pattern, e)))
}

/// Archive bucket, hour prefix and object pattern for a slot
///
/// Pattern: `ABI-L2-CMIPF/2024/065/12/OR_ABI-L2-CMIPF-M?C13_G16_s20240651200*`
pub fn archive_locator(key: &SlotKey) -> Result<ArchiveLocator> {
    let ts = key.timestamp();
    let sector = key.product().sector();
    let prefix = format!(
        "{}/{:04}/{:03}/{:02}/",
        sector.archive_product(),
        ts.year(),
        ts.ordinal(),
        ts.hour()
    );
    let pattern = format!(
        "{}OR_ABI-L2-{}-M?C{:02}_{}_s{}*",
        prefix,
        sector.archive_token(),
        key.product().band(),
        key.satellite().platform(),
        julian_stamp(ts)
    );
    ArchiveLocator::new(key.satellite().bucket(), prefix, pattern)
}

/// File name of a slot inside its day directory
pub fn local_file_name(key: &SlotKey) -> String {
    format!(
        "{}_{}_{}.{}",
        key.satellite().code(),
        key.product().slug(),
        julian_stamp(key.timestamp()),
        RASTER_EXTENSION
    )
}

/// Directory holding every slot of one satellite/product/day
pub fn day_dir(
    base_dir: &Path,
    satellite: SatelliteId,
    product: &ProductSpec,
    ts: DateTime<Utc>,
) -> PathBuf {
    base_dir
        .join(satellite.code())
        .join(product.slug())
        .join(format!("{:04}", ts.year()))
        .join(format!("{:03}", ts.ordinal()))
}

/// `base_dir/satellite/product/year/day-of-year/filename`
pub fn local_path(key: &SlotKey, base_dir: &Path) -> PathBuf {
    day_dir(base_dir, key.satellite(), &key.product(), key.timestamp()).join(local_file_name(key))
}

/// Whether the fast store should serve a timestamp
///
/// Strictly less than the window: a frame exactly `window_days` old goes to
/// the archive, so the decision does not flip while `now` advances.
pub fn is_recent(timestamp: DateTime<Utc>, now: DateTime<Utc>, window_days: u32) -> bool {
    now - timestamp < TimeDelta::days(i64::from(window_days))
}

fn filename_regex() -> &'static Regex {
    static FILENAME_RE: OnceLock<Regex> = OnceLock::new();
    FILENAME_RE.get_or_init(|| {
        Regex::new(
            r"^(GOES1[68])_((?:FD|CONUS|M1|M2)-C\d{2})_(\d{4})(\d{3})(\d{2})(\d{2})\.jpg$",
        )
        .expect("static filename pattern")
    })
}

/// Inverse of [`local_file_name`]
///
/// Returns `None` for anything that is not a slot raster, including temp
/// files left by interrupted downloads.
pub fn parse_from_filename(name: &str) -> Option<SlotKey> {
    let caps = filename_regex().captures(name)?;

    let satellite: SatelliteId = caps[1].parse().ok()?;
    let product = ProductSpec::from_slug(&caps[2]).ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let ordinal: u32 = caps[4].parse().ok()?;
    let hour: u32 = caps[5].parse().ok()?;
    let minute: u32 = caps[6].parse().ok()?;

    let timestamp = NaiveDate::from_yo_opt(year, ordinal)?
        .and_hms_opt(hour, minute, 0)?
        .and_utc();
    Some(SlotKey::new(satellite, product, timestamp))
}
