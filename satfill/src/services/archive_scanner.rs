//! Local archive directory scanning
//!
//! Lists one day directory at a time and turns file names back into slot
//! keys. Directory listing is blocking I/O and runs on the blocking pool.

use crate::models::SlotKey;
use crate::services::time_index::parse_from_filename;
use satfill_common::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every slot raster directly inside `dir`, keyed by slot
///
/// A missing directory yields an empty map. Subdirectories, symlinks to
/// directories, temp files and unrelated files are ignored.
pub fn scan_day_dir(dir: &Path) -> HashMap<SlotKey, PathBuf> {
    let mut found = HashMap::new();
    if !dir.is_dir() {
        return found;
    }

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .min_depth(1)
        .max_depth(1)
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if let Some(key) = parse_from_filename(name) {
            found.insert(key, entry.into_path());
        }
    }

    found
}

/// [`scan_day_dir`] on the blocking pool
pub async fn scan_day_dir_async(dir: PathBuf) -> Result<HashMap<SlotKey, PathBuf>> {
    tokio::task::spawn_blocking(move || scan_day_dir(&dir))
        .await
        .map_err(|e| Error::Internal(format!("Archive scan task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductSpec, SatelliteId, Sector};
    use crate::services::time_index::local_path;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_scan_finds_only_slot_rasters() {
        let base = tempfile::tempdir().unwrap();
        let key = SlotKey::new(
            SatelliteId::Goes18,
            ProductSpec::new(Sector::Conus, 2).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 5, 6, 35, 0).unwrap(),
        );
        let path = local_path(&key, base.path());
        let dir = path.parent().unwrap().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, b"jpeg").unwrap();
        std::fs::write(dir.join(".GOES18_CONUS-C02_20240650635.jpg.abc.part"), b"x").unwrap();
        std::fs::write(dir.join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.join("thumbs")).unwrap();

        let found = scan_day_dir(&dir);

        assert_eq!(found.len(), 1);
        assert_eq!(found.get(&key), Some(&path));
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let base = tempfile::tempdir().unwrap();
        assert!(scan_day_dir(&base.path().join("nope")).is_empty());
    }
}
