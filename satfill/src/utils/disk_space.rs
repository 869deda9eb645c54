//! Free space probing for the archive volume

use std::io;
use std::path::Path;

/// Reports free bytes on the volume holding a path
pub trait SpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Filesystem-backed probe
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSpaceProbe;

impl SpaceProbe for FsSpaceProbe {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Bytes a pending archive batch is expected to need
///
/// `pending * avg_payload * (1 + margin)`, saturating.
pub fn estimate_required_bytes(pending: usize, avg_payload_bytes: u64, safety_margin: f64) -> u64 {
    let raw = (pending as u64).saturating_mul(avg_payload_bytes);
    let margin = safety_margin.max(0.0);
    let padded = raw as f64 * (1.0 + margin);
    if padded >= u64::MAX as f64 {
        u64::MAX
    } else {
        padded.ceil() as u64
    }
}
