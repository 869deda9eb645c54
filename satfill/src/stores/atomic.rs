//! Atomic file placement
//!
//! Every raster lands at its final path through a rename from a sibling
//! temp file. A partially written file is never visible under the final name,
//! and the temp file is deleted when its handle drops on any early exit or
//! task cancellation.

use crate::error::FetchError;
use futures::{Stream, StreamExt};
use std::path::Path;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;

/// Hidden temp file beside `dest`: `.{file_name}.{random}.part`
///
/// Same directory as `dest` so the final rename never crosses filesystems.
/// The leading dot and `.part` suffix keep it out of archive scans.
pub fn temp_file_beside(dest: &Path) -> std::io::Result<NamedTempFile> {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let prefix = format!(".{}.", name);
    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".part")
        .tempfile_in(parent)
}

async fn ensure_parent(dest: &Path) -> Result<(), FetchError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FetchError::from_io(e, &format!("create {}", parent.display())))?;
    }
    Ok(())
}

fn persist(temp: TempPath, dest: &Path) -> Result<(), FetchError> {
    temp.persist(dest).map_err(|e| {
        FetchError::from_io(e.error, &format!("rename into {}", dest.display()))
    })
}

/// Stream chunks into a temp file next to `dest`, then rename into place
///
/// Returns the number of bytes written.
pub async fn write_stream_atomic<S, B, E>(dest: &Path, chunks: S) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<FetchError>,
{
    futures::pin_mut!(chunks);
    ensure_parent(dest).await?;

    let temp = temp_file_beside(dest)
        .map_err(|e| FetchError::from_io(e, &format!("temp file for {}", dest.display())))?;
    let (file, temp_path) = temp.into_parts();
    let context = temp_path.display().to_string();
    let mut file = tokio::fs::File::from_std(file);

    let mut written = 0u64;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(Into::into)?;
        let bytes = chunk.as_ref();
        file.write_all(bytes)
            .await
            .map_err(|e| FetchError::from_io(e, &context))?;
        written += bytes.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| FetchError::from_io(e, &context))?;
    file.sync_all()
        .await
        .map_err(|e| FetchError::from_io(e, &context))?;
    drop(file);

    persist(temp_path, dest)?;
    Ok(written)
}

/// Copy an existing local file into `dest` atomically
pub async fn copy_file_atomic(src: &Path, dest: &Path) -> Result<u64, FetchError> {
    ensure_parent(dest).await?;
    let temp_path = temp_file_beside(dest)
        .map_err(|e| FetchError::from_io(e, &format!("temp file for {}", dest.display())))?
        .into_temp_path();

    let copied = tokio::fs::copy(src, &temp_path)
        .await
        .map_err(|e| FetchError::from_io(e, &format!("copy {}", src.display())))?;

    persist(temp_path, dest)?;
    Ok(copied)
}
