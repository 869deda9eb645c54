//! Archive payload rendering
//!
//! Archive objects are raw instrument data, not images. A [`Renderer`] turns
//! a downloaded payload into a raster file. The shipped implementation shells
//! out to an external program so the CPU-heavy work never runs on the async
//! runtime's worker threads.

use crate::services::time_index::RASTER_EXTENSION;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;

/// Rendering failures
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to start renderer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Renderer produced no output at {0}")]
    NoOutput(PathBuf),

    #[error("No renderer configured; add a [renderer] section to satfill.toml")]
    NotConfigured,
}

impl RenderError {
    /// Retrying cannot help: the renderer is absent or cannot be started
    pub fn is_misconfiguration(&self) -> bool {
        match self {
            RenderError::NotConfigured => true,
            RenderError::Spawn { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            RenderError::Failed { .. } | RenderError::NoOutput(_) => false,
        }
    }
}

/// Converts a raw archive payload into a raster
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `raw` and return the path of the produced raster
    ///
    /// The output may be placed anywhere; the caller moves it into the
    /// archive and removes it afterwards.
    async fn render(&self, raw: &Path) -> Result<PathBuf, RenderError>;

    /// `false` when every render is known to fail up front
    fn is_configured(&self) -> bool {
        true
    }
}

/// Runs `{program} {args...} <input> <output.jpg>`
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRenderer {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Output path next to the input: `payload.nc` → `payload.jpg`
    pub fn output_path_for(raw: &Path) -> PathBuf {
        raw.with_extension(RASTER_EXTENSION)
    }
}

impl From<&satfill_common::config::RendererConfig> for CommandRenderer {
    fn from(config: &satfill_common::config::RendererConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    async fn render(&self, raw: &Path) -> Result<PathBuf, RenderError> {
        let output = Self::output_path_for(raw);

        tracing::debug!(
            program = %self.program.display(),
            input = %raw.display(),
            output = %output.display(),
            "Rendering archive payload"
        );

        let result = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(raw)
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RenderError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            return Err(RenderError::Failed {
                code: result.status.code(),
                stderr,
            });
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(RenderError::NoOutput(output));
        }

        Ok(output)
    }
}

/// Stand-in used when no renderer is configured; every render fails
///
/// Lets reconciliation and recent-store fills run without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredRenderer;

#[async_trait]
impl Renderer for UnconfiguredRenderer {
    async fn render(&self, _raw: &Path) -> Result<PathBuf, RenderError> {
        Err(RenderError::NotConfigured)
    }

    fn is_configured(&self) -> bool {
        false
    }
}
