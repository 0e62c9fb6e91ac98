//! Write-only storage for per-step screenshots and DOM dumps.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::Result;

/// Artifacts are keyed by job id and step index.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_screenshot(&self, job_id: &str, step: u32, png: &[u8]) -> Result<()>;
    async fn put_dom(&self, job_id: &str, step: u32, html: &str) -> Result<()>;
}

/// Stores artifacts under a root directory:
///
/// ```text
/// <root>/screenshots/<job>/screenshot_<step>.png
/// <root>/dom/<job>/dom_<step>.html
/// ```
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn screenshot_path(&self, job_id: &str, step: u32) -> PathBuf {
        self.root
            .join("screenshots")
            .join(job_id)
            .join(format!("screenshot_{}.png", step))
    }

    pub fn dom_path(&self, job_id: &str, step: u32) -> PathBuf {
        self.root
            .join("dom")
            .join(job_id)
            .join(format!("dom_{}.html", step))
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await?;
    debug!("wrote {} ({} bytes)", path.display(), data.len());
    Ok(())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put_screenshot(&self, job_id: &str, step: u32, png: &[u8]) -> Result<()> {
        write_file(&self.screenshot_path(job_id, step), png).await
    }

    async fn put_dom(&self, job_id: &str, step: u32, html: &str) -> Result<()> {
        write_file(&self.dom_path(job_id, step), html.as_bytes()).await
    }
}
