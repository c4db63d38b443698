use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::capture::synthetic::base_mime;

/// Durable local copy of finished recordings, kept for later upload
#[derive(Debug, Clone)]
pub struct RecordingArchive {
    dir: PathBuf,
}

impl RecordingArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create recordings directory: {:?}", dir))?;

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a complete recording as `<name>.<ext>`
    pub async fn persist(&self, name: &str, format: &str, payload: &[u8]) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}.{}", name, extension_for(format)));

        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("Failed to write recording: {:?}", path))?;

        info!("Saved local recording {:?} ({} bytes)", path, payload.len());

        Ok(path)
    }
}

/// File extension for a recording format
pub fn extension_for(format: &str) -> &'static str {
    match base_mime(format).to_ascii_lowercase().as_str() {
        "video/webm" | "audio/webm" => "webm",
        "video/mp4" | "audio/mp4" => "mp4",
        "video/ogg" | "audio/ogg" => "ogg",
        _ => "bin",
    }
}
