//! File-backed copy of the setup green bit
//!
//! Kept outside the database, so an installation that was ever fully
//! configured still reads as such on a boot where storage is unreachable
//! and the engine falls back to memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Serialize, Deserialize)]
struct MarkerFile {
    has_ever_been_green: bool,
    marked_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SetupMarker {
    path: PathBuf,
}

impl SetupMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file means never green. An unreadable or corrupt one is an
    /// error, since treating it as "never" would hand out samples again.
    pub async fn is_green(&self) -> SyncResult<bool> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "failed to read setup marker {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        let marker: MarkerFile = serde_json::from_str(&raw).map_err(|e| {
            SyncError::Storage(format!(
                "corrupt setup marker {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(marker.has_ever_been_green)
    }

    /// Record the green bit. Idempotent; never writes `false`.
    pub async fn mark_green(&self) -> SyncResult<()> {
        if self.is_green().await.unwrap_or(false) {
            debug!(path = %self.path.display(), "Setup marker already green");
            return Ok(());
        }

        let body = serde_json::to_string_pretty(&MarkerFile {
            has_ever_been_green: true,
            marked_at: Utc::now(),
        })
        .map_err(|e| SyncError::Internal(format!("failed to encode setup marker: {}", e)))?;

        let io_err = |e: std::io::Error| {
            SyncError::Storage(format!(
                "failed to write setup marker {}: {}",
                self.path.display(),
                e
            ))
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        // Write then rename so a crash never leaves a half-written marker
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;

        info!(path = %self.path.display(), "Recorded setup marker");
        Ok(())
    }
}
