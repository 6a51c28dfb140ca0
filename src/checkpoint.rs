//! Durable marker of the last ingested page state.
//!
//! Reads are forgiving: a missing, unreadable or corrupt file is logged and
//! treated as "no checkpoint". Writes go to a sibling temp file that is then
//! renamed over the target, so a reader never observes a half-written file.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::error::IngestError;
use crate::models::Checkpoint;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Option<Checkpoint> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint yet");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Checkpoint unreadable; treating as empty");
                return None;
            }
        };

        match serde_json::from_slice::<Checkpoint>(&raw) {
            Ok(cp) => {
                info!(scraped_at = ?cp.scraped_at, uploaded_at = %cp.uploaded_at, "Loaded checkpoint");
                Some(cp)
            }
            Err(e) => {
                warn!(error = %e, "Checkpoint corrupt; treating as empty");
                None
            }
        }
    }

    /// Replace the checkpoint atomically (write to `<name>.tmp`, then rename).
    ///
    /// # Arguments
    ///
    /// * `checkpoint` - State of the run that just finished uploading
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] when the parent directory, the staging file
    /// or the rename fails. A failed rename removes the staging file and
    /// leaves the previous checkpoint in place.
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| IngestError::io(parent, e))?;
        }

        let staging = self.staging_path();
        let body = serde_json::to_vec_pretty(checkpoint)?;
        fs::write(&staging, body)
            .await
            .map_err(|e| IngestError::io(&staging, e))?;
        if let Err(e) = fs::rename(&staging, &self.path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(IngestError::io(&self.path, e));
        }

        info!(scraped_at = ?checkpoint.scraped_at, "Checkpoint committed");
        Ok(())
    }
}
