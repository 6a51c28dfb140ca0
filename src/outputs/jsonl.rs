//! Newline-delimited JSON sink.
//!
//! Rows are appended, one compact JSON object per line. Existing content is
//! never truncated, so repeated writes to the same path accumulate.

use serde::Serialize;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::error::IngestError;

/// Append `rows` to `path`, creating parent directories as needed.
///
/// # Arguments
///
/// * `rows` - Records to serialize, one JSON object per line
/// * `path` - Target file; existing content is kept
///
/// # Returns
///
/// The number of rows written. An empty slice still creates the file.
///
/// # Errors
///
/// Returns [`IngestError::Io`] when the directory or file cannot be written,
/// or [`IngestError::Json`] when a row fails to serialize. Nothing is written
/// in the serialization case.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), rows = rows.len()))]
pub async fn append_jsonl<T: Serialize>(rows: &[T], path: &Path) -> Result<usize, IngestError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| IngestError::io(parent, e))?;
    }

    let mut buf = Vec::with_capacity(rows.len() * 128);
    for row in rows {
        serde_json::to_writer(&mut buf, row)?;
        buf.push(b'\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| IngestError::io(path, e))?;
    file.write_all(&buf)
        .await
        .map_err(|e| IngestError::io(path, e))?;
    file.flush().await.map_err(|e| IngestError::io(path, e))?;

    debug!(bytes = buf.len(), "Appended JSONL rows");
    Ok(rows.len())
}
