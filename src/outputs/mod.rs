//! Local landing of extracted records.
//!
//! Each run produces two artifacts, named by kind and by the wall-clock run
//! timestamp:
//!
//! ```text
//! raw_dir/
//! ├── summary_20261016_081500.jsonl
//! └── features_20261016_081500.jsonl
//! ```
//!
//! The same file names are used for the uploaded objects, under the blob
//! prefix (`raw/summary_20261016_081500.jsonl`).

pub mod jsonl;

use std::path::{Path, PathBuf};

use crate::error::IngestError;
use crate::models::Records;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Summary,
    Features,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Summary => "summary",
            ArtifactKind::Features => "features",
        }
    }

    pub fn file_name(self, timestamp: &str) -> String {
        format!("{}_{}.jsonl", self.as_str(), timestamp)
    }

    /// Object name under `prefix`, e.g. `raw/features_20261016_081500.jsonl`.
    pub fn object_name(self, prefix: &str, timestamp: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            self.file_name(timestamp)
        } else {
            format!("{}/{}", prefix, self.file_name(timestamp))
        }
    }
}

/// A file written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub rows: usize,
}

/// Append both record families under `raw_dir` using `timestamp` in the names.
///
/// # Returns
///
/// The summary artifact followed by the features artifact, each with the
/// number of rows appended by this call.
///
/// # Errors
///
/// Returns [`IngestError::Io`] when the directory or either file cannot be
/// written. The summary file may already be on disk when the features write
/// fails.
#[instrument(level = "info", skip_all, fields(raw_dir = %raw_dir.display(), %timestamp))]
pub async fn write_records(
    records: &Records,
    raw_dir: &Path,
    timestamp: &str,
) -> Result<[Artifact; 2], IngestError> {
    let summary_path = raw_dir.join(ArtifactKind::Summary.file_name(timestamp));
    let features_path = raw_dir.join(ArtifactKind::Features.file_name(timestamp));

    let summary_rows = jsonl::append_jsonl(&records.summary, &summary_path).await?;
    let feature_rows = jsonl::append_jsonl(&records.features, &features_path).await?;

    info!(summary_rows, feature_rows, "Wrote local artifacts");
    Ok([
        Artifact {
            kind: ArtifactKind::Summary,
            path: summary_path,
            rows: summary_rows,
        },
        Artifact {
            kind: ArtifactKind::Features,
            path: features_path,
            rows: feature_rows,
        },
    ])
}
