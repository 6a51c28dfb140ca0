//! Error taxonomy for the ingestion pipeline.
//!
//! Variants fall into two groups: transient I/O failures that the
//! [`RetryPolicy`](crate::retry::RetryPolicy) is allowed to retry, and fatal
//! failures (configuration, local I/O, serialization) that abort a run
//! immediately. Structural absence in the page is never an error; the
//! extractor degrades to empty values instead.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0} is not set")]
    MissingCredential(&'static str),

    #[error("invalid storage connection string: {0}")]
    InvalidCredential(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("render failed for {url}: {reason}")]
    Render { url: String, reason: String },

    #[error("upload of {object} failed with HTTP {status}: {body}")]
    Upload {
        object: String,
        status: u16,
        body: String,
    },

    #[error("http transport error")]
    Http(#[from] reqwest::Error),

    #[error("i/o error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error")]
    Json(#[from] serde_json::Error),
}

impl IngestError {
    pub fn render(url: &str, reason: impl ToString) -> Self {
        IngestError::Render {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure is worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::Render { .. } | IngestError::Upload { .. } | IngestError::Http(_)
        )
    }
}
