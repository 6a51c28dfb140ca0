//! Runtime configuration for the extractor, controller and server.
//!
//! Every value has a default matching the production page, so an empty (or
//! absent) YAML file yields a working configuration. The struct is passed
//! explicitly into each component; nothing here is global.
//!
//! ```yaml
//! allowed_url: https://www.green.car/audi/e-tron-gt/saloon-electric
//! raw_dir: data/raw
//! retry:
//!   max_attempts: 5
//! render:
//!   settle_ms: 2000
//! ```

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

pub const DEFAULT_URL: &str = "https://www.green.car/audi/e-tron-gt/saloon-electric";

pub const DEFAULT_SECTIONS: [&str; 8] = [
    "Interior Features",
    "Entertainment",
    "Driver Convenience",
    "Security",
    "Exterior Features",
    "Passive Safety",
    "Wheels",
    "Engine/Drivetrain/Suspension",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// The single page this tool is permitted to scrape.
    pub allowed_url: String,
    /// Accordion titles that are reported; everything else is ignored.
    pub required_sections: Vec<String>,
    /// Local directory for `summary_*.jsonl` / `features_*.jsonl`.
    pub raw_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    /// Blob container that receives uploads.
    pub container: String,
    /// Object name prefix inside the container.
    pub blob_prefix: String,
    pub retry: RetrySettings,
    pub render: RenderSettings,
    pub summary: SummarySettings,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            allowed_url: DEFAULT_URL.to_string(),
            required_sections: DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect(),
            raw_dir: PathBuf::from("data/raw"),
            checkpoint_path: PathBuf::from("data/checkpoint.json"),
            container: "raw-data".to_string(),
            blob_prefix: "raw".to_string(),
            retry: RetrySettings::default(),
            render: RenderSettings::default(),
            summary: SummarySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_base: u32,
    /// Length of one backoff "time unit" in milliseconds.
    pub backoff_unit_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2,
            backoff_unit_ms: 1000,
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderSettings {
    /// Extra wait after the page reports itself loaded.
    pub settle_ms: u64,
    pub navigation_timeout_ms: u64,
    /// Upper bound on waiting for the main frame's network-idle lifecycle event.
    pub idle_timeout_ms: u64,
    pub chrome_path: Option<PathBuf>,
    pub user_agent: Option<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            settle_ms: 1500,
            navigation_timeout_ms: 30_000,
            idle_timeout_ms: 10_000,
            chrome_path: None,
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SummarySettings {
    /// Text of the label that anchors the summary block (case-insensitive).
    pub anchor_text: String,
    /// Ancestor hops from the label to the block container.
    pub max_hops: usize,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            anchor_text: "summary".to_string(),
            max_hops: 5,
        }
    }
}

impl IngestConfig {
    /// Load the configuration, optionally overlaying a YAML file on the defaults.
    #[instrument(level = "info", skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self, IngestError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
        let config = Self::from_yaml(&raw)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, IngestError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(raw).map_err(|e| IngestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.retry.max_attempts == 0 {
            return Err(IngestError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.backoff_base == 0 {
            return Err(IngestError::Config("retry.backoff_base must be at least 1".into()));
        }
        if url::Url::parse(&self.allowed_url).is_err() {
            return Err(IngestError::Config(format!(
                "allowed_url is not a valid URL: {}",
                self.allowed_url
            )));
        }
        Ok(())
    }

    /// Exact match against the allowed address, ignoring trailing slashes.
    pub fn is_allowed_url(&self, url: &str) -> bool {
        url.trim_end_matches('/') == self.allowed_url.trim_end_matches('/')
    }
}
