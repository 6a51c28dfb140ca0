//! Command-line interface definitions for greencar_ingest.
//!
//! All arguments can be provided via command-line flags; the most common
//! knobs also read environment variables.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::IngestConfig;
use crate::publish::CONNECTION_STRING_VAR;

/// Command-line arguments for greencar_ingest.
///
/// # Examples
///
/// ```sh
/// # One scheduled ingestion run
/// AZURE_STORAGE_CONNECTION_STRING=... greencar_ingest ingest
///
/// # Serve the scrape API on :8000
/// greencar_ingest serve --port 8000
///
/// # Re-run extraction over a saved page
/// greencar_ingest extract --html rendered.html
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, global = true, env = "GREENCAR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render, extract, land and upload the page once
    Ingest(IngestArgs),
    /// Serve the scrape API
    Serve(ServeArgs),
    /// Render the page and save the settled markup
    DumpDom(DumpDomArgs),
    /// Extract from a saved HTML file and land the JSONL locally
    Extract(ExtractArgs),
}

/// Overrides shared by every subcommand that touches the filesystem.
#[derive(Args, Debug, Default)]
pub struct PathOverrides {
    /// Directory the JSONL files are written to
    #[arg(long, env = "GREENCAR_RAW_DIR")]
    pub raw_dir: Option<PathBuf>,

    /// Page address to process (must be the allowed URL for `serve`)
    #[arg(long, env = "GREENCAR_URL")]
    pub url: Option<String>,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    #[command(flatten)]
    pub paths: PathOverrides,

    /// Checkpoint file location
    #[arg(long, env = "GREENCAR_CHECKPOINT")]
    pub checkpoint: Option<PathBuf>,

    /// Object store connection string
    #[arg(long, env = CONNECTION_STRING_VAR, hide_env_values = true)]
    pub connection_string: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub paths: PathOverrides,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct DumpDomArgs {
    #[arg(long, env = "GREENCAR_URL")]
    pub url: Option<String>,

    /// Where to write the rendered markup
    #[arg(short, long, default_value = "rendered.html")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    #[command(flatten)]
    pub paths: PathOverrides,

    /// Saved HTML file to parse
    #[arg(long)]
    pub html: PathBuf,
}

impl PathOverrides {
    pub fn apply(&self, config: &mut IngestConfig) {
        if let Some(dir) = &self.raw_dir {
            config.raw_dir = dir.clone();
        }
        if let Some(url) = &self.url {
            config.allowed_url = url.clone();
        }
    }
}
