//! # greencar_ingest
//!
//! Lands the summary table and feature catalog of one green.car model page
//! as JSONL, locally and in Azure Blob Storage.
//!
//! ## Usage
//!
//! ```sh
//! greencar_ingest ingest
//! greencar_ingest serve --port 8000
//! ```
//!
//! ## Architecture
//!
//! 1. **Rendering**: load the page in headless Chromium and wait for it to settle
//! 2. **Extraction**: summary `key: value` lines and allow-listed feature accordions
//! 3. **Change detection**: skip the run when the page matches the checkpoint
//! 4. **Landing**: append JSONL under the raw directory, upload, commit the checkpoint

use clap::Parser;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod checkpoint;
mod cli;
mod config;
mod error;
mod extract;
mod models;
mod outputs;
mod pipeline;
mod publish;
mod renderer;
mod retry;
mod server;
mod utils;

use cli::{Cli, Command, DumpDomArgs, ExtractArgs, IngestArgs, ServeArgs};
use config::IngestConfig;
use error::IngestError;
use extract::Extractor;
use pipeline::{Controller, RunOutcome};
use publish::AzureBlobPublisher;
use renderer::{ChromiumRenderer, Render};
use retry::RetryPolicy;
use utils::{ensure_writable_dir, run_timestamp, utc_now_iso};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let args = Cli::parse();
    debug!(config = ?args.config, "Parsed CLI arguments");

    let config = IngestConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Ingest(a) => ingest(config, a).await?,
        Command::Serve(a) => serve(config, a).await?,
        Command::DumpDom(a) => dump_dom(config, a).await?,
        Command::Extract(a) => extract_file(config, a).await?,
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

#[instrument(level = "info", skip_all)]
async fn ingest(mut config: IngestConfig, args: IngestArgs) -> Result<(), IngestError> {
    args.paths.apply(&mut config);
    if let Some(path) = args.checkpoint {
        config.checkpoint_path = path;
    }
    config.validate()?;

    // Credentials are checked before any browser or network activity.
    let publisher =
        AzureBlobPublisher::from_connection_string(args.connection_string.as_deref(), config.container.clone())?;
    ensure_writable_dir(&config.raw_dir).await?;

    let renderer = ChromiumRenderer::new(config.render.clone());
    match Controller::new(config, renderer, publisher).run_once().await? {
        RunOutcome::Unchanged { scraped_at } => {
            info!(%scraped_at, "Page unchanged; nothing uploaded");
        }
        RunOutcome::Ingested(report) => {
            info!(
                scraped_at = ?report.scraped_at,
                rows = report.artifacts.iter().map(|a| a.rows).sum::<usize>(),
                objects = ?report.objects,
                checkpoint_committed = report.checkpoint_committed,
                "Page ingested"
            );
        }
    }
    Ok(())
}

async fn serve(mut config: IngestConfig, args: ServeArgs) -> Result<(), IngestError> {
    args.paths.apply(&mut config);
    config.validate()?;
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| IngestError::Config(format!("invalid listen address: {e}")))?;

    let renderer: Arc<dyn Render> = Arc::new(ChromiumRenderer::new(config.render.clone()));
    server::start(addr, Arc::new(server::AppState::new(config, renderer))).await
}

#[instrument(level = "info", skip_all)]
async fn dump_dom(config: IngestConfig, args: DumpDomArgs) -> Result<(), IngestError> {
    let url = args.url.unwrap_or_else(|| config.allowed_url.clone());
    let renderer = ChromiumRenderer::new(config.render.clone());
    let html = RetryPolicy::from_settings(&config.retry)
        .run("render", || renderer.render(&url))
        .await?;

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| IngestError::io(parent, e))?;
    }
    tokio::fs::write(&args.output, &html)
        .await
        .map_err(|e| IngestError::io(&args.output, e))?;
    info!(path = %args.output.display(), bytes = html.len(), "Wrote rendered DOM");
    Ok(())
}

#[instrument(level = "info", skip_all, fields(html = %args.html.display()))]
async fn extract_file(mut config: IngestConfig, args: ExtractArgs) -> Result<(), IngestError> {
    args.paths.apply(&mut config);
    let html = tokio::fs::read_to_string(&args.html)
        .await
        .map_err(|e| IngestError::io(&args.html, e))?;

    let page = Extractor::new(&config).extract(&html, &config.allowed_url);
    let records = page.stamp(&utc_now_iso());
    let [summary, features] =
        outputs::write_records(&records, &config.raw_dir, &run_timestamp()).await?;

    println!("summary rows:  {} -> {}", summary.rows, summary.path.display());
    println!("feature rows:  {} -> {}", features.rows, features.path.display());
    Ok(())
}
