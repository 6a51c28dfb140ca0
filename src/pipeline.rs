//! One end-to-end ingestion run.
//!
//! ```text
//! load checkpoint
//!   -> render + extract         (retried)
//!   -> fingerprint / stamp
//!   -> compare logical version  (equal: stop, nothing written)
//!   -> write local JSONL
//!   -> upload each artifact     (each retried)
//!   -> commit checkpoint        (failure logged, run still succeeds)
//! ```
//!
//! The logical version of a run is the `scraped_at` carried by its first
//! summary record. It is derived from a content fingerprint: when the page
//! content matches what the checkpoint recorded, the checkpoint's
//! `scraped_at` is reused, so an unchanged page compares equal and the run
//! becomes a no-op. A run without summary rows has no logical version and
//! is always ingested.

use std::path::Path;
use std::time::Instant;
use tracing::{error, info, instrument};

use crate::checkpoint::CheckpointStore;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::extract::Extractor;
use crate::models::{Checkpoint, PageExtraction};
use crate::outputs::{self, Artifact};
use crate::publish::Publish;
use crate::renderer::Render;
use crate::retry::RetryPolicy;
use crate::utils::{run_timestamp, utc_now_iso};

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The page matched the checkpoint; nothing was written or uploaded.
    Unchanged { scraped_at: String },
    Ingested(IngestReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub scraped_at: Option<String>,
    pub artifacts: Vec<Artifact>,
    pub objects: Vec<String>,
    /// False when the checkpoint could not be written; the next run re-ingests.
    pub checkpoint_committed: bool,
}

/// Render the page and run the extractor over it, retrying transient failures.
pub async fn render_and_extract<R>(
    renderer: &R,
    extractor: &Extractor,
    retry: &RetryPolicy,
    url: &str,
) -> Result<PageExtraction, IngestError>
where
    R: Render + ?Sized,
{
    retry
        .run("render", move || async move {
            let html = renderer.render(url).await?;
            Ok(extractor.extract(&html, url))
        })
        .await
}

/// Drives ingestion of the configured page against one checkpoint.
///
/// At most one controller may run against a given checkpoint path at a time.
pub struct Controller<R, P> {
    config: IngestConfig,
    extractor: Extractor,
    retry: RetryPolicy,
    checkpoints: CheckpointStore,
    renderer: R,
    publisher: P,
}

impl<R: Render, P: Publish> Controller<R, P> {
    pub fn new(config: IngestConfig, renderer: R, publisher: P) -> Self {
        Self {
            extractor: Extractor::new(&config),
            retry: RetryPolicy::from_settings(&config.retry),
            checkpoints: CheckpointStore::new(&config.checkpoint_path),
            config,
            renderer,
            publisher,
        }
    }

    /// Run one ingestion of the configured page.
    ///
    /// # Returns
    ///
    /// [`RunOutcome::Unchanged`] when the page matches the checkpoint, with
    /// nothing written or uploaded. Otherwise [`RunOutcome::Ingested`] with the
    /// landed artifacts and uploaded object names.
    ///
    /// # Errors
    ///
    /// Returns the last render or upload error once retries are exhausted, or
    /// the local write error. The checkpoint is left untouched in every error
    /// case. A failed checkpoint write is not an error; see
    /// [`IngestReport::checkpoint_committed`].
    #[instrument(level = "info", skip_all, fields(url = %self.config.allowed_url))]
    pub async fn run_once(&self) -> Result<RunOutcome, IngestError> {
        let t0 = Instant::now();
        let url = self.config.allowed_url.as_str();
        let previous = self.checkpoints.load().await;

        let page = render_and_extract(&self.renderer, &self.extractor, &self.retry, url).await?;
        let fingerprint = page.fingerprint();

        let scraped_at = reusable_version(previous.as_ref(), &page.page_url, &fingerprint)
            .unwrap_or_else(utc_now_iso);
        let records = page.stamp(&scraped_at);
        let current = records.logical_version().map(str::to_string);

        let previous_version = previous.as_ref().and_then(|cp| cp.scraped_at.as_deref());
        if let (Some(cur), Some(prev)) = (current.as_deref(), previous_version) {
            if cur == prev {
                info!(scraped_at = %cur, "No change since last checkpoint; skipping write and upload");
                return Ok(RunOutcome::Unchanged {
                    scraped_at: cur.to_string(),
                });
            }
        }
        if current.is_none() {
            info!("Summary is empty; treating page as changed");
        }

        let timestamp = run_timestamp();
        let artifacts = outputs::write_records(&records, &self.config.raw_dir, &timestamp).await?;

        let mut objects = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            let object = artifact.kind.object_name(&self.config.blob_prefix, &timestamp);
            self.upload(&artifact.path, &object).await?;
            objects.push(object);
        }

        let checkpoint = Checkpoint {
            scraped_at: current.clone(),
            page_url: page.page_url.clone(),
            uploaded_at: utc_now_iso(),
            content_sha256: Some(fingerprint),
        };
        let checkpoint_committed = match self.checkpoints.save(&checkpoint).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, path = %self.checkpoints.path().display(), "Failed to save checkpoint; next run will re-ingest");
                false
            }
        };

        info!(
            summary_rows = records.summary.len(),
            feature_rows = records.features.len(),
            uploads = objects.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Ingestion run complete"
        );
        Ok(RunOutcome::Ingested(IngestReport {
            scraped_at: current,
            artifacts: artifacts.to_vec(),
            objects,
            checkpoint_committed,
        }))
    }

    async fn upload(&self, local: &Path, object: &str) -> Result<(), IngestError> {
        let publisher = &self.publisher;
        self.retry
            .run("upload", move || async move { publisher.upload(local, object).await })
            .await
    }
}

/// The checkpoint's `scraped_at` when it recorded exactly this content.
fn reusable_version(previous: Option<&Checkpoint>, page_url: &str, fingerprint: &str) -> Option<String> {
    let cp = previous?;
    if cp.page_url != page_url || cp.content_sha256.as_deref() != Some(fingerprint) {
        return None;
    }
    cp.scraped_at.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_URL;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    const PAGE: &str = include_str!("../tests/fixtures/model_page.html");

    #[derive(Clone, Default)]
    struct FakeRenderer {
        html: Arc<Mutex<String>>,
        calls: Arc<AtomicU32>,
        failures_left: Arc<AtomicU32>,
    }

    impl FakeRenderer {
        fn serving(html: &str) -> Self {
            let r = Self::default();
            r.set_html(html);
            r
        }

        fn set_html(&self, html: &str) {
            *self.html.lock().unwrap() = html.to_string();
        }

        fn fail_next(&self, n: u32) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Render for FakeRenderer {
        async fn render(&self, url: &str) -> Result<String, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(IngestError::render(url, "navigation timed out"));
            }
            Ok(self.html.lock().unwrap().clone())
        }
    }

    #[derive(Clone, Default)]
    struct FakePublisher {
        uploads: Arc<Mutex<Vec<(String, String)>>>,
        attempts: Arc<AtomicU32>,
        reject: bool,
    }

    impl FakePublisher {
        fn rejecting() -> Self {
            Self {
                reject: true,
                ..Self::default()
            }
        }

        fn objects(&self) -> Vec<String> {
            self.uploads.lock().unwrap().iter().map(|(o, _)| o.clone()).collect()
        }
    }

    #[async_trait]
    impl Publish for FakePublisher {
        async fn upload(&self, local_path: &Path, object_name: &str) -> Result<(), IngestError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(IngestError::Upload {
                    object: object_name.to_string(),
                    status: 503,
                    body: "ServerBusy".into(),
                });
            }
            let body = std::fs::read_to_string(local_path).unwrap();
            self.uploads.lock().unwrap().push((object_name.to_string(), body));
            Ok(())
        }
    }

    fn test_config(dir: &Path) -> IngestConfig {
        let mut config = IngestConfig::default();
        config.raw_dir = dir.join("raw");
        config.checkpoint_path = dir.join("checkpoint.json");
        config.retry.backoff_unit_ms = 1;
        config
    }

    fn ingested(outcome: RunOutcome) -> IngestReport {
        match outcome {
            RunOutcome::Ingested(report) => report,
            other => panic!("expected ingestion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_identical_run_uploads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FakeRenderer::serving(PAGE);
        let publisher = FakePublisher::default();
        let controller = Controller::new(test_config(dir.path()), renderer.clone(), publisher.clone());

        let first = ingested(controller.run_once().await.unwrap());
        assert!(first.checkpoint_committed);
        assert_eq!(publisher.objects().len(), 2);
        let version = first.scraped_at.clone().unwrap();
        let raw_before = raw_snapshot(dir.path());
        assert_eq!(raw_before.len(), 2);
        let checkpoint_before = std::fs::read_to_string(dir.path().join("checkpoint.json")).unwrap();

        let second = controller.run_once().await.unwrap();
        assert_eq!(second, RunOutcome::Unchanged { scraped_at: version });
        assert_eq!(publisher.objects().len(), 2);
        assert_eq!(renderer.calls(), 2);
        assert_eq!(raw_snapshot(dir.path()), raw_before);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("checkpoint.json")).unwrap(),
            checkpoint_before
        );
    }

    /// Sorted `(file name, contents)` pairs of the raw directory.
    fn raw_snapshot(dir: &Path) -> Vec<(String, String)> {
        let mut files: Vec<(String, String)> = std::fs::read_dir(dir.join("raw"))
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                (
                    entry.file_name().to_string_lossy().into_owned(),
                    std::fs::read_to_string(entry.path()).unwrap(),
                )
            })
            .collect();
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_first_run_lands_and_uploads_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = FakePublisher::default();
        let controller = Controller::new(
            test_config(dir.path()),
            FakeRenderer::serving(PAGE),
            publisher.clone(),
        );

        let report = ingested(controller.run_once().await.unwrap());
        assert_eq!(report.artifacts.len(), 2);
        assert_eq!(report.artifacts[0].rows, 4);
        assert_eq!(report.artifacts[1].rows, 5);
        assert!(report.objects[0].starts_with("raw/summary_"));
        assert!(report.objects[1].starts_with("raw/features_"));
        assert_eq!(publisher.objects(), report.objects);

        let uploads = publisher.uploads.lock().unwrap().clone();
        let local = std::fs::read_to_string(&report.artifacts[0].path).unwrap();
        assert_eq!(uploads[0].1, local);
        let first: serde_json::Value = serde_json::from_str(local.lines().next().unwrap()).unwrap();
        assert_eq!(first["summary_key"], "Price");
        assert_eq!(first["manufacturer"], "Audi");
        assert_eq!(first["page_url"], DEFAULT_URL);

        let cp: Checkpoint =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("checkpoint.json")).unwrap())
                .unwrap();
        assert_eq!(cp.scraped_at, report.scraped_at);
        assert_eq!(cp.page_url, DEFAULT_URL);
        assert_eq!(cp.content_sha256.as_ref().map(String::len), Some(64));
    }

    #[tokio::test]
    async fn test_changed_page_is_reingested() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FakeRenderer::serving(PAGE);
        let publisher = FakePublisher::default();
        let controller = Controller::new(test_config(dir.path()), renderer.clone(), publisher.clone());

        ingested(controller.run_once().await.unwrap());
        let before = CheckpointStore::new(dir.path().join("checkpoint.json")).load().await.unwrap();

        renderer.set_html(&PAGE.replace("298 miles", "301 miles"));
        ingested(controller.run_once().await.unwrap());
        let after = CheckpointStore::new(dir.path().join("checkpoint.json")).load().await.unwrap();

        assert_eq!(publisher.objects().len(), 4);
        assert_ne!(before.content_sha256, after.content_sha256);
    }

    #[tokio::test]
    async fn test_empty_summary_is_always_ingested() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = FakePublisher::default();
        let controller = Controller::new(
            test_config(dir.path()),
            FakeRenderer::serving("<html><body><h1>Audi e-tron GT</h1></body></html>"),
            publisher.clone(),
        );

        let first = ingested(controller.run_once().await.unwrap());
        assert_eq!(first.scraped_at, None);
        let second = ingested(controller.run_once().await.unwrap());
        assert_eq!(second.scraped_at, None);
        assert_eq!(publisher.objects().len(), 4);
    }

    #[tokio::test]
    async fn test_render_exhaustion_leaves_checkpoint_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FakeRenderer::serving(PAGE);
        renderer.fail_next(u32::MAX);
        let publisher = FakePublisher::default();
        let controller = Controller::new(test_config(dir.path()), renderer.clone(), publisher.clone());

        let err = controller.run_once().await.unwrap_err();
        assert!(matches!(err, IngestError::Render { .. }));
        assert_eq!(renderer.calls(), 3);
        assert!(publisher.objects().is_empty());
        assert!(!dir.path().join("checkpoint.json").exists());
        assert!(!dir.path().join("raw").exists());
    }

    #[tokio::test]
    async fn test_transient_render_failure_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FakeRenderer::serving(PAGE);
        renderer.fail_next(2);
        let controller = Controller::new(test_config(dir.path()), renderer.clone(), FakePublisher::default());

        ingested(controller.run_once().await.unwrap());
        assert_eq!(renderer.calls(), 3);
    }

    #[tokio::test]
    async fn test_upload_failure_commits_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = FakePublisher::rejecting();
        let controller = Controller::new(
            test_config(dir.path()),
            FakeRenderer::serving(PAGE),
            publisher.clone(),
        );

        let err = controller.run_once().await.unwrap_err();
        assert!(matches!(err, IngestError::Upload { status: 503, .. }));
        // Only the first artifact is attempted before the run aborts.
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);
        assert!(!dir.path().join("checkpoint.json").exists());
        // Local landing happens before upload and is kept.
        assert_eq!(std::fs::read_dir(dir.path().join("raw")).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("checkpoint.json"), "{\"scraped_at\": ").unwrap();
        let publisher = FakePublisher::default();
        let controller = Controller::new(
            test_config(dir.path()),
            FakeRenderer::serving(PAGE),
            publisher.clone(),
        );

        let report = ingested(controller.run_once().await.unwrap());
        assert!(report.checkpoint_committed);
        assert_eq!(publisher.objects().len(), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_without_fingerprint_forces_reingest() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = Checkpoint {
            scraped_at: Some("2026-10-15T08:00:00.000000+00:00".into()),
            page_url: DEFAULT_URL.into(),
            uploaded_at: "2026-10-15T08:00:03.000000+00:00".into(),
            content_sha256: None,
        };
        CheckpointStore::new(dir.path().join("checkpoint.json"))
            .save(&legacy)
            .await
            .unwrap();

        let controller = Controller::new(
            test_config(dir.path()),
            FakeRenderer::serving(PAGE),
            FakePublisher::default(),
        );
        let report = ingested(controller.run_once().await.unwrap());
        assert_ne!(report.scraped_at, legacy.scraped_at);
    }

    #[tokio::test]
    async fn test_unwritable_checkpoint_does_not_fail_run() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut config = test_config(dir.path());
        config.checkpoint_path = blocker.join("checkpoint.json");

        let publisher = FakePublisher::default();
        let controller = Controller::new(config, FakeRenderer::serving(PAGE), publisher.clone());
        let report = ingested(controller.run_once().await.unwrap());
        assert!(!report.checkpoint_committed);
        assert_eq!(publisher.objects().len(), 2);
    }

    #[test]
    fn test_reusable_version_requires_same_url_and_content() {
        let cp = Checkpoint {
            scraped_at: Some("t0".into()),
            page_url: DEFAULT_URL.into(),
            uploaded_at: "t1".into(),
            content_sha256: Some("abc".into()),
        };
        assert_eq!(reusable_version(Some(&cp), DEFAULT_URL, "abc"), Some("t0".into()));
        assert_eq!(reusable_version(Some(&cp), DEFAULT_URL, "abd"), None);
        assert_eq!(reusable_version(Some(&cp), "https://www.green.car/x/y/z", "abc"), None);
        assert_eq!(reusable_version(None, DEFAULT_URL, "abc"), None);
    }
}
