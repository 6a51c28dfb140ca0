//! HTTP wrapper around render + extract + local landing.
//!
//! | Route | Behavior |
//! |-------|----------|
//! | `GET /health` | `{"status":"ok"}` |
//! | `POST /scrape` | `{"url": ...}`; only the configured address is accepted |
//!
//! The allow-list check happens here at the boundary. The extractor itself
//! never sees a URL it was not configured for. Nothing is uploaded and the
//! checkpoint is not consulted; that is the controller's job.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::extract::Extractor;
use crate::outputs;
use crate::pipeline::render_and_extract;
use crate::renderer::Render;
use crate::retry::RetryPolicy;
use crate::utils::{run_timestamp, utc_now_iso};

pub struct AppState {
    config: IngestConfig,
    extractor: Extractor,
    retry: RetryPolicy,
    renderer: Arc<dyn Render>,
}

impl AppState {
    pub fn new(config: IngestConfig, renderer: Arc<dyn Render>) -> Self {
        Self {
            extractor: Extractor::new(&config),
            retry: RetryPolicy::from_settings(&config.retry),
            config,
            renderer,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapeResponse {
    pub status: String,
    pub summary_file: String,
    pub features_file: String,
    pub extracted_summary_rows: usize,
    pub extracted_features: usize,
}

/// A failed request, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let status = match &e {
            IngestError::Render { .. } | IngestError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.to_string())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/scrape", post(scrape))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn start(addr: SocketAddr, state: Arc<AppState>) -> Result<(), IngestError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| IngestError::Config(format!("cannot bind {addr}: {e}")))?;
    info!(allowed_url = %state.config.allowed_url, "Scrape API listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| IngestError::Config(format!("server stopped: {e}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "time": utc_now_iso() }))
}

#[instrument(level = "info", skip_all, fields(url = %req.url))]
async fn scrape(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScrapeRequest>,
) -> Result<Json<ScrapeResponse>, ApiError> {
    if let Err(e) = url::Url::parse(&req.url) {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("invalid url: {e}"),
        ));
    }
    if !state.config.is_allowed_url(&req.url) {
        warn!("Rejected URL outside the allow-list");
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "URL not allowed"));
    }

    let page = render_and_extract(
        state.renderer.as_ref(),
        &state.extractor,
        &state.retry,
        &req.url,
    )
    .await
    .inspect_err(|e| error!(error = %e, "Scrape failed"))?;

    let records = page.stamp(&utc_now_iso());
    let [summary, features] =
        outputs::write_records(&records, &state.config.raw_dir, &run_timestamp()).await?;

    info!(
        summary_rows = summary.rows,
        feature_rows = features.rows,
        "Scrape landed"
    );
    Ok(Json(ScrapeResponse {
        status: "success".to_string(),
        summary_file: summary.path.display().to_string(),
        features_file: features.path.display().to_string(),
        extracted_summary_rows: summary.rows,
        extracted_features: features.rows,
    }))
}
