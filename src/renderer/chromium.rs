//! Headless Chromium renderer using chromiumoxide.
//!
//! Each call launches its own browser process and tears it down before
//! returning, whether the capture succeeded or not. Nothing is shared
//! between calls, so a wedged browser can never poison the next attempt.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{EventLifecycleEvent, FrameId};
use chromiumoxide::listeners::EventStream;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::Render;
use crate::config::RenderSettings;
use crate::error::IngestError;

/// Lifecycle event Chromium emits once a frame has had no network
/// connections for 500ms.
const NETWORK_IDLE: &str = "networkIdle";
/// First lifecycle event of a new document in a frame.
const LIFECYCLE_INIT: &str = "init";

/// Watches frame lifecycle events for the main frame's network-idle signal.
///
/// Only a `networkIdle` that follows an `init` counts, so the idle signal
/// left over from the initial `about:blank` document is ignored. Without a
/// known main frame every frame is accepted.
#[derive(Debug)]
struct IdleWatch {
    main_frame: Option<String>,
    navigated: bool,
}

impl IdleWatch {
    fn new(main_frame: Option<String>) -> Self {
        Self {
            main_frame,
            navigated: false,
        }
    }

    /// Feed one lifecycle event; true once the main frame has gone idle.
    fn observe(&mut self, frame_id: &str, name: &str) -> bool {
        if self.main_frame.as_deref().is_some_and(|main| main != frame_id) {
            return false;
        }
        match name {
            LIFECYCLE_INIT => {
                self.navigated = true;
                false
            }
            NETWORK_IDLE => self.navigated,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    settings: RenderSettings,
}

impl ChromiumRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self, url: &str) -> Result<BrowserConfig, IngestError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .request_timeout(Duration::from_millis(self.settings.navigation_timeout_ms));
        if let Some(path) = &self.settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| IngestError::render(url, format!("failed to build browser config: {e}")))
    }

    /// Navigate, wait for the document to settle and read it back.
    async fn capture(&self, browser: &Browser, url: &str) -> Result<String, IngestError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| IngestError::render(url, format!("failed to open page: {e}")))?;

        if let Some(ua) = &self.settings.user_agent {
            page.set_user_agent(SetUserAgentOverrideParams::new(ua.clone()))
                .await
                .map_err(|e| IngestError::render(url, format!("failed to set user agent: {e}")))?;
        }

        // Subscribed before navigating so an early idle signal is buffered.
        let mut lifecycle = page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(|e| IngestError::render(url, format!("failed to watch lifecycle events: {e}")))?;
        let main_frame = match page.mainframe().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%url, error = %e, "main frame lookup failed; watching every frame");
                None
            }
        };

        let nav_timeout = Duration::from_millis(self.settings.navigation_timeout_ms);
        match timeout(nav_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(IngestError::render(url, format!("navigation failed: {e}"))),
            Err(_) => {
                return Err(IngestError::render(
                    url,
                    format!("navigation timed out after {}ms", self.settings.navigation_timeout_ms),
                ));
            }
        }
        if timeout(nav_timeout, page.wait_for_navigation()).await.is_err() {
            warn!(%url, "wait_for_navigation timed out; continuing");
        }

        self.wait_for_network_idle(&mut lifecycle, main_frame, url).await;
        sleep(Duration::from_millis(self.settings.settle_ms)).await;

        page.content()
            .await
            .map_err(|e| IngestError::render(url, format!("failed to read content: {e}")))
    }

    /// Wait for the main frame's `networkIdle` lifecycle event.
    ///
    /// Running out of `idle_timeout_ms` is not an error; whatever has loaded
    /// by then is captured after the settle delay.
    async fn wait_for_network_idle(
        &self,
        lifecycle: &mut EventStream<EventLifecycleEvent>,
        main_frame: Option<FrameId>,
        url: &str,
    ) {
        let mut watch = IdleWatch::new(main_frame.map(|f| f.inner().clone()));
        let idle = async {
            while let Some(event) = lifecycle.next().await {
                if watch.observe(event.frame_id.inner(), &event.name) {
                    return true;
                }
            }
            false
        };

        let idle_timeout_ms = self.settings.idle_timeout_ms;
        match timeout(Duration::from_millis(idle_timeout_ms), idle).await {
            Ok(true) => debug!(%url, "main frame reached network idle"),
            Ok(false) => warn!(%url, "lifecycle stream closed before network idle"),
            Err(_) => warn!(%url, idle_timeout_ms, "network never went idle; capturing anyway"),
        }
    }
}

#[async_trait]
impl Render for ChromiumRenderer {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn render(&self, url: &str) -> Result<String, IngestError> {
        let t0 = Instant::now();
        let (mut browser, mut handler) = Browser::launch(self.browser_config(url)?)
            .await
            .map_err(|e| IngestError::render(url, format!("failed to launch Chromium: {e}")))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "cdp handler event error");
                }
            }
        });

        let captured = self.capture(&browser, url).await;

        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "browser wait failed");
        }
        events.abort();

        let html = captured?;
        info!(
            bytes = html.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Rendered page"
        );
        Ok(html)
    }
}
