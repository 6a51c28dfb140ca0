//! Turning a URL into settled, client-rendered markup.
//!
//! The controller and the HTTP server only see the [`Render`] trait; the
//! headless Chromium implementation lives in [`chromium`].

pub mod chromium;

use async_trait::async_trait;

use crate::error::IngestError;

pub use chromium::ChromiumRenderer;

/// Produces the fully rendered document for a URL.
///
/// Implementations do not retry. Every failure they report is treated as
/// transient by the caller's [`RetryPolicy`](crate::retry::RetryPolicy).
#[async_trait]
pub trait Render: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, IngestError>;
}
