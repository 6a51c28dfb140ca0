//! Text normalization, timestamps, and file system helpers.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use itertools::Itertools;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

use crate::error::IngestError;

/// Collapse every whitespace run to one space and trim both ends.
///
/// Absent text normalizes to the empty string. The function is idempotent.
///
/// ```ignore
/// assert_eq!(normalize(Some("  hello \n  world ")), "hello world");
/// assert_eq!(normalize(None), "");
/// ```
pub fn normalize(text: Option<&str>) -> String {
    text.map(|t| t.split_whitespace().join(" "))
        .unwrap_or_default()
}

/// Shorthand for normalizing text that is known to be present.
pub fn clean(text: &str) -> String {
    normalize(Some(text))
}

/// Capitalize the first letter of every word, lowercasing the rest.
///
/// A "word" starts after any non-alphabetic character, so `mercedes-benz`
/// becomes `Mercedes-Benz`.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// ISO-8601 UTC instant with microsecond precision, e.g. `2026-10-16T08:00:00.123456+00:00`.
pub fn iso_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn utc_now_iso() -> String {
    iso_utc(Utc::now())
}

/// Wall-clock run timestamp used in artifact names: `YYYYMMDD_HHMMSS`, local time.
pub fn run_timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Truncate a string for logging purposes.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a scratch file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), IngestError> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| IngestError::io(path, e))?;
    let scratch = path.join("..__write_check__");
    fs::write(&scratch, b"")
        .await
        .map_err(|e| IngestError::io(&scratch, e))?;
    let _ = fs::remove_file(&scratch).await;
    info!("Output directory is writable");
    Ok(())
}
