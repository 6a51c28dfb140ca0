//! Summary block extraction.
//!
//! The page renders its summary as a label ("Summary") followed somewhere
//! in the surrounding markup by `Key: Value` lines. The label is located by
//! exact text match, a container is taken a fixed number of ancestor hops
//! above it, and every colon-bearing line of the container becomes a row.

use scraper::{ElementRef, Html};
use tracing::debug;

use super::dom::{climb, self_and_descendants, text_equals_ignore_case, text_lines};
use crate::config::SummarySettings;
use crate::models::SummaryRow;
use crate::utils::clean;

/// First element, in document order, whose normalized text equals `anchor`
/// ignoring case.
pub fn find_anchor<'a>(doc: &'a Html, anchor: &str) -> Option<ElementRef<'a>> {
    self_and_descendants(doc.root_element()).find(|el| text_equals_ignore_case(*el, anchor))
}

/// Split one line on its first colon; lines without a colon or with an empty
/// key yield nothing.
pub fn parse_line(line: &str) -> Option<SummaryRow> {
    let line = clean(line);
    let (key, value) = line.split_once(':')?;
    let summary_key = clean(key);
    if summary_key.is_empty() {
        return None;
    }
    Some(SummaryRow {
        summary_key,
        summary_value: clean(value),
    })
}

/// Summary rows of `doc`, in container text order.
///
/// # Arguments
///
/// * `doc` - Parsed page
/// * `settings` - Anchor label and how many ancestor hops to climb from it
///
/// # Returns
///
/// One row per colon-bearing line of the container, or an empty list when
/// no element's text equals the anchor label.
pub fn extract_summary(doc: &Html, settings: &SummarySettings) -> Vec<SummaryRow> {
    let Some(anchor) = find_anchor(doc, &settings.anchor_text) else {
        debug!(anchor = %settings.anchor_text, "No summary anchor found");
        return Vec::new();
    };

    let container = climb(anchor, settings.max_hops);
    let rows: Vec<SummaryRow> = text_lines(container)
        .into_iter()
        .filter_map(parse_line)
        .collect();

    debug!(
        container = container.value().name(),
        rows = rows.len(),
        "Extracted summary rows"
    );
    rows
}
