//! Feature catalog extraction from the accordion widgets.
//!
//! Each accordion item is one feature category: a title span and a body
//! holding a table whose rows pair a feature name with a check/cross icon.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::dom::element_text;
use crate::models::{FeatureFlag, FeatureRow, SectionFeatures};

const E: &str = "static selector";
static ITEM_CONTAINER: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"div[class*="AccordionItemContainer" i]"#).expect(E));
static ITEM_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"span[class*="AccordionItemText" i]"#).expect(E));
static ITEM_BODY: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"div[class*="AccordionItemBody" i]"#).expect(E));
static TR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect(E));
static TD: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect(E));
static TITLED: Lazy<Selector> = Lazy::new(|| Selector::parse("[title]").expect(E));
static ICON_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new("(?i)(check|cross)-circled").expect("static pattern"));

/// Map a value cell to its tri-state flag from the first icon whose `title`
/// names a check or a cross.
pub fn icon_flag(cell: ElementRef<'_>) -> FeatureFlag {
    let title = cell
        .select(&TITLED)
        .filter_map(|el| el.value().attr("title"))
        .find(|title| ICON_TITLE.is_match(title));

    match title {
        None => FeatureFlag::Indeterminate,
        Some(t) if t.to_lowercase().contains("check") => FeatureFlag::Present,
        Some(_) => FeatureFlag::Absent,
    }
}

/// Feature rows of one accordion body. Rows without cells are skipped.
pub fn body_rows(body: ElementRef<'_>) -> Vec<FeatureRow> {
    body.select(&TR)
        .filter_map(|tr| {
            let cells: Vec<ElementRef<'_>> = tr.select(&TD).collect();
            let name_cell = cells.first()?;
            Some(FeatureRow {
                feature_name: element_text(*name_cell),
                feature_value: cells
                    .get(1)
                    .map(|cell| icon_flag(*cell))
                    .unwrap_or(FeatureFlag::Indeterminate),
            })
        })
        .collect()
}

/// Collect rows for every allow-listed section, in allow-list order.
///
/// Sections missing from the page come back with no rows; accordion items
/// whose title is not allow-listed are ignored.
pub fn extract_features(doc: &Html, required_sections: &[String]) -> Vec<SectionFeatures> {
    let mut catalog: Vec<SectionFeatures> = required_sections
        .iter()
        .map(|section| SectionFeatures {
            section: section.clone(),
            rows: Vec::new(),
        })
        .collect();

    for item in doc.select(&ITEM_CONTAINER) {
        let Some(title) = item.select(&ITEM_TITLE).next() else {
            continue;
        };
        let section = element_text(title);
        let Some(slot) = catalog.iter_mut().find(|s| s.section == section) else {
            debug!(%section, "Skipping section outside the allow-list");
            continue;
        };
        let Some(body) = item.select(&ITEM_BODY).next() else {
            debug!(%section, "Accordion item has no body");
            continue;
        };
        let rows = body_rows(body);
        debug!(%section, rows = rows.len(), "Extracted feature rows");
        slot.rows.extend(rows);
    }

    catalog
}
