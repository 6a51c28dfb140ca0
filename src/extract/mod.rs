//! Turn rendered markup into typed page facts.
//!
//! Two families of facts are pulled from one document:
//!
//! - [`summary`]: free-form `key: value` lines near the "Summary" label
//! - [`features`]: accordion sections of check/cross feature flags
//!
//! Nothing in this module fails on missing markup. Every "not found" branch
//! degrades to an empty value so that the rest of the page still lands.

pub mod dom;
pub mod features;
pub mod summary;

use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{info, instrument};
use url::Url;

use crate::config::{IngestConfig, SummarySettings};
use crate::models::PageExtraction;
use crate::utils::{clean, title_case};
use dom::element_text;

const UNKNOWN: &str = "Unknown";

static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("static selector"));

/// Stateless extractor configured with the allow-list and summary heuristics.
#[derive(Debug, Clone)]
pub struct Extractor {
    required_sections: Vec<String>,
    summary: SummarySettings,
}

impl Extractor {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            required_sections: config.required_sections.clone(),
            summary: config.summary.clone(),
        }
    }

    /// Parse `html` and extract everything from it.
    ///
    /// The parsed tree never outlives this call, so the result can be held
    /// across `.await` points.
    #[instrument(level = "info", skip_all, fields(url = %page_url, bytes = html.len()))]
    pub fn extract(&self, html: &str, page_url: &str) -> PageExtraction {
        let doc = Html::parse_document(html);
        let page = self.extract_document(&doc, page_url);
        info!(
            manufacturer = %page.manufacturer,
            vehicle_range = %page.vehicle_range,
            summary_rows = page.summary.len(),
            feature_rows = page.feature_count(),
            "Extracted page"
        );
        page
    }

    pub fn extract_document(&self, doc: &Html, page_url: &str) -> PageExtraction {
        PageExtraction {
            page_url: page_url.to_string(),
            manufacturer: manufacturer_from_url(page_url),
            vehicle_range: vehicle_range(doc),
            summary: summary::extract_summary(doc, &self.summary),
            features: features::extract_features(doc, &self.required_sections),
        }
    }
}

/// Third-from-last non-empty path segment, title-cased.
///
/// `https://www.green.car/audi/e-tron-gt/saloon-electric` yields `Audi`.
pub fn manufacturer_from_url(page_url: &str) -> String {
    let segments: Vec<String> = match Url::parse(page_url) {
        Ok(parsed) => parsed
            .path_segments()
            .map(|segs| {
                segs.filter(|s| !s.is_empty())
                    .map(|s| {
                        urlencoding::decode(s)
                            .map(|d| d.into_owned())
                            .unwrap_or_else(|_| s.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default(),
        Err(_) => page_url
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    };

    match segments.len().checked_sub(3).and_then(|i| segments.get(i)) {
        Some(segment) => title_case(&clean(segment)),
        None => UNKNOWN.to_string(),
    }
}

/// Normalized text of the first `<h1>`, or `Unknown` without one.
pub fn vehicle_range(doc: &Html) -> String {
    doc.select(&H1)
        .next()
        .map(element_text)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureFlag;
    use pretty_assertions::assert_eq;

    const PAGE: &str = include_str!("../../tests/fixtures/model_page.html");
    const URL: &str = "https://www.green.car/audi/e-tron-gt/saloon-electric";

    #[test]
    fn test_manufacturer_from_url() {
        assert_eq!(manufacturer_from_url(URL), "Audi");
        assert_eq!(manufacturer_from_url(&format!("{URL}/")), "Audi");
        assert_eq!(
            manufacturer_from_url("https://www.green.car/mercedes-benz/eqs/saloon-electric"),
            "Mercedes-Benz"
        );
        assert_eq!(
            manufacturer_from_url("https://www.green.car/land%20rover/x/y"),
            "Land Rover"
        );
        assert_eq!(manufacturer_from_url("https://www.green.car/audi"), "Unknown");
    }

    #[test]
    fn test_vehicle_range_from_first_h1() {
        let doc = Html::parse_document("<h1>  Audi e-tron\n GT </h1><h1>Other</h1>");
        assert_eq!(vehicle_range(&doc), "Audi e-tron GT");
        let doc = Html::parse_document("<h2>No title</h2>");
        assert_eq!(vehicle_range(&doc), "Unknown");
    }

    #[test]
    fn test_extract_full_page_fixture() {
        let extractor = Extractor::new(&IngestConfig::default());
        let page = extractor.extract(PAGE, URL);

        assert_eq!(page.manufacturer, "Audi");
        assert_eq!(page.vehicle_range, "Audi e-tron GT Saloon");
        let keys: Vec<&str> = page.summary.iter().map(|r| r.summary_key.as_str()).collect();
        assert_eq!(keys, vec!["Price", "Range", "Battery", "Charging"]);
        assert_eq!(page.summary[3].summary_value, "10-80% in 22 mins: 270kW DC");

        let by_name = |name: &str| {
            page.features
                .iter()
                .find(|s| s.section == name)
                .map(|s| s.rows.clone())
                .unwrap()
        };
        let interior = by_name("Interior Features");
        assert_eq!(interior.len(), 3);
        assert_eq!(interior[0].feature_value, FeatureFlag::Present);
        assert_eq!(interior[1].feature_value, FeatureFlag::Absent);
        assert_eq!(interior[2].feature_value, FeatureFlag::Indeterminate);
        assert_eq!(by_name("Wheels").len(), 1);
        assert!(by_name("Passive Safety").is_empty());
        assert_eq!(page.feature_count(), 5);
    }

    #[test]
    fn test_extract_empty_document_degrades() {
        let extractor = Extractor::new(&IngestConfig::default());
        let page = extractor.extract("", URL);
        assert_eq!(page.vehicle_range, "Unknown");
        assert!(page.summary.is_empty());
        assert_eq!(page.features.len(), 8);
        assert_eq!(page.feature_count(), 0);
    }
}
