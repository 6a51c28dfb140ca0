//! Data models for extracted page facts and their landed records.
//!
//! The extractor produces a [`PageExtraction`]: the page-level metadata plus
//! bare summary and feature rows. The controller then stamps it with a
//! logical version (`scraped_at`) to obtain the flat [`SummaryRecord`] and
//! [`FeatureRecord`] rows that are written as JSONL. Field order in the
//! record structs is the column order of the landed files.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One `key: value` line from the summary block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub summary_key: String,
    pub summary_value: String,
}

/// Tri-state value of a feature row, serialized as `"true"`, `"false"` or `""`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureFlag {
    #[serde(rename = "true")]
    Present,
    #[serde(rename = "false")]
    Absent,
    /// No recognizable icon in the value cell.
    #[serde(rename = "")]
    Indeterminate,
}

impl FeatureFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            FeatureFlag::Present => "true",
            FeatureFlag::Absent => "false",
            FeatureFlag::Indeterminate => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub feature_name: String,
    pub feature_value: FeatureFlag,
}

/// Rows found under one allow-listed accordion section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionFeatures {
    pub section: String,
    pub rows: Vec<FeatureRow>,
}

/// Everything the extractor learned from one rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageExtraction {
    pub page_url: String,
    pub manufacturer: String,
    pub vehicle_range: String,
    pub summary: Vec<SummaryRow>,
    /// One entry per allow-listed section, in allow-list order.
    pub features: Vec<SectionFeatures>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub summary_key: String,
    pub summary_value: String,
    pub scraped_at: String,
    pub page_url: String,
    pub manufacturer: String,
    pub vehicle_range: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub scraped_at: String,
    pub page_url: String,
    pub manufacturer: String,
    pub vehicle_range: String,
    pub section: String,
    pub feature_name: String,
    pub feature_value: FeatureFlag,
}

/// The stamped output of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Records {
    pub summary: Vec<SummaryRecord>,
    pub features: Vec<FeatureRecord>,
}

impl Records {
    /// Logical version of the run: the `scraped_at` of the first summary record.
    pub fn logical_version(&self) -> Option<&str> {
        self.summary.first().map(|r| r.scraped_at.as_str())
    }
}

impl PageExtraction {
    pub fn feature_count(&self) -> usize {
        self.features.iter().map(|s| s.rows.len()).sum()
    }

    /// Attach the shared metadata to every row.
    pub fn stamp(&self, scraped_at: &str) -> Records {
        let summary = self
            .summary
            .iter()
            .map(|row| SummaryRecord {
                summary_key: row.summary_key.clone(),
                summary_value: row.summary_value.clone(),
                scraped_at: scraped_at.to_string(),
                page_url: self.page_url.clone(),
                manufacturer: self.manufacturer.clone(),
                vehicle_range: self.vehicle_range.clone(),
            })
            .collect();

        let features = self
            .features
            .iter()
            .flat_map(|section| {
                section.rows.iter().map(move |row| FeatureRecord {
                    scraped_at: scraped_at.to_string(),
                    page_url: self.page_url.clone(),
                    manufacturer: self.manufacturer.clone(),
                    vehicle_range: self.vehicle_range.clone(),
                    section: section.section.clone(),
                    feature_name: row.feature_name.clone(),
                    feature_value: row.feature_value,
                })
            })
            .collect();

        Records { summary, features }
    }

    /// SHA-256 over the extracted content, independent of when it was scraped.
    pub fn fingerprint(&self) -> String {
        const UNIT: &[u8] = b"\x1f";
        const RECORD: &[u8] = b"\x1e";

        let mut hasher = Sha256::new();
        for field in [&self.page_url, &self.manufacturer, &self.vehicle_range] {
            hasher.update(field.as_bytes());
            hasher.update(UNIT);
        }
        hasher.update(RECORD);
        for row in &self.summary {
            hasher.update(row.summary_key.as_bytes());
            hasher.update(UNIT);
            hasher.update(row.summary_value.as_bytes());
            hasher.update(RECORD);
        }
        for section in &self.features {
            hasher.update(section.section.as_bytes());
            hasher.update(RECORD);
            for row in &section.rows {
                hasher.update(row.feature_name.as_bytes());
                hasher.update(UNIT);
                hasher.update(row.feature_value.as_str().as_bytes());
                hasher.update(RECORD);
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Durable marker of the last successfully ingested run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub scraped_at: Option<String>,
    pub page_url: String,
    pub uploaded_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> PageExtraction {
        PageExtraction {
            page_url: "https://www.green.car/audi/e-tron-gt/saloon-electric".into(),
            manufacturer: "Audi".into(),
            vehicle_range: "Audi e-tron GT".into(),
            summary: vec![SummaryRow {
                summary_key: "Range".into(),
                summary_value: "298 miles".into(),
            }],
            features: vec![
                SectionFeatures {
                    section: "Wheels".into(),
                    rows: vec![FeatureRow {
                        feature_name: "20in alloys".into(),
                        feature_value: FeatureFlag::Present,
                    }],
                },
                SectionFeatures {
                    section: "Security".into(),
                    rows: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_feature_flag_serializes_as_strings() {
        assert_eq!(serde_json::to_string(&FeatureFlag::Present).unwrap(), "\"true\"");
        assert_eq!(serde_json::to_string(&FeatureFlag::Absent).unwrap(), "\"false\"");
        assert_eq!(serde_json::to_string(&FeatureFlag::Indeterminate).unwrap(), "\"\"");
        let back: FeatureFlag = serde_json::from_str("\"\"").unwrap();
        assert_eq!(back, FeatureFlag::Indeterminate);
    }

    #[test]
    fn test_stamp_shares_metadata() {
        let records = sample().stamp("2026-01-01T00:00:00+00:00");
        assert_eq!(records.summary.len(), 1);
        assert_eq!(records.features.len(), 1);
        assert_eq!(records.logical_version(), Some("2026-01-01T00:00:00+00:00"));
        let f = &records.features[0];
        assert_eq!(f.section, "Wheels");
        assert_eq!(f.manufacturer, "Audi");
        assert_eq!(f.scraped_at, records.summary[0].scraped_at);
    }

    #[test]
    fn test_record_field_order() {
        let records = sample().stamp("t0");
        let line = serde_json::to_string(&records.features[0]).unwrap();
        assert!(line.starts_with("{\"scraped_at\":\"t0\",\"page_url\""));
        assert!(line.ends_with("\"feature_name\":\"20in alloys\",\"feature_value\":\"true\"}"));
        let line = serde_json::to_string(&records.summary[0]).unwrap();
        assert!(line.starts_with("{\"summary_key\":\"Range\",\"summary_value\":\"298 miles\""));
    }

    #[test]
    fn test_logical_version_absent_without_summary() {
        let mut page = sample();
        page.summary.clear();
        assert_eq!(page.stamp("t0").logical_version(), None);
    }

    #[test]
    fn test_fingerprint_tracks_content_only() {
        let a = sample();
        let b = sample();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut changed = sample();
        changed.features[0].rows[0].feature_value = FeatureFlag::Absent;
        assert_ne!(a.fingerprint(), changed.fingerprint());

        // Moving text across the key/value boundary must change the hash.
        let mut shifted = sample();
        shifted.summary[0].summary_key = "Range298".into();
        shifted.summary[0].summary_value = " miles".into();
        assert_ne!(a.fingerprint(), shifted.fingerprint());
    }

    #[test]
    fn test_checkpoint_without_fingerprint_loads() {
        let cp: Checkpoint = serde_json::from_str(
            r#"{"scraped_at":null,"page_url":"https://x","uploaded_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(cp.scraped_at, None);
        assert_eq!(cp.content_sha256, None);
        let out = serde_json::to_string(&cp).unwrap();
        assert!(out.contains("\"scraped_at\":null"));
        assert!(!out.contains("content_sha256"));
    }
}
