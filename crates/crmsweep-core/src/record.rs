//! Extracted records and the reports built from them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DateRange;

/// A single CRM object as returned by the search capability.
///
/// Identity is `key`; two records with the same key are the same object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub sort_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Record {
    pub fn new(key: impl Into<String>, sort_timestamp: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            sort_timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter, mostly for fixtures.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Render a scalar field as text. Nulls, arrays and objects yield `None`.
    pub fn field_text(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Records fetched for one leaf window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    pub range: DateRange,
    pub records: Vec<Record>,
    pub total_matched: u64,
    /// The window matched more than the ceiling, so `records` cannot be complete.
    pub truncated: bool,
}

/// Why a window could not be fully extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteReason {
    OverCeilingAtMaxDepth,
    OverCeilingBelowMinWindow,
    /// Fetched as one query with windowing turned off.
    OverCeilingUnsplit,
    ProbeFailed,
    FetchFailed,
    Cancelled,
}

impl IncompleteReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OverCeilingAtMaxDepth => "over ceiling at max split depth",
            Self::OverCeilingBelowMinWindow => "over ceiling and narrower than min window",
            Self::OverCeilingUnsplit => "over ceiling with windowing disabled",
            Self::ProbeFailed => "count probe failed",
            Self::FetchFailed => "page fetch failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A window the caller should re-run (usually narrower, or later).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteRange {
    pub range: DateRange,
    pub reason: IncompleteReason,
    /// Last known match count, if a probe succeeded.
    pub total_matched: Option<u64>,
    pub detail: String,
}

impl fmt::Display for IncompleteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.range, self.reason)?;
        if let Some(total) = self.total_matched {
            write!(f, " ({total} matched)")?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Complete,
    /// Every window was fetched but the caller's record limit cut it short.
    Limited,
    Partial,
    Cancelled,
}

/// Result of one windowed extraction. Owned by the caller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    /// Records keyed by `key`; ordered so the report serialises stably.
    pub records: BTreeMap<String, Record>,
    pub window_count: usize,
    pub max_depth_reached: bool,
    pub incomplete_ranges: Vec<IncompleteRange>,
    pub cancelled: bool,
    /// Workers stopped because the request's `max_records` was used up.
    pub record_limit_reached: bool,
    /// Digest of the request that produced this report.
    pub fingerprint: String,
}

impl ExtractionReport {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn status(&self) -> ExtractionStatus {
        if self.cancelled {
            ExtractionStatus::Cancelled
        } else if !self.incomplete_ranges.is_empty() {
            ExtractionStatus::Partial
        } else if self.record_limit_reached {
            ExtractionStatus::Limited
        } else {
            ExtractionStatus::Complete
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == ExtractionStatus::Complete
    }

    /// Union of field names across all records, sorted.
    pub fn columns(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .records
            .values()
            .flat_map(|r| r.fields.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn field_text_renders_scalars() {
        let r = Record::new("1", ts(0))
            .with_field("email", "a@example.com")
            .with_field("employees", 42)
            .with_field("active", true)
            .with_field("notes", serde_json::Value::Null);
        assert_eq!(r.field_text("email").as_deref(), Some("a@example.com"));
        assert_eq!(r.field_text("employees").as_deref(), Some("42"));
        assert_eq!(r.field_text("active").as_deref(), Some("true"));
        assert!(r.field_text("notes").is_none());
        assert!(r.field_text("missing").is_none());
    }

    #[test]
    fn record_json_roundtrip() {
        let r = Record::new("101", ts(1_700_000_000_000)).with_field("email", "x@y.z");
        let json = serde_json::to_string(&r).unwrap();
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, r);
    }

    #[test]
    fn status_distinguishes_partial_from_complete() {
        let mut report = ExtractionReport::default();
        assert_eq!(report.status(), ExtractionStatus::Complete);

        report.record_limit_reached = true;
        assert_eq!(report.status(), ExtractionStatus::Limited);
        assert!(!report.is_complete());

        report.incomplete_ranges.push(IncompleteRange {
            range: DateRange::new(ts(0), ts(10)).unwrap(),
            reason: IncompleteReason::FetchFailed,
            total_matched: Some(12),
            detail: "503".into(),
        });
        assert_eq!(report.status(), ExtractionStatus::Partial);

        report.cancelled = true;
        assert_eq!(report.status(), ExtractionStatus::Cancelled);
    }

    #[test]
    fn columns_are_sorted_union() {
        let mut report = ExtractionReport::default();
        for r in [
            Record::new("1", ts(0)).with_field("email", "a"),
            Record::new("2", ts(1)).with_field("phone", "1").with_field("email", "b"),
        ] {
            report.records.insert(r.key.clone(), r);
        }
        assert_eq!(report.columns(), vec!["email", "phone"]);
    }

    #[test]
    fn incomplete_range_display_names_range_and_reason() {
        let ir = IncompleteRange {
            range: DateRange::new(ts(0), ts(1000)).unwrap(),
            reason: IncompleteReason::OverCeilingBelowMinWindow,
            total_matched: Some(12_000),
            detail: String::new(),
        };
        let text = ir.to_string();
        assert!(text.contains("1970-01-01T00:00:00.000Z"));
        assert!(text.contains("narrower than min window"));
        assert!(text.contains("12000 matched"));
    }
}
