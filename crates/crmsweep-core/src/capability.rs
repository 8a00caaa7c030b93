//! Interfaces to the external CRM: one read capability, one write capability.
//!
//! The core only ever talks to the CRM through these traits, so the engines
//! can be driven by the HTTP client in `crmsweep-remote` or by in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DateRange, Filter, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One bounded search call: filters plus a `[start, end)` window on the sort property.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub filters: Vec<Filter>,
    pub range: DateRange,
    pub sort_property: String,
    pub direction: SortDirection,
    pub cursor: Option<String>,
    pub limit: u32,
}

/// A page of results. `total_matched` covers the whole query, not the page.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub records: Vec<Record>,
    pub total_matched: u64,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication or permission failure: {0}")]
    Auth(String),

    /// At least one of `keys` no longer exists.
    #[error("records not found: {}", keys.join(", "))]
    NotFound { keys: Vec<String> },

    /// Some secondaries were merged into `primary` before `cause` stopped the rest.
    #[error("merged {} into {primary} before failing: {cause}", merged.join(", "))]
    PartialMerge {
        primary: String,
        merged: Vec<String>,
        cause: Box<CapabilityError>,
    },

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl CapabilityError {
    /// Worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }

    /// Must abort the whole operation; never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

#[async_trait]
pub trait SearchCapability: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, CapabilityError>;
}

#[async_trait]
pub trait MutationCapability: Send + Sync {
    /// Merge every key in `secondaries` into `primary`.
    ///
    /// Returns [`CapabilityError::NotFound`] when a record is gone before
    /// anything was merged, and [`CapabilityError::PartialMerge`] when a
    /// failure follows at least one successful merge.
    async fn merge_records(
        &self,
        primary: &str,
        secondaries: &[String],
    ) -> Result<(), CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(CapabilityError::Transient("502".into()).is_transient());
        assert!(CapabilityError::RateLimited { retry_after: None }.is_transient());
        assert!(CapabilityError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!CapabilityError::Auth("401".into()).is_transient());
        assert!(CapabilityError::Auth("401".into()).is_fatal());
        assert!(!CapabilityError::Rejected("400".into()).is_fatal());
        assert!(!CapabilityError::NotFound { keys: vec![] }.is_transient());
    }

    #[test]
    fn not_found_lists_keys() {
        let err = CapabilityError::NotFound {
            keys: vec!["11".into(), "12".into()],
        };
        assert_eq!(err.to_string(), "records not found: 11, 12");
    }

    #[test]
    fn partial_merge_names_what_was_merged() {
        let err = CapabilityError::PartialMerge {
            primary: "1".into(),
            merged: vec!["2".into()],
            cause: Box::new(CapabilityError::NotFound {
                keys: vec!["1".into(), "3".into()],
            }),
        };
        assert!(!err.is_transient());
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "merged 2 into 1 before failing: records not found: 1, 3"
        );
    }
}
