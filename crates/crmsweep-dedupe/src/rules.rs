//! Which fields make two records duplicates, and which record survives.

use std::fmt;
use std::str::FromStr;

use crmsweep_core::{Record, normalize_email, normalize_text};
use serde::{Deserialize, Serialize};

use crate::DedupeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRules {
    /// Equal normalised values here make an EXACT match.
    pub identity_field: String,
    pub secondary_fields: Vec<String>,
    /// Secondary fields that must agree for a STRONG match.
    pub strong_threshold: usize,
    /// Secondary values shared by more records than this do not nominate
    /// candidate pairs. They still count toward a pair found another way.
    #[serde(default = "default_max_bucket_size")]
    pub max_bucket_size: usize,
}

pub const DEFAULT_MAX_BUCKET_SIZE: usize = 100;

fn default_max_bucket_size() -> usize {
    DEFAULT_MAX_BUCKET_SIZE
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            identity_field: "email".into(),
            secondary_fields: Vec::new(),
            strong_threshold: 2,
            max_bucket_size: DEFAULT_MAX_BUCKET_SIZE,
        }
    }
}

impl MatchRules {
    pub fn new(identity_field: impl Into<String>) -> Self {
        Self {
            identity_field: identity_field.into(),
            ..Default::default()
        }
    }

    pub fn with_secondary<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strong_threshold(mut self, threshold: usize) -> Self {
        self.strong_threshold = threshold;
        self
    }

    pub fn with_max_bucket_size(mut self, size: usize) -> Self {
        self.max_bucket_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), DedupeError> {
        if self.identity_field.trim().is_empty() {
            return Err(DedupeError::InvalidRules("identity field is blank".into()));
        }
        if self.strong_threshold == 0 {
            return Err(DedupeError::InvalidRules(
                "strong threshold must be at least 1".into(),
            ));
        }
        if self.max_bucket_size < 2 {
            return Err(DedupeError::InvalidRules(
                "max bucket size must be at least 2".into(),
            ));
        }
        if let Some(dup) = self
            .secondary_fields
            .iter()
            .find(|f| **f == self.identity_field)
        {
            return Err(DedupeError::InvalidRules(format!(
                "{dup:?} is both the identity field and a secondary field"
            )));
        }
        Ok(())
    }

    /// Comparison key for `field` on `record`, if it has a usable value.
    ///
    /// Fields whose name mentions `email` keep their punctuation; everything
    /// else is reduced to lowercase alphanumerics.
    pub fn normalized(&self, record: &Record, field: &str) -> Option<String> {
        let raw = record.field_text(field)?;
        if field.to_ascii_lowercase().contains("email") {
            normalize_email(&raw)
        } else {
            normalize_text(&raw)
        }
    }
}

/// Picks the surviving (primary) record of a duplicate group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepStrategy {
    /// Earliest `sort_timestamp`; ties go to the smallest key.
    #[default]
    OldestCreated,
    /// Latest `sort_timestamp`; ties go to the smallest key.
    Newest,
    /// Smallest key.
    First,
}

impl KeepStrategy {
    /// Choose the primary among `members`, which must be non-empty and sorted by key.
    pub fn choose<'a>(&self, members: &[&'a Record]) -> Option<&'a Record> {
        let first = *members.first()?;
        let chosen = members.iter().skip(1).fold(first, |best, &r| {
            let better = match self {
                Self::OldestCreated => r.sort_timestamp < best.sort_timestamp,
                Self::Newest => r.sort_timestamp > best.sort_timestamp,
                Self::First => r.key < best.key,
            };
            if better { r } else { best }
        });
        Some(chosen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OldestCreated => "oldest",
            Self::Newest => "newest",
            Self::First => "first",
        }
    }
}

impl fmt::Display for KeepStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeepStrategy {
    type Err = DedupeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oldest" | "oldest_created" | "oldest-created" => Ok(Self::OldestCreated),
            "newest" => Ok(Self::Newest),
            "first" => Ok(Self::First),
            _ => Err(DedupeError::UnknownKeepStrategy(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rec(key: &str, day: u32) -> Record {
        Record::new(key, Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap())
    }

    #[test]
    fn defaults() {
        let rules = MatchRules::default();
        assert_eq!(rules.identity_field, "email");
        assert_eq!(rules.strong_threshold, 2);
        assert!(rules.validate().is_ok());
        assert_eq!(KeepStrategy::default(), KeepStrategy::OldestCreated);
    }

    #[test]
    fn invalid_rules_rejected() {
        assert!(MatchRules::new(" ").validate().is_err());
        assert!(
            MatchRules::default()
                .with_strong_threshold(0)
                .validate()
                .is_err()
        );
        assert!(
            MatchRules::default()
                .with_secondary(["email", "phone"])
                .validate()
                .is_err()
        );
        assert!(
            MatchRules::default()
                .with_max_bucket_size(1)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn max_bucket_size_defaults_when_absent() {
        let rules: MatchRules = serde_json::from_str(
            r#"{"identity_field": "email", "secondary_fields": ["phone"], "strong_threshold": 1}"#,
        )
        .unwrap();
        assert_eq!(rules.max_bucket_size, DEFAULT_MAX_BUCKET_SIZE);
    }

    #[test]
    fn normalisation_depends_on_field() {
        let rules = MatchRules::default();
        let r = rec("1", 1)
            .with_field("email", " Ann.Lee@Example.com ")
            .with_field("phone", "+1 (555) 010-2000")
            .with_field("lastname", "  ")
            .with_field("employees", 42);
        assert_eq!(rules.normalized(&r, "email").as_deref(), Some("ann.lee@example.com"));
        assert_eq!(rules.normalized(&r, "phone").as_deref(), Some("15550102000"));
        assert_eq!(rules.normalized(&r, "employees").as_deref(), Some("42"));
        assert_eq!(rules.normalized(&r, "lastname"), None);
        assert_eq!(rules.normalized(&r, "missing"), None);
    }

    #[test]
    fn keep_strategies() {
        let (a, b, c) = (rec("10", 5), rec("20", 2), rec("30", 2));
        let members = [&a, &b, &c];
        assert_eq!(KeepStrategy::OldestCreated.choose(&members).unwrap().key, "20");
        assert_eq!(KeepStrategy::Newest.choose(&members).unwrap().key, "10");
        assert_eq!(KeepStrategy::First.choose(&members).unwrap().key, "10");
        assert!(KeepStrategy::First.choose(&[]).is_none());
    }

    #[test]
    fn parse_keep_strategy() {
        assert_eq!("Oldest".parse::<KeepStrategy>().unwrap(), KeepStrategy::OldestCreated);
        assert_eq!("newest".parse::<KeepStrategy>().unwrap(), KeepStrategy::Newest);
        assert!("largest".parse::<KeepStrategy>().is_err());
    }
}
