//! Duplicate groups, merge plans, and apply outcomes.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How strongly the members of a group are believed to be duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Exact,
    Strong,
    Weak,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "EXACT",
            Self::Strong => "STRONG",
            Self::Weak => "WEAK",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A set of records believed to be one real-world entity.
///
/// `members` holds at least two keys, sorted, and includes `primary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub members: Vec<String>,
    pub primary: String,
    pub confidence: Confidence,
    pub matched_fields: BTreeSet<String>,
}

impl DuplicateGroup {
    /// Members other than the primary, in member order.
    pub fn secondaries(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|k| **k != self.primary)
            .cloned()
            .collect()
    }

    pub fn is_well_formed(&self) -> bool {
        self.members.len() >= 2 && self.members.contains(&self.primary)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    pub groups: Vec<DuplicateGroup>,
    pub generated_at: DateTime<Utc>,
    pub source_extraction_fingerprint: String,
}

impl MergePlan {
    /// Number of merge calls the plan implies (one per secondary).
    pub fn total_merges(&self) -> usize {
        self.groups.iter().map(|g| g.members.len().saturating_sub(1)).sum()
    }
}

/// Opaque comparison token over a canonical merge plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanHash(String);

impl PlanHash {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PlanHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    Merged,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub group: DuplicateGroup,
    pub status: GroupStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub group_outcomes: Vec<GroupOutcome>,
}

impl ApplyResult {
    fn count(&self, status: GroupStatus) -> usize {
        self.group_outcomes
            .iter()
            .filter(|o| o.status == status)
            .count()
    }

    pub fn merged(&self) -> usize {
        self.count(GroupStatus::Merged)
    }

    pub fn skipped(&self) -> usize {
        self.count(GroupStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(GroupStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(members: &[&str], primary: &str) -> DuplicateGroup {
        DuplicateGroup {
            members: members.iter().map(|s| s.to_string()).collect(),
            primary: primary.into(),
            confidence: Confidence::Exact,
            matched_fields: BTreeSet::from(["email".to_string()]),
        }
    }

    #[test]
    fn secondaries_exclude_primary() {
        let g = group(&["1", "2", "3"], "2");
        assert_eq!(g.secondaries(), vec!["1", "3"]);
        assert!(g.is_well_formed());
    }

    #[test]
    fn malformed_groups_detected() {
        assert!(!group(&["1"], "1").is_well_formed());
        assert!(!group(&["1", "2"], "9").is_well_formed());
    }

    #[test]
    fn total_merges_tolerates_empty_groups() {
        let json = r#"{
            "groups": [
                {"members": [], "primary": "1", "confidence": "EXACT", "matched_fields": []},
                {"members": ["1", "2", "3"], "primary": "1", "confidence": "EXACT", "matched_fields": ["email"]}
            ],
            "generated_at": "2024-01-01T00:00:00Z",
            "source_extraction_fingerprint": "sha256:src"
        }"#;
        let plan: MergePlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.total_merges(), 2);
    }

    #[test]
    fn confidence_serialises_upper_case() {
        let json = serde_json::to_string(&Confidence::Strong).unwrap();
        assert_eq!(json, "\"STRONG\"");
        let status = serde_json::to_string(&GroupStatus::Skipped).unwrap();
        assert_eq!(status, "\"SKIPPED\"");
    }

    #[test]
    fn apply_result_counts() {
        let g = group(&["1", "2"], "1");
        let result = ApplyResult {
            group_outcomes: vec![
                GroupOutcome {
                    group: g.clone(),
                    status: GroupStatus::Merged,
                    error: None,
                },
                GroupOutcome {
                    group: g.clone(),
                    status: GroupStatus::Skipped,
                    error: Some("record 2 not found".into()),
                },
                GroupOutcome {
                    group: g,
                    status: GroupStatus::Failed,
                    error: Some("rejected".into()),
                },
            ],
        };
        assert_eq!(
            (result.merged(), result.skipped(), result.failed()),
            (1, 1, 1)
        );
    }

    #[test]
    fn plan_hash_is_transparent() {
        let h = PlanHash::new("sha256:abc");
        assert_eq!(serde_json::to_string(&h).unwrap(), "\"sha256:abc\"");
    }
}
