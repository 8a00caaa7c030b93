//! Merge plans and their hashes.
//!
//! The hash covers the canonical groups and the source fingerprint, never
//! `generated_at`, so rebuilding the same plan later yields the same hash.
//! It is a comparison token for the two-phase apply, not a signature.

use chrono::Utc;
use crmsweep_core::{DuplicateGroup, MergePlan, PlanHash, sha256_tagged};
use serde::Serialize;

use crate::DedupeError;

#[derive(Serialize)]
struct HashedPlan<'a> {
    groups: &'a [DuplicateGroup],
    source_extraction_fingerprint: &'a str,
}

/// Canonicalise `groups` into a plan and compute its hash.
pub fn build_plan(
    groups: Vec<DuplicateGroup>,
    source_extraction_fingerprint: &str,
) -> Result<(MergePlan, PlanHash), DedupeError> {
    let groups = canonicalize(groups)?;
    let hash = hash_canonical(&groups, source_extraction_fingerprint)?;
    let plan = MergePlan {
        groups,
        generated_at: Utc::now(),
        source_extraction_fingerprint: source_extraction_fingerprint.to_string(),
    };
    Ok((plan, hash))
}

/// Hash of an existing plan, recomputed from its groups.
pub fn plan_hash(plan: &MergePlan) -> Result<PlanHash, DedupeError> {
    let groups = canonicalize(plan.groups.clone())?;
    hash_canonical(&groups, &plan.source_extraction_fingerprint)
}

fn hash_canonical(groups: &[DuplicateGroup], fingerprint: &str) -> Result<PlanHash, DedupeError> {
    let bytes = serde_json::to_vec(&HashedPlan {
        groups,
        source_extraction_fingerprint: fingerprint,
    })?;
    Ok(PlanHash::new(sha256_tagged(&bytes)))
}

fn canonicalize(mut groups: Vec<DuplicateGroup>) -> Result<Vec<DuplicateGroup>, DedupeError> {
    for group in &mut groups {
        group.members.sort();
        group.members.dedup();
        if !group.is_well_formed() {
            return Err(DedupeError::MalformedGroup {
                primary: group.primary.clone(),
                reason: format!(
                    "needs at least two distinct members including the primary, got {:?}",
                    group.members
                ),
            });
        }
    }
    groups.sort_by(|a, b| {
        a.primary
            .cmp(&b.primary)
            .then_with(|| a.members.cmp(&b.members))
    });
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crmsweep_core::Confidence;
    use std::collections::BTreeSet;

    fn group(members: &[&str], primary: &str) -> DuplicateGroup {
        DuplicateGroup {
            members: members.iter().map(|s| s.to_string()).collect(),
            primary: primary.into(),
            confidence: Confidence::Exact,
            matched_fields: BTreeSet::from(["email".to_string()]),
        }
    }

    #[test]
    fn hash_is_stable_across_rebuilds() {
        let groups = vec![group(&["1", "2"], "1"), group(&["5", "3"], "3")];
        let (plan_a, hash_a) = build_plan(groups.clone(), "sha256:src").unwrap();
        let (plan_b, hash_b) = build_plan(groups, "sha256:src").unwrap();
        assert_eq!(hash_a, hash_b);
        assert_eq!(plan_a.groups, plan_b.groups);
        assert_eq!(plan_hash(&plan_a).unwrap(), hash_a);
        assert!(hash_a.as_str().starts_with("sha256:"));
        assert_eq!(hash_a.as_str().len(), "sha256:".len() + 64);
    }

    #[test]
    fn hash_ignores_group_and_member_order() {
        let (_, a) = build_plan(
            vec![group(&["1", "2"], "1"), group(&["3", "5"], "3")],
            "fp",
        )
        .unwrap();
        let (plan, b) = build_plan(
            vec![group(&["5", "3"], "3"), group(&["2", "1"], "1")],
            "fp",
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(plan.groups[0].primary, "1");
        assert_eq!(plan.groups[1].members, vec!["3", "5"]);
    }

    #[test]
    fn hash_changes_with_any_plan_change() {
        let base = vec![group(&["1", "2"], "1"), group(&["3", "5"], "3")];
        let (_, h) = build_plan(base.clone(), "fp").unwrap();

        let mut added_member = base.clone();
        added_member[0].members.push("9".into());
        let mut other_primary = base.clone();
        other_primary[1].primary = "5".into();
        let mut other_confidence = base.clone();
        other_confidence[0].confidence = Confidence::Strong;

        for changed in [added_member, other_primary, other_confidence, base[..1].to_vec()] {
            assert_ne!(build_plan(changed, "fp").unwrap().1, h);
        }
        assert_ne!(build_plan(base, "other-fp").unwrap().1, h);
    }

    #[test]
    fn malformed_groups_rejected() {
        assert!(matches!(
            build_plan(vec![group(&["1"], "1")], "fp"),
            Err(DedupeError::MalformedGroup { .. })
        ));
        assert!(build_plan(vec![group(&["1", "2"], "7")], "fp").is_err());
        assert!(build_plan(vec![group(&["1", "1"], "1")], "fp").is_err());
    }

    #[test]
    fn empty_plan_hashes() {
        let (plan, hash) = build_plan(vec![], "fp").unwrap();
        assert_eq!(plan.total_merges(), 0);
        assert_eq!(plan_hash(&plan).unwrap(), hash);
    }
}
