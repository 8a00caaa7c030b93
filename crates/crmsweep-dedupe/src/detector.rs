//! Duplicate group detection over an extracted record set.
//!
//! Records are matched on normalised field values:
//!
//! - identity field equal → EXACT edge
//! - at least `strong_threshold` secondary fields equal → STRONG edge
//! - fewer secondary fields equal → WEAK annotation
//!
//! EXACT and STRONG edges join records into groups (union-find). WEAK
//! matches never join anything; they only add to `matched_fields` of a group
//! that already holds both records. Output is independent of input order.
//!
//! # Candidate pairs
//!
//! Only pairs sharing a secondary value held by at most `max_bucket_size`
//! records are compared. A pair nominated that way is then scored on every
//! secondary field, oversized ones included, so a first name shared by
//! thousands still counts toward a pair that also shares a phone number.
//! Work is bounded by `records * max_bucket_size` per field.

use std::collections::{BTreeMap, BTreeSet};

use crmsweep_core::{Confidence, DuplicateGroup, Record};
use tracing::debug;

use crate::union_find::UnionFind;
use crate::{DedupeError, KeepStrategy, MatchRules};

pub struct DuplicateDetector {
    rules: MatchRules,
    keep: KeepStrategy,
}

/// Normalised values of one field, indexed like the canonical record list.
struct FieldValues<'r> {
    name: &'r str,
    values: Vec<Option<String>>,
}

impl FieldValues<'_> {
    fn shared(&self, a: usize, b: usize) -> bool {
        self.values[a].is_some() && self.values[a] == self.values[b]
    }

    /// Whether any two of `members` hold the same value.
    fn repeats_within(&self, members: &[usize]) -> bool {
        let mut seen = BTreeSet::new();
        members
            .iter()
            .filter_map(|&i| self.values[i].as_deref())
            .any(|v| !seen.insert(v))
    }

    fn buckets(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, value) in self.values.iter().enumerate() {
            if let Some(value) = value {
                buckets.entry(value).or_default().push(i);
            }
        }
        buckets
    }
}

impl DuplicateDetector {
    pub fn new(rules: MatchRules, keep: KeepStrategy) -> Result<Self, DedupeError> {
        rules.validate()?;
        Ok(Self { rules, keep })
    }

    /// Group duplicate records. Groups are sorted by primary key; members by key.
    pub fn detect<'a, I>(&self, records: I) -> Vec<DuplicateGroup>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let records = canonical_order(records);
        let n = records.len();
        let mut uf = UnionFind::new(n);

        let identity = self.field_values(&records, &self.rules.identity_field);
        let secondary: Vec<FieldValues> = self
            .rules
            .secondary_fields
            .iter()
            .map(|field| self.field_values(&records, field))
            .collect();

        let mut exact_edges = 0usize;
        for members in identity.buckets().into_values() {
            for &b in &members[1..] {
                uf.union(members[0], b);
                exact_edges += 1;
            }
        }

        let (candidates, oversized) = self.candidate_pairs(&secondary);
        // Strong edges that joined two otherwise separate EXACT components.
        let mut bridging = Vec::new();
        let mut strong_edges = 0usize;
        for &(a, b) in &candidates {
            let agreeing = secondary.iter().filter(|f| f.shared(a, b)).count();
            if agreeing >= self.rules.strong_threshold {
                strong_edges += 1;
                if uf.union(a, b) {
                    bridging.push(a);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..n {
            components.entry(uf.find(i)).or_default().push(i);
        }
        let strong_roots: BTreeSet<usize> = bridging.into_iter().map(|i| uf.find(i)).collect();

        let mut groups: Vec<DuplicateGroup> = components
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .filter_map(|(root, members)| {
                let matched_fields: BTreeSet<String> = std::iter::once(&identity)
                    .chain(&secondary)
                    .filter(|f| f.repeats_within(&members))
                    .map(|f| f.name.to_string())
                    .collect();
                let members: Vec<&Record> = members.into_iter().map(|i| records[i]).collect();
                let primary = self.keep.choose(&members)?;
                Some(DuplicateGroup {
                    members: members.iter().map(|r| r.key.clone()).collect(),
                    primary: primary.key.clone(),
                    confidence: if strong_roots.contains(&root) {
                        Confidence::Strong
                    } else {
                        Confidence::Exact
                    },
                    matched_fields,
                })
            })
            .collect();
        groups.sort_by(|a, b| a.primary.cmp(&b.primary));

        debug!(
            records = n,
            exact_edges,
            candidate_pairs = candidates.len(),
            strong_edges,
            oversized_buckets = oversized,
            groups = groups.len(),
            "duplicate detection finished"
        );
        groups
    }

    fn field_values<'r>(&self, records: &[&Record], field: &'r str) -> FieldValues<'r> {
        FieldValues {
            name: field,
            values: records
                .iter()
                .map(|r| self.rules.normalized(r, field))
                .collect(),
        }
    }

    /// Pairs `(a, b)` with `a < b` that share a value in some small bucket,
    /// plus the number of buckets skipped for being too large.
    fn candidate_pairs(&self, secondary: &[FieldValues]) -> (BTreeSet<(usize, usize)>, usize) {
        let mut pairs = BTreeSet::new();
        let mut oversized = 0usize;
        for field in secondary {
            for (value, members) in field.buckets() {
                if members.len() < 2 {
                    continue;
                }
                if members.len() > self.rules.max_bucket_size {
                    debug!(field = field.name, value, size = members.len(), "bucket too large to pair");
                    oversized += 1;
                    continue;
                }
                for (x, &a) in members.iter().enumerate() {
                    for &b in &members[x + 1..] {
                        pairs.insert((a, b));
                    }
                }
            }
        }
        (pairs, oversized)
    }
}

/// Sort by key and collapse repeated keys so results do not depend on input order.
fn canonical_order<'a, I>(records: I) -> Vec<&'a Record>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut sorted: Vec<&Record> = records.into_iter().collect();
    sorted.sort_by(|a, b| {
        a.key
            .cmp(&b.key)
            .then(a.sort_timestamp.cmp(&b.sort_timestamp))
    });
    sorted.dedup_by(|later, earlier| later.key == earlier.key);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone, Utc};

    fn rec(key: &str, days: i64) -> Record {
        Record::new(
            key,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::days(days),
        )
    }

    fn detector(rules: MatchRules) -> DuplicateDetector {
        DuplicateDetector::new(rules, KeepStrategy::default()).unwrap()
    }

    fn contact_rules() -> MatchRules {
        MatchRules::default().with_secondary(["firstname", "lastname", "phone"])
    }

    #[test]
    fn casing_only_email_difference_is_exact() {
        let records = vec![
            rec("101", 3).with_field("email", "Ann@Example.com"),
            rec("102", 1).with_field("email", "ann@example.com "),
            rec("103", 2).with_field("email", "bob@example.com"),
        ];
        let groups = detector(MatchRules::default()).detect(&records);

        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.members, vec!["101", "102"]);
        assert_eq!(g.primary, "102");
        assert_eq!(g.confidence, Confidence::Exact);
        assert_eq!(g.matched_fields, BTreeSet::from(["email".to_string()]));
    }

    #[test]
    fn strong_match_needs_threshold_fields() {
        let records = vec![
            rec("1", 0)
                .with_field("email", "a@x.com")
                .with_field("firstname", "Ann")
                .with_field("lastname", "O'Brien"),
            rec("2", 1)
                .with_field("email", "ann.obrien@y.com")
                .with_field("firstname", "ann")
                .with_field("lastname", "OBrien"),
            // Only one secondary field in common: weak, not grouped.
            rec("3", 2)
                .with_field("email", "c@z.com")
                .with_field("firstname", "Ann")
                .with_field("lastname", "Smith"),
        ];
        let groups = detector(contact_rules()).detect(&records);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec!["1", "2"]);
        assert_eq!(groups[0].confidence, Confidence::Strong);
        assert_eq!(
            groups[0].matched_fields,
            BTreeSet::from(["firstname".to_string(), "lastname".to_string()])
        );
    }

    #[test]
    fn weak_edges_only_annotate_existing_groups() {
        let records = vec![
            rec("1", 0)
                .with_field("email", "a@x.com")
                .with_field("phone", "555-0100"),
            rec("2", 1)
                .with_field("email", "A@X.com")
                .with_field("phone", "(555) 0100"),
            rec("3", 2)
                .with_field("email", "other@x.com")
                .with_field("phone", "5550100"),
        ];
        let groups = detector(contact_rules()).detect(&records);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec!["1", "2"]);
        assert_eq!(groups[0].confidence, Confidence::Exact);
        assert_eq!(
            groups[0].matched_fields,
            BTreeSet::from(["email".to_string(), "phone".to_string()])
        );
    }

    #[test]
    fn strong_edge_bridging_exact_groups_downgrades_confidence() {
        let records = vec![
            rec("1", 0).with_field("email", "a@x.com"),
            rec("2", 1)
                .with_field("email", "a@x.com")
                .with_field("firstname", "Ann")
                .with_field("lastname", "Lee"),
            rec("3", 2)
                .with_field("email", "ann@y.com")
                .with_field("firstname", "Ann")
                .with_field("lastname", "Lee"),
            rec("4", 3).with_field("email", "ann@y.com"),
        ];
        let groups = detector(contact_rules()).detect(&records);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec!["1", "2", "3", "4"]);
        assert_eq!(groups[0].primary, "1");
        assert_eq!(groups[0].confidence, Confidence::Strong);
    }

    #[test]
    fn common_first_name_across_thousands_only_pairs_real_matches() {
        let mut records: Vec<Record> = (0..5_000)
            .map(|i| {
                rec(&format!("{i:05}"), i % 30)
                    .with_field("email", format!("user{i}@example.com"))
                    .with_field("firstname", "John")
                    .with_field("phone", format!("555-{i:05}"))
            })
            .collect();
        for i in [10, 4321] {
            records[i] = records[i]
                .clone()
                .with_field("lastname", "Smith")
                .with_field("phone", "555-99999");
        }

        let groups = detector(contact_rules()).detect(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members, vec!["00010", "04321"]);
        assert_eq!(groups[0].confidence, Confidence::Strong);
        // The oversized first-name bucket still counts once the pair is found.
        assert_eq!(
            groups[0].matched_fields,
            BTreeSet::from([
                "firstname".to_string(),
                "lastname".to_string(),
                "phone".to_string()
            ])
        );
    }

    #[test]
    fn oversized_buckets_do_not_nominate_pairs() {
        let records: Vec<Record> = (0..3)
            .map(|i| {
                rec(&i.to_string(), i)
                    .with_field("email", format!("{i}@x.com"))
                    .with_field("firstname", "Ann")
                    .with_field("lastname", "Lee")
            })
            .collect();
        assert_eq!(detector(contact_rules()).detect(&records).len(), 1);

        let capped = contact_rules().with_max_bucket_size(2);
        assert!(detector(capped).detect(&records).is_empty());
    }

    #[test]
    fn blank_values_never_match() {
        let records = vec![
            rec("1", 0).with_field("email", "  ").with_field("phone", "--"),
            rec("2", 1).with_field("email", "").with_field("phone", "()"),
            rec("3", 2).with_field("email", serde_json::Value::Null),
            rec("4", 3),
        ];
        assert!(detector(contact_rules()).detect(&records).is_empty());
    }

    #[test]
    fn keep_strategy_picks_primary() {
        let records = vec![
            rec("7", 5).with_field("email", "a@x.com"),
            rec("3", 9).with_field("email", "a@x.com"),
            rec("5", 1).with_field("email", "a@x.com"),
        ];
        let pick = |keep| {
            DuplicateDetector::new(MatchRules::default(), keep)
                .unwrap()
                .detect(&records)[0]
                .primary
                .clone()
        };
        assert_eq!(pick(KeepStrategy::OldestCreated), "5");
        assert_eq!(pick(KeepStrategy::Newest), "3");
        assert_eq!(pick(KeepStrategy::First), "3");
    }

    #[test]
    fn oldest_ties_go_to_smallest_key() {
        let records = vec![
            rec("9", 1).with_field("email", "a@x.com"),
            rec("4", 1).with_field("email", "a@x.com"),
        ];
        let groups = detector(MatchRules::default()).detect(&records);
        assert_eq!(groups[0].primary, "4");
    }

    #[test]
    fn output_is_independent_of_input_order() {
        let mut records: Vec<Record> = (0..60)
            .map(|i| {
                rec(&format!("{:03}", i), (i * 7 % 13) as i64)
                    .with_field("email", format!("user{}@example.com", i % 17))
                    .with_field("firstname", format!("N{}", i % 5))
                    .with_field("lastname", format!("L{}", i % 4))
                    .with_field("phone", format!("555-{:04}", i % 11))
            })
            .collect();
        let d = detector(contact_rules());
        let expected = d.detect(&records);
        assert!(!expected.is_empty());

        records.reverse();
        assert_eq!(d.detect(&records), expected);

        // Deterministic shuffle.
        let mut state = 17u64;
        for i in (1..records.len()).rev() {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            records.swap(i, (state >> 33) as usize % (i + 1));
        }
        assert_eq!(d.detect(&records), expected);

        // Repeated keys collapse.
        let doubled: Vec<Record> = records.iter().chain(&records).cloned().collect();
        assert_eq!(d.detect(&doubled), expected);
    }

    #[test]
    fn groups_are_well_formed_and_sorted() {
        let records: Vec<Record> = (0..40)
            .map(|i| rec(&format!("k{:02}", 39 - i), i).with_field("email", format!("{}@x.com", i % 6)))
            .collect();
        let groups = detector(MatchRules::default()).detect(&records);
        assert_eq!(groups.len(), 6);
        assert!(groups.iter().all(DuplicateGroup::is_well_formed));
        assert!(groups.windows(2).all(|w| w[0].primary < w[1].primary));
        for g in &groups {
            assert!(g.members.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
