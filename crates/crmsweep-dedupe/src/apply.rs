//! Two-phase apply: a dry run returns the plan and its hash; an approved run
//! merges only if the caller echoes back the hash of an identical plan.

use std::sync::Arc;
use std::time::Duration;

use crmsweep_core::{
    ApplyResult, CapabilityError, DuplicateGroup, GroupOutcome, GroupStatus, MergePlan,
    MutationCapability, PlanHash,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{ApplyError, build_plan};

/// What the caller wants applied.
#[derive(Debug, Clone, Default)]
pub struct ApplyRequest {
    /// Hash from an earlier dry run. Required when `approve` is set.
    pub plan_hash_claim: Option<PlanHash>,
    pub groups: Vec<DuplicateGroup>,
    pub source_extraction_fingerprint: String,
    pub approve: bool,
}

impl ApplyRequest {
    /// Dry-run request for the groups of a saved plan.
    pub fn from_plan(plan: &MergePlan) -> Self {
        Self {
            plan_hash_claim: None,
            groups: plan.groups.clone(),
            source_extraction_fingerprint: plan.source_extraction_fingerprint.clone(),
            approve: false,
        }
    }

    pub fn approved(mut self, claim: PlanHash) -> Self {
        self.plan_hash_claim = Some(claim);
        self.approve = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplyOutcome {
    DryRun {
        plan: MergePlan,
        plan_hash: PlanHash,
    },
    Apply {
        plan: MergePlan,
        plan_hash: PlanHash,
        result: ApplyResult,
    },
}

impl ApplyOutcome {
    pub fn plan(&self) -> &MergePlan {
        match self {
            Self::DryRun { plan, .. } | Self::Apply { plan, .. } => plan,
        }
    }

    pub fn plan_hash(&self) -> &PlanHash {
        match self {
            Self::DryRun { plan_hash, .. } | Self::Apply { plan_hash, .. } => plan_hash,
        }
    }
}

pub struct ApplyController {
    capability: Arc<dyn MutationCapability>,
    call_timeout: Option<Duration>,
}

impl ApplyController {
    pub fn new(capability: Arc<dyn MutationCapability>) -> Self {
        Self {
            capability,
            call_timeout: None,
        }
    }

    /// Bound each merge call; a call that runs over is recorded as FAILED.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Rebuild the plan from `request` and either report it or execute it.
    ///
    /// Nothing is mutated unless `approve` is set and the claimed hash equals
    /// the rebuilt plan's hash.
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyOutcome, ApplyError> {
        let (plan, plan_hash) = build_plan(request.groups, &request.source_extraction_fingerprint)?;

        if !request.approve {
            info!(
                groups = plan.groups.len(),
                merges = plan.total_merges(),
                %plan_hash,
                "dry run, no changes made"
            );
            return Ok(ApplyOutcome::DryRun { plan, plan_hash });
        }

        let claimed = request.plan_hash_claim.ok_or(ApplyError::MissingPlanHash)?;
        if claimed != plan_hash {
            warn!(%claimed, actual = %plan_hash, "plan hash mismatch, refusing to apply");
            return Err(ApplyError::PlanHashMismatch {
                claimed,
                actual: plan_hash,
            });
        }

        let mut result = ApplyResult::default();
        for group in &plan.groups {
            result.group_outcomes.push(self.merge_group(group).await);
        }
        info!(
            merged = result.merged(),
            skipped = result.skipped(),
            failed = result.failed(),
            %plan_hash,
            "plan applied"
        );
        Ok(ApplyOutcome::Apply {
            plan,
            plan_hash,
            result,
        })
    }

    async fn merge_group(&self, group: &DuplicateGroup) -> GroupOutcome {
        let secondaries = group.secondaries();
        let call = self.capability.merge_records(&group.primary, &secondaries);
        let outcome = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(CapabilityError::Timeout(limit))),
            None => call.await,
        };

        let (status, error) = match outcome {
            Ok(()) => (GroupStatus::Merged, None),
            Err(err @ CapabilityError::NotFound { .. }) => {
                warn!(primary = %group.primary, error = %err, "group skipped");
                (GroupStatus::Skipped, Some(err.to_string()))
            }
            // Part of the group was mutated, so it cannot count as skipped.
            Err(err @ CapabilityError::PartialMerge { .. }) => {
                warn!(primary = %group.primary, error = %err, "group partly merged");
                (GroupStatus::Failed, Some(err.to_string()))
            }
            Err(err) => {
                warn!(primary = %group.primary, error = %err, "group merge failed");
                (GroupStatus::Failed, Some(err.to_string()))
            }
        };
        GroupOutcome {
            group: group.clone(),
            status,
            error,
        }
    }
}
