use crmsweep_core::PlanHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupeError {
    #[error("invalid match rules: {0}")]
    InvalidRules(String),

    #[error("unknown keep strategy {0:?} (expected oldest, newest or first)")]
    UnknownKeepStrategy(String),

    #[error("malformed duplicate group with primary {primary:?}: {reason}")]
    MalformedGroup { primary: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("apply requires the plan hash returned by the dry run")]
    MissingPlanHash,

    #[error(
        "plan hash mismatch (claimed {claimed}, actual {actual}): the plan changed since the dry run or the hash is stale or wrong; re-run the dry run and approve the fresh hash"
    )]
    PlanHashMismatch { claimed: PlanHash, actual: PlanHash },

    #[error(transparent)]
    Plan(#[from] DedupeError),
}
