//! Deduplication: find duplicate groups, turn them into a hashed merge plan,
//! and apply the plan only when the caller echoes the hash back.

pub mod apply;
pub mod detector;
mod error;
pub mod plan;
pub mod rules;
mod union_find;

pub use apply::{ApplyController, ApplyOutcome, ApplyRequest};
pub use detector::DuplicateDetector;
pub use error::{ApplyError, DedupeError};
pub use plan::{build_plan, plan_hash};
pub use rules::{DEFAULT_MAX_BUCKET_SIZE, KeepStrategy, MatchRules};
