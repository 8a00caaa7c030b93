pub mod capability;
pub mod digest;
pub mod error;
pub mod filter;
pub mod merge;
pub mod normalize;
pub mod range;
pub mod record;

pub use capability::{
    CapabilityError, MutationCapability, SearchCapability, SearchPage, SearchRequest,
    SortDirection,
};
pub use digest::sha256_tagged;
pub use error::CoreError;
pub use filter::{Filter, FilterOp};
pub use merge::{
    ApplyResult, Confidence, DuplicateGroup, GroupOutcome, GroupStatus, MergePlan, PlanHash,
};
pub use normalize::{normalize_email, normalize_text};
pub use range::DateRange;
pub use record::{
    ExtractionReport, ExtractionStatus, IncompleteRange, IncompleteReason, Record, WindowResult,
};
