//! Extraction layer: window splitting, rate-gated range queries, and the leaf worker pool.

pub mod client;
pub mod config;
mod error;
pub mod engine;
pub mod gate;
pub mod retry;
pub mod splitter;

pub use client::{RangeQueryClient, WindowQuery};
pub use config::ExtractConfig;
pub use engine::{ExtractRequest, ExtractionEngine};
pub use error::ExtractError;
pub use gate::RateGate;
pub use retry::{CallError, RetryPolicy};
pub use splitter::{Leaf, RangeProbe, SplitOutcome, WindowSplitter};

pub use tokio_util::sync::CancellationToken;
