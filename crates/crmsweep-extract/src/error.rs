use crmsweep_core::{CoreError, DateRange};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(
        "no sortable timestamp property (got {0:?}): windowed extraction needs a present, sortable timestamp; fall back to a full export"
    )]
    NoSortableTimestamp(String),

    #[error("authentication failure while extracting {range}: {message}")]
    AuthFailure { range: DateRange, message: String },

    #[error("invalid extraction config: {0}")]
    InvalidConfig(String),

    #[error("leaf worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
