//! Output layer: records and plans returned inline or written as artifacts.

mod artifacts;
mod csv;
mod error;
mod plan_file;

pub use artifacts::{ArtifactRef, ArtifactStore, OutputFormat, Payload};
pub use error::StoreError;
pub use plan_file::{PlanFile, load_plan, save_plan};
