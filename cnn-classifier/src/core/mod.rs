//! Core domain types shared by stages and the pipeline.

mod artifact;
mod status;

pub use artifact::{ArtifactKind, StageArtifact};
pub use status::StageStatus;
