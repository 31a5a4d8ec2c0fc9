//! Pipeline building and execution.
//!
//! A [`Pipeline`] runs its stages strictly in order and stops at the first
//! failure. Stages share nothing but the [`StageContext`](crate::context::StageContext)
//! and the artifacts they leave on disk.

mod builder;
mod executor;


pub use builder::PipelineBuilder;
pub use executor::{Pipeline, PipelineRun, TRAINING_PIPELINE};
