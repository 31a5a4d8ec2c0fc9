//! # cnn-classifier
//!
//! A staged training pipeline for kidney CT image classification.
//!
//! The pipeline runs four stages in order, each reading its inputs from and
//! writing its outputs to a filesystem artifact area:
//!
//! - **Data ingestion**: download the dataset archive and unpack it
//! - **Base model preparation**: build a backbone, freeze it and attach a
//!   classification head
//! - **Training**: fine-tune on an 80/20 split of the image directory
//! - **Evaluation**: score the trained model and write `scores.json`
//!
//! Settings come from `config/config.yaml` (paths) and `params.yaml`
//! (hyperparameters). Model math sits behind the [`framework::Framework`]
//! trait; [`framework::NdarrayFramework`] is the built-in CPU backend.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cnn_classifier::prelude::*;
//! use std::sync::Arc;
//!
//! let configs = ConfigurationManager::from_default_paths()?;
//! let ctx = StageContext::new(Arc::new(configs), Arc::new(NdarrayFramework::new()))
//!     .with_event_sink(Arc::new(LoggingEventSink::default()));
//!
//! let run = Pipeline::training().run(&ctx).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod config;
pub mod context;
pub mod core;
pub mod data;
pub mod errors;
pub mod events;
pub mod framework;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        ConfigurationManager, DataIngestionConfig, EvaluationConfig, PrepareBaseModelConfig,
        TrainingConfig,
    };
    pub use crate::context::StageContext;
    pub use crate::core::{ArtifactKind, StageArtifact, StageStatus};
    pub use crate::errors::{PipelineError, Result};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::framework::{Framework, Model, NdarrayFramework, Scores};
    pub use crate::observability::{init_logging, LoggingConfig, LoggingGuard};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineRun};
    pub use crate::stages::{
        DataIngestionStage, EvaluationStage, PrepareBaseModelStage, Stage, StageResult,
        TrainingStage,
    };
    pub use crate::utils::iso_timestamp;
}
