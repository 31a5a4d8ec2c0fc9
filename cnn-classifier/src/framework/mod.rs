//! The model framework seam.
//!
//! Stages never touch tensors directly. They ask a [`Framework`] for a
//! backbone, load and save models through it, and hand it batch sources to
//! fit or evaluate. [`NdarrayFramework`] is the built-in CPU implementation.

mod model;
mod ndarray_backend;

pub use model::{
    Activation, CompileConfig, InputShape, Layer, LayerKind, Loss, Model, Moments, OptimizerKind,
    OptimizerState, WeightSource,
};
pub use ndarray_backend::NdarrayFramework;

use crate::data::BatchSource;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;

/// Everything needed to construct a backbone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackboneSpec {
    /// Shape of one input image.
    pub input_shape: InputShape,
    /// Random initialisation or a saved model to reuse.
    pub weights: WeightSource,
    /// Keep the 1000-way classification layer.
    pub include_top: bool,
    /// Seed for random initialisation.
    pub seed: u64,
}

/// Step counts for one call to [`Framework::fit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitOptions {
    /// Number of passes.
    pub epochs: usize,
    /// Training batches per epoch.
    pub steps_per_epoch: usize,
    /// Validation batches per epoch; zero skips validation.
    pub validation_steps: usize,
}

/// Metrics recorded at the end of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Mean training loss.
    pub loss: f64,
    /// Training accuracy.
    pub accuracy: f64,
    /// Mean validation loss, if validation ran.
    pub val_loss: Option<f64>,
    /// Validation accuracy, if validation ran.
    pub val_accuracy: Option<f64>,
}

/// Per-epoch metrics of a fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// One entry per epoch, in order.
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    /// Metrics of the final epoch.
    #[must_use]
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Result of evaluating a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Mean loss.
    pub loss: f64,
    /// Fraction of correct predictions.
    pub accuracy: f64,
}

impl Scores {
    /// Returns true if both values are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite() && self.accuracy.is_finite()
    }
}

/// Model construction, persistence, fitting and evaluation.
pub trait Framework: Send + Sync + Debug {
    /// Returns the framework name.
    fn name(&self) -> &str;

    /// Builds an uncompiled backbone.
    fn backbone(&self, spec: &BackboneSpec) -> Result<Model>;

    /// Loads a saved model; with `compile == false` the compile config and
    /// optimizer state are dropped.
    fn load_model(&self, path: &Path, compile: bool) -> Result<Model>;

    /// Saves a model, including compile config and optimizer state.
    fn save_model(&self, model: &Model, path: &Path) -> Result<()>;

    /// Trains a compiled model in place.
    fn fit(
        &self,
        model: &mut Model,
        train: &mut dyn BatchSource,
        validation: Option<&mut dyn BatchSource>,
        options: &FitOptions,
    ) -> Result<History>;

    /// Evaluates a compiled model over `steps` batches.
    fn evaluate(&self, model: &Model, data: &mut dyn BatchSource, steps: usize) -> Result<Scores>;
}
