//! Image-directory data generators.
//!
//! A dataset is a directory with one subdirectory per class. Generators split
//! each class into training and validation subsets, load and resize images,
//! and yield batches of flattened pixels with integer labels.

mod augment;
mod generator;

pub use augment::AugmentationPolicy;
pub use generator::{
    ColorMode, DirectoryIterator, FlowOptions, ImageDataGenerator, Subset,
    ALLOWED_EXTENSIONS,
};

use crate::errors::Result;
use ndarray::{Array1, Array2};

/// One batch of flattened images and their labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `(batch, height * width * channels)`, row-major pixels, channel last.
    pub images: Array2<f32>,
    /// One label per row.
    pub labels: Array1<f32>,
}

impl Batch {
    /// Number of samples in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns true if the batch holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Anything that can feed batches to a fit or evaluate loop.
pub trait BatchSource: Send {
    /// Returns the next batch, wrapping around at the end of an epoch.
    fn next_batch(&mut self) -> Result<Batch>;

    /// Number of samples in one epoch.
    fn samples(&self) -> usize;

    /// Nominal batch size.
    fn batch_size(&self) -> usize;

    /// Starts a new epoch. The next batch is the first of a fresh pass,
    /// reshuffled if the source shuffles.
    fn reset(&mut self);
}

/// Number of full batches in `samples`; the remainder is dropped.
#[must_use]
pub const fn steps_for(samples: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        samples / batch_size
    }
}
