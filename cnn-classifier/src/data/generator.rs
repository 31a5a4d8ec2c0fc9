//! Directory-backed image generators.

use super::augment::AugmentationPolicy;
use super::{Batch, BatchSource};
use crate::errors::{PipelineError, Result};
use crate::framework::InputShape;
use image::imageops::{self, FilterType};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// File extensions picked up as images (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Which part of each class a generator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subset {
    /// The files after the validation split.
    Training,
    /// The leading `validation_split` fraction of files.
    Validation,
}

/// Channel layout images are converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Three channels.
    Rgb,
    /// One channel.
    Grayscale,
}

impl ColorMode {
    /// Picks the color mode for a channel count.
    #[must_use]
    pub const fn for_channels(channels: usize) -> Self {
        if channels == 1 {
            Self::Grayscale
        } else {
            Self::Rgb
        }
    }

    /// Number of channels this mode produces.
    #[must_use]
    pub const fn channels(&self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Grayscale => 1,
        }
    }
}

/// Options for [`ImageDataGenerator::flow_from_directory`].
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOptions {
    /// `(height, width)` images are resized to (bilinear).
    pub target_size: (usize, usize),
    /// Channel layout.
    pub color_mode: ColorMode,
    /// Images per batch.
    pub batch_size: usize,
    /// Which split to read; `None` reads everything.
    pub subset: Option<Subset>,
    /// Reshuffle at the start of every epoch.
    pub shuffle: bool,
    /// Seed for shuffling and augmentation.
    pub seed: Option<u64>,
}

impl FlowOptions {
    /// Options for images of `shape`, shuffled.
    #[must_use]
    pub const fn new(shape: InputShape, batch_size: usize) -> Self {
        Self {
            target_size: (shape.height, shape.width),
            color_mode: ColorMode::for_channels(shape.channels),
            batch_size,
            subset: None,
            shuffle: true,
            seed: None,
        }
    }

    /// Sets the subset.
    #[must_use]
    pub const fn with_subset(mut self, subset: Subset) -> Self {
        self.subset = Some(subset);
        self
    }

    /// Enables or disables shuffling.
    #[must_use]
    pub const fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Sets the seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn image_shape(&self) -> InputShape {
        InputShape::new(
            self.target_size.0,
            self.target_size.1,
            self.color_mode.channels(),
        )
    }
}

/// Preprocessing shared by every iterator it creates.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDataGenerator {
    rescale: f32,
    validation_split: f64,
    augmentation: Option<AugmentationPolicy>,
}

impl ImageDataGenerator {
    /// Creates a generator that multiplies pixels by `rescale` and reserves
    /// `validation_split` of each class for validation.
    #[must_use]
    pub const fn new(rescale: f32, validation_split: f64) -> Self {
        Self {
            rescale,
            validation_split,
            augmentation: None,
        }
    }

    /// Applies `policy` to every image this generator yields.
    #[must_use]
    pub const fn with_augmentation(mut self, policy: AugmentationPolicy) -> Self {
        self.augmentation = Some(policy);
        self
    }

    /// Indexes `directory` (one subdirectory per class) and returns an
    /// iterator over the requested subset.
    pub fn flow_from_directory(
        &self,
        directory: impl AsRef<Path>,
        options: FlowOptions,
    ) -> Result<DirectoryIterator> {
        let directory = directory.as_ref();

        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(PipelineError::Dataset(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if options.subset.is_some() && self.validation_split == 0.0 {
            return Err(PipelineError::Dataset(
                "a subset was requested but validation_split is 0".to_string(),
            ));
        }
        if options.batch_size == 0 {
            return Err(PipelineError::Dataset("batch_size must be greater than zero".to_string()));
        }

        let classes = list_classes(directory)?;
        if classes.is_empty() {
            return Err(PipelineError::Dataset(format!(
                "no class subdirectories found in {}",
                directory.display()
            )));
        }

        let mut filepaths = Vec::new();
        let mut labels = Vec::new();
        let mut class_indices = BTreeMap::new();

        for (index, class_name) in classes.iter().enumerate() {
            class_indices.insert(class_name.clone(), index);
            let files = list_images(&directory.join(class_name))?;
            let split_at = (self.validation_split * files.len() as f64) as usize;
            let selected = match options.subset {
                Some(Subset::Validation) => &files[..split_at],
                Some(Subset::Training) => &files[split_at..],
                None => &files[..],
            };
            debug!(class = %class_name, total = files.len(), selected = selected.len(), "Indexed class");
            filepaths.extend_from_slice(selected);
            labels.extend(std::iter::repeat(index).take(selected.len()));
        }

        info!(
            "Found {} images belonging to {} classes.",
            filepaths.len(),
            classes.len()
        );

        let rng = options
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let order = (0..filepaths.len()).collect();

        Ok(DirectoryIterator {
            image_shape: options.image_shape(),
            filepaths,
            labels,
            class_indices,
            options,
            rescale: self.rescale,
            augmentation: self.augmentation,
            rng,
            order,
            cursor: 0,
        })
    }
}

/// Batches of images read from a class-per-directory tree.
#[derive(Debug)]
pub struct DirectoryIterator {
    filepaths: Vec<PathBuf>,
    labels: Vec<usize>,
    class_indices: BTreeMap<String, usize>,
    image_shape: InputShape,
    options: FlowOptions,
    rescale: f32,
    augmentation: Option<AugmentationPolicy>,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl DirectoryIterator {
    /// Class name to label index, in sorted name order.
    #[must_use]
    pub const fn class_indices(&self) -> &BTreeMap<String, usize> {
        &self.class_indices
    }

    /// Number of classes.
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.class_indices.len()
    }

    /// Paths of every image in this subset, in index order.
    #[must_use]
    pub fn filenames(&self) -> &[PathBuf] {
        &self.filepaths
    }

    /// Label of every image in this subset, in index order.
    #[must_use]
    pub fn classes(&self) -> &[usize] {
        &self.labels
    }

    /// Shape of one yielded image.
    #[must_use]
    pub const fn image_shape(&self) -> InputShape {
        self.image_shape
    }

    /// Batches in one pass, counting a trailing partial batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filepaths.len().div_ceil(self.options.batch_size)
    }

    /// Returns true if the subset holds no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filepaths.is_empty()
    }
}

impl BatchSource for DirectoryIterator {
    fn next_batch(&mut self) -> Result<Batch> {
        let total = self.filepaths.len();
        if total == 0 {
            return Err(PipelineError::Dataset("no images available in this subset".to_string()));
        }

        if self.cursor == 0 {
            self.order = (0..total).collect();
            if self.options.shuffle {
                self.order.shuffle(&mut self.rng);
            }
        }

        let end = (self.cursor + self.options.batch_size).min(total);
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = if end >= total { 0 } else { end };

        let features = self.image_shape.features();
        let mut images = Array2::zeros((indices.len(), features));
        let mut labels = Array1::zeros(indices.len());

        for (row, &index) in indices.iter().enumerate() {
            let mut pixels = load_image(&self.filepaths[index], self.image_shape, self.options.color_mode)?;
            if let Some(policy) = &self.augmentation {
                pixels = policy.apply(&pixels, self.image_shape, &mut self.rng);
            }
            for value in &mut pixels {
                *value *= self.rescale;
            }
            images.row_mut(row).assign(&ArrayView1::from(&pixels[..]));
            labels[row] = self.labels[index] as f32;
        }

        Ok(Batch { images, labels })
    }

    fn samples(&self) -> usize {
        self.filepaths.len()
    }

    fn batch_size(&self) -> usize {
        self.options.batch_size
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

fn list_classes(directory: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(directory).map_err(|e| PipelineError::io(directory, e))?;
    let mut classes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(directory, e))?;
        if entry.path().is_dir() {
            classes.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    classes.sort();
    Ok(classes)
}

fn list_images(class_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(class_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            PipelineError::Dataset(format!("failed to walk {}: {e}", class_dir.display()))
        })?;
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}

fn load_image(path: &Path, shape: InputShape, color_mode: ColorMode) -> Result<Vec<f32>> {
    let img = image::open(path)
        .map_err(|e| PipelineError::Dataset(format!("failed to decode {}: {e}", path.display())))?;
    let (width, height) = (shape.width as u32, shape.height as u32);

    let raw = match color_mode {
        ColorMode::Rgb => {
            let rgb = img.to_rgb8();
            if rgb.dimensions() == (width, height) {
                rgb.into_raw()
            } else {
                imageops::resize(&rgb, width, height, FilterType::Triangle).into_raw()
            }
        }
        ColorMode::Grayscale => {
            let luma = img.to_luma8();
            if luma.dimensions() == (width, height) {
                luma.into_raw()
            } else {
                imageops::resize(&luma, width, height, FilterType::Triangle).into_raw()
            }
        }
    };
    Ok(raw.into_iter().map(f32::from).collect())
}
