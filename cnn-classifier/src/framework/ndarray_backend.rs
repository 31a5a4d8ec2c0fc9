//! CPU framework built on `ndarray`.

use super::model::{
    Activation, CompileConfig, InputShape, Layer, LayerKind, Loss, Model, Moments, OptimizerKind,
};
use super::{BackboneSpec, EpochMetrics, FitOptions, Framework, History, Scores, WeightSource};
use crate::data::{Batch, BatchSource};
use crate::errors::{PipelineError, Result};
use crate::utils::{load_bin, save_bin};
use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use tracing::{debug, info};

const POOL_GRID: usize = 8;
const BACKBONE_UNITS: [usize; 2] = [128, 64];
const TOP_UNITS: usize = 1000;

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-7;
const PROB_EPSILON: f32 = 1e-7;

/// Sequential dense models trained with mini-batch gradient descent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NdarrayFramework;

impl NdarrayFramework {
    /// Creates the framework.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Runs a forward pass and returns the model output.
    pub fn predict(&self, model: &Model, images: &Array2<f32>) -> Result<Array2<f32>> {
        check_input(model, images).map_err(PipelineError::ModelBuild)?;
        let mut activations = forward(model, images);
        Ok(activations.pop().unwrap_or_else(|| images.clone()))
    }

    fn random_backbone(spec: &BackboneSpec) -> Result<Model> {
        let shape = spec.input_shape;
        if shape.features() == 0 {
            return Err(PipelineError::ModelBuild(format!(
                "input shape {shape} has no pixels"
            )));
        }

        let grid_height = POOL_GRID.min(shape.height);
        let grid_width = POOL_GRID.min(shape.width);
        let mut rng = StdRng::seed_from_u64(spec.seed);

        let mut model = Model::new("backbone", shape);
        model.push(Layer::average_pool("block1_pool", shape, grid_height, grid_width))?;
        let mut inputs = model.output_size();
        for (i, units) in BACKBONE_UNITS.into_iter().enumerate() {
            let name = format!("block{}_dense", i + 2);
            model.push(he_dense(name, inputs, units, Activation::Relu, &mut rng))?;
            inputs = units;
        }
        if spec.include_top {
            model.push(he_dense(
                "predictions",
                inputs,
                TOP_UNITS,
                Activation::Softmax,
                &mut rng,
            ))?;
        }
        Ok(model)
    }

    fn backbone_from_file(&self, spec: &BackboneSpec, path: &Path) -> Result<Model> {
        let source = self.load_model(path, false).map_err(|e| {
            PipelineError::ModelBuild(format!(
                "cannot load backbone weights from {}: {e}",
                path.display()
            ))
        })?;
        if source.input_shape != spec.input_shape {
            return Err(PipelineError::ModelBuild(format!(
                "weights in {} expect input {}, configured input is {}",
                path.display(),
                source.input_shape,
                spec.input_shape
            )));
        }

        let mut model = Model::new("backbone", spec.input_shape);
        for mut layer in source.layers {
            let keep = layer.name.starts_with("block")
                || (spec.include_top && layer.name == "predictions");
            if keep {
                layer.trainable = true;
                model.push(layer)?;
            }
        }

        if model.layers.is_empty() {
            return Err(PipelineError::ModelBuild(format!(
                "{} contains no backbone layers",
                path.display()
            )));
        }
        if spec.include_top && !model.layers.iter().any(|l| l.name == "predictions") {
            return Err(PipelineError::ModelBuild(format!(
                "{} has no 'predictions' layer but include_top is set",
                path.display()
            )));
        }
        Ok(model)
    }
}

impl Framework for NdarrayFramework {
    fn name(&self) -> &str {
        "ndarray"
    }

    fn backbone(&self, spec: &BackboneSpec) -> Result<Model> {
        let model = match &spec.weights {
            WeightSource::Random => Self::random_backbone(spec)?,
            WeightSource::File(path) => self.backbone_from_file(spec, path)?,
        };
        debug!(
            layers = model.layers.len(),
            params = model.param_count(),
            include_top = spec.include_top,
            "Built backbone"
        );
        Ok(model)
    }

    fn load_model(&self, path: &Path, compile: bool) -> Result<Model> {
        let bytes = load_bin(path)?;
        let mut model: Model = serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::Serialization(format!("invalid model file {}: {e}", path.display()))
        })?;
        model.validate()?;
        if !compile {
            model.strip_compile();
        }
        Ok(model)
    }

    fn save_model(&self, model: &Model, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(model)?;
        save_bin(bytes, path)
    }

    fn fit(
        &self,
        model: &mut Model,
        train: &mut dyn BatchSource,
        mut validation: Option<&mut dyn BatchSource>,
        options: &FitOptions,
    ) -> Result<History> {
        let compile = model
            .compiled
            .clone()
            .ok_or_else(|| PipelineError::Training("model must be compiled before fit".to_string()))?;
        check_output(model, compile.loss).map_err(PipelineError::Training)?;
        if options.steps_per_epoch == 0 {
            return Err(PipelineError::Training(format!(
                "steps_per_epoch is 0: {} training samples with batch size {}",
                train.samples(),
                train.batch_size()
            )));
        }

        let mut history = History::default();
        for epoch in 1..=options.epochs {
            train.reset();
            let mut loss_sum = 0.0;
            let mut correct = 0;
            let mut seen = 0;

            for _ in 0..options.steps_per_epoch {
                let batch = train.next_batch().map_err(|e| {
                    PipelineError::Training(format!("failed to read training batch: {e}"))
                })?;
                let (batch_loss, batch_correct) =
                    train_step(model, &batch, &compile).map_err(PipelineError::Training)?;
                loss_sum += batch_loss;
                correct += batch_correct;
                seen += batch.len();
            }

            let loss = loss_sum / seen.max(1) as f64;
            let accuracy = correct as f64 / seen.max(1) as f64;
            if !loss.is_finite() {
                return Err(PipelineError::Training(format!(
                    "loss diverged to {loss} in epoch {epoch}"
                )));
            }

            let (val_loss, val_accuracy) = match validation.as_deref_mut() {
                Some(source) if options.validation_steps > 0 => {
                    let scores = score_batches(model, source, options.validation_steps, compile.loss)
                        .map_err(PipelineError::Training)?;
                    (Some(scores.loss), Some(scores.accuracy))
                }
                _ => (None, None),
            };

            info!(
                epoch,
                loss,
                accuracy,
                val_loss = ?val_loss,
                val_accuracy = ?val_accuracy,
                "Epoch {}/{} finished",
                epoch,
                options.epochs
            );
            history.epochs.push(EpochMetrics {
                epoch,
                loss,
                accuracy,
                val_loss,
                val_accuracy,
            });
        }
        Ok(history)
    }

    fn evaluate(&self, model: &Model, data: &mut dyn BatchSource, steps: usize) -> Result<Scores> {
        let compile = model
            .compiled
            .as_ref()
            .ok_or_else(|| PipelineError::Evaluation("model is not compiled".to_string()))?;
        check_output(model, compile.loss).map_err(PipelineError::Evaluation)?;
        score_batches(model, data, steps, compile.loss).map_err(PipelineError::Evaluation)
    }
}

/// Per-layer gradient of a dense layer.
struct Gradient {
    layer: usize,
    weights: Array2<f32>,
    bias: Array1<f32>,
}

fn he_dense(
    name: impl Into<String>,
    inputs: usize,
    units: usize,
    activation: Activation,
    rng: &mut StdRng,
) -> Layer {
    let limit = (6.0 / inputs.max(1) as f32).sqrt();
    let weights = Array2::from_shape_fn((inputs, units), |_| rng.gen_range(-limit..limit));
    Layer::dense(name, weights, Array1::zeros(units), activation)
}

fn check_input(model: &Model, images: &Array2<f32>) -> std::result::Result<(), String> {
    let expected = model.input_shape.features();
    if images.ncols() == expected {
        Ok(())
    } else {
        Err(format!(
            "model '{}' expects {expected} values per image ({}), got {}",
            model.name,
            model.input_shape,
            images.ncols()
        ))
    }
}

fn check_output(model: &Model, loss: Loss) -> std::result::Result<(), String> {
    let expected = loss.output_activation();
    if model.output_activation() != Some(expected) {
        return Err(format!(
            "{loss} needs a final {expected} layer, model '{}' ends with {:?}",
            model.name,
            model.output_activation()
        ));
    }
    if loss == Loss::BinaryCrossentropy && model.output_size() != 1 {
        return Err(format!(
            "{loss} needs a single output unit, model '{}' has {}",
            model.name,
            model.output_size()
        ));
    }
    Ok(())
}

/// Returns the input followed by the output of every layer.
fn forward(model: &Model, input: &Array2<f32>) -> Vec<Array2<f32>> {
    let mut activations = Vec::with_capacity(model.layers.len() + 1);
    activations.push(input.clone());
    for (i, layer) in model.layers.iter().enumerate() {
        let x = &activations[i];
        let out = match &layer.kind {
            LayerKind::AveragePool {
                input,
                grid_height,
                grid_width,
            } => pool_forward(x, *input, *grid_height, *grid_width),
            LayerKind::Dense {
                weights,
                bias,
                activation,
            } => {
                let mut z = x.dot(weights) + bias;
                activate(&mut z, *activation);
                z
            }
        };
        activations.push(out);
    }
    activations
}

fn pool_forward(x: &Array2<f32>, shape: InputShape, grid_height: usize, grid_width: usize) -> Array2<f32> {
    let (h, w, c) = (shape.height, shape.width, shape.channels);
    let mut cell_of = Vec::with_capacity(h * w);
    let mut counts = vec![0_usize; grid_height * grid_width];
    for r in 0..h {
        let gr = r * grid_height / h;
        for col in 0..w {
            let cell = gr * grid_width + col * grid_width / w;
            cell_of.push(cell);
            counts[cell] += 1;
        }
    }
    let scale: Vec<f32> = counts.iter().map(|&n| 1.0 / n.max(1) as f32).collect();

    let mut out = Array2::zeros((x.nrows(), grid_height * grid_width * c));
    for (row, mut target) in x.outer_iter().zip(out.outer_iter_mut()) {
        for (pixel, &cell) in cell_of.iter().enumerate() {
            for ch in 0..c {
                target[cell * c + ch] += row[pixel * c + ch] * scale[cell];
            }
        }
    }
    out
}

fn activate(z: &mut Array2<f32>, activation: Activation) {
    match activation {
        Activation::Linear => {}
        Activation::Relu => z.mapv_inplace(|v| v.max(0.0)),
        Activation::Sigmoid => z.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
        Activation::Softmax => {
            for mut row in z.outer_iter_mut() {
                let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                row.mapv_inplace(|v| (v - max).exp());
                let sum = row.sum();
                row.mapv_inplace(|v| v / sum);
            }
        }
    }
}

/// Gradient through an activation, given the activation's output.
fn activation_backward(grad: &mut Array2<f32>, output: &Array2<f32>, activation: Activation) {
    match activation {
        Activation::Linear => {}
        Activation::Relu => grad.zip_mut_with(output, |g, &a| {
            if a <= 0.0 {
                *g = 0.0;
            }
        }),
        Activation::Sigmoid => grad.zip_mut_with(output, |g, &a| *g *= a * (1.0 - a)),
        Activation::Softmax => {
            for (mut g, a) in grad.outer_iter_mut().zip(output.outer_iter()) {
                let dot = g.dot(&a);
                Zip::from(&mut g).and(&a).for_each(|g, &a| *g = a * (*g - dot));
            }
        }
    }
}

fn label_index(label: f32, units: usize) -> std::result::Result<usize, String> {
    if label.fract() != 0.0 || label < 0.0 || label as usize >= units {
        return Err(format!("label {label} is out of range for {units} outputs"));
    }
    Ok(label as usize)
}

/// Sum of per-sample losses and number of correct predictions.
fn score_output(
    output: &Array2<f32>,
    labels: &Array1<f32>,
    loss: Loss,
) -> std::result::Result<(f64, usize), String> {
    if output.nrows() != labels.len() {
        return Err(format!(
            "{} predictions for {} labels",
            output.nrows(),
            labels.len()
        ));
    }
    let mut loss_sum = 0.0_f64;
    let mut correct = 0;

    for (row, &label) in output.outer_iter().zip(labels.iter()) {
        match loss {
            Loss::BinaryCrossentropy => {
                let target = label_index(label, 2)? as f32;
                let p = row[0].clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
                loss_sum -= f64::from(target * p.ln() + (1.0 - target) * (1.0 - p).ln());
                if (row[0] > 0.5) == (target > 0.5) {
                    correct += 1;
                }
            }
            Loss::SparseCategoricalCrossentropy => {
                let target = label_index(label, row.len())?;
                let p = row[target].clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
                loss_sum -= f64::from(p.ln());
                let predicted = row
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                    .0;
                if predicted == target {
                    correct += 1;
                }
            }
        }
    }
    Ok((loss_sum, correct))
}

/// Gradient of the mean loss with respect to the final pre-activation.
fn output_delta(output: &Array2<f32>, labels: &Array1<f32>, loss: Loss) -> Array2<f32> {
    let batch = output.nrows().max(1) as f32;
    let mut delta = output.clone();
    for (mut row, &label) in delta.outer_iter_mut().zip(labels.iter()) {
        match loss {
            Loss::BinaryCrossentropy => row[0] -= label,
            Loss::SparseCategoricalCrossentropy => row[label as usize] -= 1.0,
        }
    }
    delta / batch
}

fn backward(model: &Model, activations: &[Array2<f32>], mut delta: Array2<f32>) -> Vec<Gradient> {
    let lowest = model
        .layers
        .iter()
        .position(|l| l.trainable && matches!(l.kind, LayerKind::Dense { .. }));
    let Some(lowest) = lowest else {
        return Vec::new();
    };

    let mut gradients = Vec::new();
    for i in (lowest..model.layers.len()).rev() {
        let layer = &model.layers[i];
        let LayerKind::Dense { weights, .. } = &layer.kind else {
            continue;
        };
        if layer.trainable {
            gradients.push(Gradient {
                layer: i,
                weights: activations[i].t().dot(&delta),
                bias: delta.sum_axis(Axis(0)),
            });
        }
        if i > lowest {
            let mut upstream = delta.dot(&weights.t());
            if let Some(activation) = model.layers[i - 1].activation() {
                activation_backward(&mut upstream, &activations[i], activation);
            }
            delta = upstream;
        }
    }
    gradients
}

fn adam_step<D: Dimension>(
    param: &mut Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    lr_t: f32,
) {
    Zip::from(param)
        .and(m)
        .and(v)
        .and(grad)
        .for_each(|p, m, v, &g| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + ADAM_EPSILON);
        });
}

fn apply_gradients(model: &mut Model, gradients: Vec<Gradient>, compile: &CompileConfig) {
    let lr = compile.learning_rate;
    match compile.optimizer {
        OptimizerKind::Sgd => {
            for gradient in gradients {
                if let LayerKind::Dense { weights, bias, .. } = &mut model.layers[gradient.layer].kind {
                    weights.scaled_add(-lr, &gradient.weights);
                    bias.scaled_add(-lr, &gradient.bias);
                }
            }
        }
        OptimizerKind::Adam => {
            let mut state = model.optimizer_state.take().unwrap_or_default();
            state.iterations += 1;
            let t = state.iterations as f32;
            let lr_t = lr * (1.0 - ADAM_BETA2.powf(t)).sqrt() / (1.0 - ADAM_BETA1.powf(t));

            for gradient in gradients {
                let layer = &mut model.layers[gradient.layer];
                let LayerKind::Dense { weights, bias, .. } = &mut layer.kind else {
                    continue;
                };
                let moments = state
                    .moments
                    .entry(layer.name.clone())
                    .or_insert_with(|| Moments::zeros(weights.nrows(), weights.ncols()));
                if moments.m_weights.dim() != weights.dim() {
                    *moments = Moments::zeros(weights.nrows(), weights.ncols());
                }
                adam_step(weights, &mut moments.m_weights, &mut moments.v_weights, &gradient.weights, lr_t);
                adam_step(bias, &mut moments.m_bias, &mut moments.v_bias, &gradient.bias, lr_t);
            }
            model.optimizer_state = Some(state);
        }
    }
}

fn train_step(
    model: &mut Model,
    batch: &Batch,
    compile: &CompileConfig,
) -> std::result::Result<(f64, usize), String> {
    check_input(model, &batch.images)?;
    let activations = forward(model, &batch.images);
    let Some(output) = activations.last() else {
        return Err("model has no output".to_string());
    };
    let (loss_sum, correct) = score_output(output, &batch.labels, compile.loss)?;
    let delta = output_delta(output, &batch.labels, compile.loss);
    let gradients = backward(model, &activations, delta);
    apply_gradients(model, gradients, compile);
    Ok((loss_sum, correct))
}

fn score_batches(
    model: &Model,
    data: &mut dyn BatchSource,
    steps: usize,
    loss: Loss,
) -> std::result::Result<Scores, String> {
    data.reset();
    let mut loss_sum = 0.0;
    let mut correct = 0;
    let mut seen = 0;

    for _ in 0..steps {
        let batch = data
            .next_batch()
            .map_err(|e| format!("failed to read batch: {e}"))?;
        check_input(model, &batch.images)?;
        let activations = forward(model, &batch.images);
        let Some(output) = activations.last() else {
            return Err("model has no output".to_string());
        };
        let (batch_loss, batch_correct) = score_output(output, &batch.labels, loss)?;
        loss_sum += batch_loss;
        correct += batch_correct;
        seen += batch.len();
    }

    if seen == 0 {
        return Err("no samples to evaluate".to_string());
    }
    Ok(Scores {
        loss: loss_sum / seen as f64,
        accuracy: correct as f64 / seen as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticBatches;
    use ndarray::array;
    use tempfile::tempdir;

    fn shape() -> InputShape {
        InputShape::new(2, 2, 1)
    }

    fn spec(include_top: bool) -> BackboneSpec {
        BackboneSpec {
            input_shape: InputShape::new(16, 16, 3),
            weights: WeightSource::Random,
            include_top,
            seed: 42,
        }
    }

    /// Pooling over a 2x2 image is the identity; a zeroed dense head on top.
    fn linear_model(units: usize, activation: Activation, loss: Loss, optimizer: OptimizerKind, lr: f32) -> Model {
        let mut model = Model::new("linear", shape());
        model.push(Layer::average_pool("pool", shape(), 2, 2)).unwrap();
        model
            .push(Layer::dense("head", Array2::zeros((4, units)), Array1::zeros(units), activation))
            .unwrap();
        model.compile(CompileConfig::new(optimizer, lr, loss));
        model
    }

    fn separable_batches() -> StaticBatches {
        StaticBatches::new(vec![Batch {
            images: array![
                [1.0, 0.0, 0.0, 1.0],
                [1.0, 0.0, 0.0, 0.9],
                [0.0, 1.0, 1.0, 0.0],
                [0.0, 0.9, 1.0, 0.0]
            ],
            labels: array![0.0, 0.0, 1.0, 1.0],
        }])
    }

    /// Serves zero images in order and records every batch size it hands out.
    #[derive(Debug)]
    struct SizeRecorder {
        total: usize,
        batch: usize,
        cursor: usize,
        served: Vec<usize>,
    }

    impl SizeRecorder {
        fn new(total: usize, batch: usize) -> Self {
            Self {
                total,
                batch,
                cursor: 0,
                served: Vec::new(),
            }
        }
    }

    impl BatchSource for SizeRecorder {
        fn next_batch(&mut self) -> Result<Batch> {
            let end = (self.cursor + self.batch).min(self.total);
            let len = end - self.cursor;
            self.cursor = if end >= self.total { 0 } else { end };
            self.served.push(len);
            Ok(Batch {
                images: Array2::zeros((len, 4)),
                labels: Array1::zeros(len),
            })
        }

        fn samples(&self) -> usize {
            self.total
        }

        fn batch_size(&self) -> usize {
            self.batch
        }

        fn reset(&mut self) {
            self.cursor = 0;
        }
    }

    fn fit_options(epochs: usize) -> FitOptions {
        FitOptions {
            epochs,
            steps_per_epoch: 1,
            validation_steps: 1,
        }
    }

    #[test]
    fn test_backbone_layers_and_shapes() {
        let framework = NdarrayFramework::new();
        let model = framework.backbone(&spec(false)).unwrap();

        let names: Vec<_> = model.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["block1_pool", "block2_dense", "block3_dense"]);
        assert_eq!(model.output_shape(), vec![None, Some(64)]);

        let with_top = framework.backbone(&spec(true)).unwrap();
        assert_eq!(with_top.output_shape(), vec![None, Some(1000)]);
        assert_eq!(with_top.output_activation(), Some(Activation::Softmax));
    }

    #[test]
    fn test_backbone_is_seeded() {
        let framework = NdarrayFramework::new();
        let a = framework.backbone(&spec(false)).unwrap();
        let b = framework.backbone(&spec(false)).unwrap();
        assert_eq!(a, b);

        let other = framework
            .backbone(&BackboneSpec { seed: 7, ..spec(false) })
            .unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_pool_grid_clamped_to_small_images() {
        let framework = NdarrayFramework::new();
        let model = framework
            .backbone(&BackboneSpec {
                input_shape: InputShape::new(4, 4, 3),
                ..spec(false)
            })
            .unwrap();
        assert_eq!(model.layers[0].output_size(), 4 * 4 * 3);
    }

    #[test]
    fn test_pool_averages_cells() {
        let image_shape = InputShape::new(4, 4, 1);
        let mut model = Model::new("pool", image_shape);
        model.push(Layer::average_pool("pool", image_shape, 2, 2)).unwrap();

        let images = Array2::from_shape_fn((1, 16), |(_, i)| i as f32);
        let out = NdarrayFramework::new().predict(&model, &images).unwrap();
        assert_eq!(out.row(0).to_vec(), vec![2.5, 4.5, 10.5, 12.5]);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.1);
        let err = NdarrayFramework::new()
            .predict(&model, &Array2::zeros((1, 5)))
            .unwrap_err();
        assert_eq!(err.kind(), "ModelBuildError");
    }

    #[test]
    fn test_sgd_fit_learns_separable_data() {
        let framework = NdarrayFramework::new();
        let mut model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.5);
        let mut train = separable_batches();
        let mut valid = separable_batches();

        let history = framework
            .fit(&mut model, &mut train, Some(&mut valid as &mut dyn BatchSource), &fit_options(30))
            .unwrap();

        assert_eq!(history.epochs.len(), 30);
        let first = &history.epochs[0];
        let last = history.last().unwrap();
        assert!((first.loss - 2.0_f64.ln()).abs() < 1e-4);
        assert!(last.loss < first.loss);
        assert_eq!(last.val_accuracy, Some(1.0));
    }

    #[test]
    fn test_each_epoch_starts_a_fresh_pass() {
        let framework = NdarrayFramework::new();
        let mut model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.1);
        let mut train = SizeRecorder::new(18, 4);
        let mut valid = SizeRecorder::new(4, 3);
        let options = FitOptions {
            epochs: 3,
            steps_per_epoch: 4,
            validation_steps: 1,
        };

        framework
            .fit(&mut model, &mut train, Some(&mut valid as &mut dyn BatchSource), &options)
            .unwrap();

        assert_eq!(train.served, vec![4; 12]);
        assert_eq!(valid.served, vec![3, 3, 3]);
    }

    #[test]
    fn test_evaluate_starts_from_first_batch() {
        let framework = NdarrayFramework::new();
        let model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.1);
        let mut data = SizeRecorder::new(5, 2);
        data.next_batch().unwrap();

        framework.evaluate(&model, &mut data, 3).unwrap();

        assert_eq!(data.served, vec![2, 2, 2, 1]);
    }

    #[test]
    fn test_adam_fit_tracks_iterations() {
        let framework = NdarrayFramework::new();
        let mut model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Adam, 0.05);
        let mut train = separable_batches();

        let history = framework
            .fit(&mut model, &mut train, None, &fit_options(10))
            .unwrap();

        assert!(history.last().unwrap().loss < history.epochs[0].loss);
        assert!(history.last().unwrap().val_loss.is_none());
        let state = model.optimizer_state.as_ref().unwrap();
        assert_eq!(state.iterations, 10);
        assert!(state.moments.contains_key("head"));
    }

    #[test]
    fn test_binary_fit() {
        let framework = NdarrayFramework::new();
        let mut model = linear_model(1, Activation::Sigmoid, Loss::BinaryCrossentropy, OptimizerKind::Sgd, 0.5);
        let mut train = separable_batches();

        let history = framework
            .fit(&mut model, &mut train, None, &fit_options(20))
            .unwrap();
        assert!(history.last().unwrap().loss < history.epochs[0].loss);
        assert!((history.last().unwrap().accuracy - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frozen_layers_are_not_updated() {
        let framework = NdarrayFramework::new();
        let mut model = Model::new("two", shape());
        model.push(Layer::average_pool("pool", shape(), 2, 2)).unwrap();
        model
            .push(Layer::dense("hidden", Array2::from_elem((4, 3), 0.5), Array1::zeros(3), Activation::Relu))
            .unwrap();
        model
            .push(Layer::dense("head", Array2::zeros((3, 2)), Array1::zeros(2), Activation::Softmax))
            .unwrap();
        model.freeze(Some(2));
        model.compile(CompileConfig::new(OptimizerKind::Sgd, 0.1, Loss::SparseCategoricalCrossentropy));
        let before = model.clone();

        framework
            .fit(&mut model, &mut separable_batches(), None, &fit_options(3))
            .unwrap();

        assert_eq!(model.layers[1], before.layers[1]);
        assert_ne!(model.layers[2], before.layers[2]);
    }

    #[test]
    fn test_fit_rejects_mismatched_loss() {
        let framework = NdarrayFramework::new();
        let mut model = linear_model(2, Activation::Softmax, Loss::BinaryCrossentropy, OptimizerKind::Sgd, 0.1);
        let err = framework
            .fit(&mut model, &mut separable_batches(), None, &fit_options(1))
            .unwrap_err();
        assert_eq!(err.kind(), "TrainingError");
    }

    #[test]
    fn test_fit_rejects_zero_steps() {
        let framework = NdarrayFramework::new();
        let mut model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.1);
        let options = FitOptions {
            epochs: 1,
            steps_per_epoch: 0,
            validation_steps: 0,
        };
        let err = framework
            .fit(&mut model, &mut separable_batches(), None, &options)
            .unwrap_err();
        assert!(err.to_string().contains("steps_per_epoch is 0"));
    }

    #[test]
    fn test_fit_rejects_out_of_range_labels() {
        let framework = NdarrayFramework::new();
        let mut model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.1);
        let mut data = StaticBatches::new(vec![Batch {
            images: Array2::zeros((1, 4)),
            labels: array![5.0],
        }]);
        let err = framework
            .fit(&mut model, &mut data, None, &fit_options(1))
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_evaluate_requires_compiled_model() {
        let framework = NdarrayFramework::new();
        let mut model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.1);
        model.strip_compile();
        let err = framework
            .evaluate(&model, &mut separable_batches(), 1)
            .unwrap_err();
        assert_eq!(err.kind(), "EvaluationError");
    }

    #[test]
    fn test_evaluate_untrained_model() {
        let framework = NdarrayFramework::new();
        let model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.1);
        let scores = framework
            .evaluate(&model, &mut separable_batches(), 1)
            .unwrap();
        assert!(scores.is_finite());
        assert!((scores.loss - 2.0_f64.ln()).abs() < 1e-4);
    }

    #[test]
    fn test_evaluate_zero_steps_is_error() {
        let framework = NdarrayFramework::new();
        let model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Sgd, 0.1);
        let err = framework
            .evaluate(&model, &mut separable_batches(), 0)
            .unwrap_err();
        assert!(err.to_string().contains("no samples"));
    }

    #[test]
    fn test_save_and_load_strips_compile_on_request() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models/model.json");
        let framework = NdarrayFramework::new();
        let mut model = linear_model(2, Activation::Softmax, Loss::SparseCategoricalCrossentropy, OptimizerKind::Adam, 0.01);
        framework
            .fit(&mut model, &mut separable_batches(), None, &fit_options(2))
            .unwrap();

        framework.save_model(&model, &path).unwrap();

        let compiled = framework.load_model(&path, true).unwrap();
        assert_eq!(compiled, model);

        let bare = framework.load_model(&path, false).unwrap();
        assert!(bare.compiled.is_none());
        assert!(bare.optimizer_state.is_none());
        assert_eq!(bare.layers, model.layers);
    }

    #[test]
    fn test_load_missing_model_is_not_found() {
        let dir = tempdir().unwrap();
        let err = NdarrayFramework::new()
            .load_model(&dir.path().join("absent.json"), true)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_backbone_from_weights_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.json");
        let framework = NdarrayFramework::new();

        let source = framework.backbone(&spec(true)).unwrap();
        framework.save_model(&source, &path).unwrap();

        let reused = framework
            .backbone(&BackboneSpec {
                weights: WeightSource::File(path.clone()),
                ..spec(false)
            })
            .unwrap();
        assert_eq!(reused.layers.len(), 3);
        assert_eq!(reused.layers[1], source.layers[1]);

        let err = framework
            .backbone(&BackboneSpec {
                input_shape: InputShape::new(8, 8, 3),
                weights: WeightSource::File(path),
                ..spec(false)
            })
            .unwrap_err();
        assert_eq!(err.kind(), "ModelBuildError");
    }

    #[test]
    fn test_backbone_from_missing_weights_is_model_build_error() {
        let err = NdarrayFramework::new()
            .backbone(&BackboneSpec {
                weights: WeightSource::File("does/not/exist.json".into()),
                ..spec(false)
            })
            .unwrap_err();
        assert_eq!(err.kind(), "ModelBuildError");
    }
}
