//! Serializable model description shared by every framework implementation.

use crate::errors::{PipelineError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Height, width and channel count of a model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputShape {
    /// Image height in pixels.
    pub height: usize,
    /// Image width in pixels.
    pub width: usize,
    /// 1 for grayscale, 3 for RGB.
    pub channels: usize,
}

impl InputShape {
    /// Creates a new input shape.
    #[must_use]
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Length of one flattened image.
    #[must_use]
    pub const fn features(&self) -> usize {
        self.height * self.width * self.channels
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Where backbone weights come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// Seeded random initialisation.
    Random,
    /// A previously saved model whose backbone layers are reused.
    File(PathBuf),
}

impl WeightSource {
    /// Parses the `WEIGHTS` parameter. `none` (or empty) means random.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "none" | "None" | "null" => Self::Random,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

/// Optimizer used by a compiled model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Plain stochastic gradient descent.
    #[default]
    Sgd,
    /// Adam with default betas.
    Adam,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sgd => write!(f, "sgd"),
            Self::Adam => write!(f, "adam"),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sgd" => Ok(Self::Sgd),
            "adam" => Ok(Self::Adam),
            other => Err(format!("unknown optimizer '{other}', expected 'sgd' or 'adam'")),
        }
    }
}

/// Element-wise activation applied after a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Identity.
    Linear,
    /// max(0, x).
    Relu,
    /// Logistic sigmoid.
    Sigmoid,
    /// Row-wise softmax.
    Softmax,
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Relu => write!(f, "relu"),
            Self::Sigmoid => write!(f, "sigmoid"),
            Self::Softmax => write!(f, "softmax"),
        }
    }
}

/// Training objective of a compiled model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Single sigmoid unit against 0/1 labels.
    BinaryCrossentropy,
    /// Softmax over classes against integer labels.
    SparseCategoricalCrossentropy,
}

impl Loss {
    /// Picks the loss from a model output shape.
    ///
    /// A final dimension of exactly one unit means binary; everything else
    /// is treated as multi-class with integer labels.
    #[must_use]
    pub fn for_output_shape(shape: &[Option<usize>]) -> Self {
        if shape.len() >= 2 && shape.last() == Some(&Some(1)) {
            Self::BinaryCrossentropy
        } else {
            Self::SparseCategoricalCrossentropy
        }
    }

    /// The output activation this loss expects.
    #[must_use]
    pub const fn output_activation(&self) -> Activation {
        match self {
            Self::BinaryCrossentropy => Activation::Sigmoid,
            Self::SparseCategoricalCrossentropy => Activation::Softmax,
        }
    }

    /// Name used in logs and saved models.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::BinaryCrossentropy => "binary_crossentropy",
            Self::SparseCategoricalCrossentropy => "sparse_categorical_crossentropy",
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Optimizer, learning rate, loss and metrics of a compiled model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Optimizer kind.
    pub optimizer: OptimizerKind,
    /// Step size.
    pub learning_rate: f32,
    /// Objective.
    pub loss: Loss,
    /// Reported metrics.
    pub metrics: Vec<String>,
}

impl CompileConfig {
    /// Creates a compile config reporting accuracy.
    #[must_use]
    pub fn new(optimizer: OptimizerKind, learning_rate: f32, loss: Loss) -> Self {
        Self {
            optimizer,
            learning_rate,
            loss,
            metrics: vec!["accuracy".to_string()],
        }
    }
}

/// The computation a layer performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Averages each cell of a `grid_height x grid_width` grid, per channel.
    AveragePool {
        /// Shape of the image this layer reads.
        input: InputShape,
        /// Rows of the output grid.
        grid_height: usize,
        /// Columns of the output grid.
        grid_width: usize,
    },
    /// Fully connected layer, `weights` is `(inputs, units)`.
    Dense {
        /// Weight matrix.
        weights: Array2<f32>,
        /// Bias vector.
        bias: Array1<f32>,
        /// Activation applied to the output.
        activation: Activation,
    },
}

/// A named layer with a trainable flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Unique layer name.
    pub name: String,
    /// Whether fit may update this layer.
    pub trainable: bool,
    /// What the layer computes.
    pub kind: LayerKind,
}

impl Layer {
    /// Creates a trainable dense layer.
    #[must_use]
    pub fn dense(
        name: impl Into<String>,
        weights: Array2<f32>,
        bias: Array1<f32>,
        activation: Activation,
    ) -> Self {
        Self {
            name: name.into(),
            trainable: true,
            kind: LayerKind::Dense {
                weights,
                bias,
                activation,
            },
        }
    }

    /// Creates a grid pooling layer.
    #[must_use]
    pub fn average_pool(
        name: impl Into<String>,
        input: InputShape,
        grid_height: usize,
        grid_width: usize,
    ) -> Self {
        Self {
            name: name.into(),
            trainable: true,
            kind: LayerKind::AveragePool {
                input,
                grid_height,
                grid_width,
            },
        }
    }

    /// Number of values this layer expects per sample.
    #[must_use]
    pub fn input_size(&self) -> usize {
        match &self.kind {
            LayerKind::AveragePool { input, .. } => input.features(),
            LayerKind::Dense { weights, .. } => weights.nrows(),
        }
    }

    /// Number of values this layer produces per sample.
    #[must_use]
    pub fn output_size(&self) -> usize {
        match &self.kind {
            LayerKind::AveragePool {
                input,
                grid_height,
                grid_width,
            } => grid_height * grid_width * input.channels,
            LayerKind::Dense { weights, .. } => weights.ncols(),
        }
    }

    /// Number of learnable parameters.
    #[must_use]
    pub fn param_count(&self) -> usize {
        match &self.kind {
            LayerKind::AveragePool { .. } => 0,
            LayerKind::Dense { weights, bias, .. } => weights.len() + bias.len(),
        }
    }

    /// Returns the activation of a dense layer.
    #[must_use]
    pub const fn activation(&self) -> Option<Activation> {
        match &self.kind {
            LayerKind::Dense { activation, .. } => Some(*activation),
            LayerKind::AveragePool { .. } => None,
        }
    }
}

/// First and second moment estimates for one dense layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    /// First moment of the weights.
    pub m_weights: Array2<f32>,
    /// Second moment of the weights.
    pub v_weights: Array2<f32>,
    /// First moment of the bias.
    pub m_bias: Array1<f32>,
    /// Second moment of the bias.
    pub v_bias: Array1<f32>,
}

impl Moments {
    /// Zeroed moments for a `(inputs, units)` layer.
    #[must_use]
    pub fn zeros(inputs: usize, units: usize) -> Self {
        Self {
            m_weights: Array2::zeros((inputs, units)),
            v_weights: Array2::zeros((inputs, units)),
            m_bias: Array1::zeros(units),
            v_bias: Array1::zeros(units),
        }
    }
}

/// Persistent optimizer state, keyed by layer name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Number of update steps taken.
    pub iterations: u64,
    /// Adam moments per dense layer.
    #[serde(default)]
    pub moments: BTreeMap<String, Moments>,
}

/// A sequential model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model name.
    pub name: String,
    /// Shape of one input image.
    pub input_shape: InputShape,
    /// Layers in execution order.
    pub layers: Vec<Layer>,
    /// Present once the model is compiled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled: Option<CompileConfig>,
    /// Present once the model has been fitted with a stateful optimizer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer_state: Option<OptimizerState>,
}

impl Model {
    /// Creates an empty model.
    #[must_use]
    pub fn new(name: impl Into<String>, input_shape: InputShape) -> Self {
        Self {
            name: name.into(),
            input_shape,
            layers: Vec::new(),
            compiled: None,
            optimizer_state: None,
        }
    }

    /// Appends a layer after checking it fits the current output.
    pub fn push(&mut self, layer: Layer) -> Result<()> {
        if let LayerKind::AveragePool { input, .. } = &layer.kind {
            if !self.layers.is_empty() || *input != self.input_shape {
                return Err(PipelineError::ModelBuild(format!(
                    "pooling layer '{}' must be the first layer and read {}",
                    layer.name, self.input_shape
                )));
            }
        }
        if layer.input_size() != self.output_size() {
            return Err(PipelineError::ModelBuild(format!(
                "layer '{}' expects {} inputs but the model produces {}",
                layer.name,
                layer.input_size(),
                self.output_size()
            )));
        }
        if self.layers.iter().any(|l| l.name == layer.name) {
            return Err(PipelineError::ModelBuild(format!(
                "duplicate layer name '{}'",
                layer.name
            )));
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Checks that every layer fits the one before it.
    pub fn validate(&self) -> Result<()> {
        let mut rebuilt = Self::new(self.name.clone(), self.input_shape);
        for layer in &self.layers {
            rebuilt.push(layer.clone())?;
        }
        Ok(())
    }

    /// Values produced per sample.
    #[must_use]
    pub fn output_size(&self) -> usize {
        self.layers
            .last()
            .map_or_else(|| self.input_shape.features(), Layer::output_size)
    }

    /// Output shape with an unknown batch dimension, e.g. `[None, Some(5)]`.
    #[must_use]
    pub fn output_shape(&self) -> Vec<Option<usize>> {
        vec![None, Some(self.output_size())]
    }

    /// Activation of the final layer, if it is dense.
    #[must_use]
    pub fn output_activation(&self) -> Option<Activation> {
        self.layers.last().and_then(Layer::activation)
    }

    /// Attaches a compile config and resets optimizer state.
    pub fn compile(&mut self, config: CompileConfig) {
        self.compiled = Some(config);
        self.optimizer_state = None;
    }

    /// Drops the compile config and any optimizer state.
    pub fn strip_compile(&mut self) {
        self.compiled = None;
        self.optimizer_state = None;
    }

    /// Freezes every layer, or only the first `till` of them.
    pub fn freeze(&mut self, till: Option<usize>) {
        let count = till.map_or(self.layers.len(), |k| k.min(self.layers.len()));
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.trainable = i >= count;
        }
    }

    /// Total learnable parameters.
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// Learnable parameters in trainable layers.
    #[must_use]
    pub fn trainable_param_count(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.trainable)
            .map(Layer::param_count)
            .sum()
    }

    /// A short table of layers, parameters and trainable flags.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!("Model: \"{}\" (input {})\n", self.name, self.input_shape);
        for layer in &self.layers {
            let kind = match &layer.kind {
                LayerKind::AveragePool { .. } => "AveragePool".to_string(),
                LayerKind::Dense { activation, .. } => format!("Dense[{activation}]"),
            };
            out.push_str(&format!(
                "  {:<16} {:<18} out={:<6} params={:<8} trainable={}\n",
                layer.name,
                kind,
                layer.output_size(),
                layer.param_count(),
                layer.trainable
            ));
        }
        out.push_str(&format!(
            "Total params: {} (trainable: {})",
            self.param_count(),
            self.trainable_param_count()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense(name: &str, inputs: usize, units: usize, activation: Activation) -> Layer {
        Layer::dense(
            name,
            Array2::zeros((inputs, units)),
            Array1::zeros(units),
            activation,
        )
    }

    fn small_model() -> Model {
        let shape = InputShape::new(4, 4, 3);
        let mut model = Model::new("test", shape);
        model.push(Layer::average_pool("pool", shape, 2, 2)).unwrap();
        model.push(dense("hidden", 12, 6, Activation::Relu)).unwrap();
        model.push(dense("out", 6, 5, Activation::Softmax)).unwrap();
        model
    }

    #[test]
    fn test_loss_for_single_unit_output_is_binary() {
        assert_eq!(
            Loss::for_output_shape(&[None, Some(1)]),
            Loss::BinaryCrossentropy
        );
    }

    #[test]
    fn test_loss_for_multi_unit_output_is_sparse() {
        assert_eq!(
            Loss::for_output_shape(&[None, Some(5)]),
            Loss::SparseCategoricalCrossentropy
        );
        // a bare vector shape never counts as binary
        assert_eq!(
            Loss::for_output_shape(&[Some(1)]),
            Loss::SparseCategoricalCrossentropy
        );
    }

    #[test]
    fn test_push_rejects_size_mismatch() {
        let mut model = small_model();
        let err = model.push(dense("bad", 7, 2, Activation::Softmax)).unwrap_err();
        assert_eq!(err.kind(), "ModelBuildError");
    }

    #[test]
    fn test_push_rejects_late_pooling() {
        let mut model = small_model();
        let err = model
            .push(Layer::average_pool("pool2", model.input_shape, 1, 1))
            .unwrap_err();
        assert!(err.to_string().contains("first layer"));
    }

    #[test]
    fn test_output_shape() {
        let model = small_model();
        assert_eq!(model.output_shape(), vec![None, Some(5)]);
        assert_eq!(model.output_activation(), Some(Activation::Softmax));
    }

    #[test]
    fn test_freeze_all_and_partial() {
        let mut model = small_model();

        model.freeze(None);
        assert!(model.layers.iter().all(|l| !l.trainable));

        model.freeze(Some(2));
        let flags: Vec<bool> = model.layers.iter().map(|l| l.trainable).collect();
        assert_eq!(flags, vec![false, false, true]);

        model.freeze(Some(10));
        assert!(model.layers.iter().all(|l| !l.trainable));
    }

    #[test]
    fn test_param_counts() {
        let mut model = small_model();
        assert_eq!(model.param_count(), 12 * 6 + 6 + 6 * 5 + 5);
        model.freeze(Some(2));
        assert_eq!(model.trainable_param_count(), 6 * 5 + 5);
    }

    #[test]
    fn test_compile_resets_optimizer_state() {
        let mut model = small_model();
        model.optimizer_state = Some(OptimizerState::default());
        model.compile(CompileConfig::new(
            OptimizerKind::Adam,
            0.001,
            Loss::SparseCategoricalCrossentropy,
        ));
        assert!(model.optimizer_state.is_none());
        assert_eq!(model.compiled.as_ref().unwrap().metrics, vec!["accuracy"]);
    }

    #[test]
    fn test_weight_source_parse() {
        assert_eq!(WeightSource::parse("none"), WeightSource::Random);
        assert_eq!(WeightSource::parse(""), WeightSource::Random);
        assert_eq!(
            WeightSource::parse("weights/base.json"),
            WeightSource::File(PathBuf::from("weights/base.json"))
        );
    }

    #[test]
    fn test_optimizer_kind_parse() {
        assert_eq!("Adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::Adam);
        assert_eq!("sgd".parse::<OptimizerKind>().unwrap(), OptimizerKind::Sgd);
        assert_eq!(OptimizerKind::default(), OptimizerKind::Sgd);
        assert!("rmsprop".parse::<OptimizerKind>().is_err());
    }

    #[test]
    fn test_model_serialization() {
        let model = small_model();
        let json = serde_json::to_string(&model).unwrap();
        let restored: Model = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, model);
        restored.validate().unwrap();
    }
}
