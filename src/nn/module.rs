//! Module defining the core `Layer` trait shared by all layers and combinators.
//!
//! A layer is a function from `n_in` tensors to `n_out` tensors, optionally
//! holding trainable weights. Layers are stateless descriptions: their weights
//! live in a [`Weights`] tree produced by [`Layer::init`] and passed back in on
//! every call, mirroring the layer tree one node per layer.

use crate::shapes::{DType, ShapeDtype, ShapeError};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("Layer '{layer}' expected {expected} input(s), got {actual}.")]
    InputCount {
        layer: String,
        expected: usize,
        actual: usize,
    },

    #[error("Layer '{layer}' expected {expected} output gradient(s), got {actual}.")]
    GradCount {
        layer: String,
        expected: usize,
        actual: usize,
    },

    #[error("Layer '{layer}' needs {needed} item(s) on the data stack, only {available} available.")]
    StackUnderflow {
        layer: String,
        needed: usize,
        available: usize,
    },

    #[error("Layer '{layer}': {message}")]
    Shape { layer: String, message: String },

    #[error("Layer '{layer}': index {index} is out of range (limit {limit}).")]
    IndexOutOfRange {
        layer: String,
        index: i64,
        limit: usize,
    },

    #[error("Weights do not match the layer structure: {0}")]
    WeightsStructure(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Layer '{0}' has no weights; call init() first.")]
    NotInitialized(String),

    #[error(transparent)]
    ShapeError(#[from] ShapeError),
}

pub type Result<T> = std::result::Result<T, LayerError>;

/// Execution mode of a forward pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Train,
    Eval,
    Predict,
}

/// Per-call state: the mode and the random source for stochastic layers.
#[derive(Debug, Clone)]
pub struct Context {
    mode: Mode,
    rng: StdRng,
}

impl Context {
    /// Context in `mode` whose random source is seeded with `seed`.
    pub fn new(mode: Mode, seed: u64) -> Self {
        Self {
            mode,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Training mode; dropout and other stochastic layers are active.
    pub fn train(seed: u64) -> Self {
        Self::new(Mode::Train, seed)
    }

    /// Deterministic evaluation mode.
    pub fn eval() -> Self {
        Self::new(Mode::Eval, 0)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Random source for stochastic layers.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Trainable weights, shaped like the layer tree that owns them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Weights {
    /// Tensors owned directly by this layer.
    pub tensors: Vec<Tensor>,
    /// Weights of the sublayers, in sublayer order.
    pub children: Vec<Weights>,
}

impl Weights {
    /// Weights of a layer with no tensors and no sublayers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Weights of a layer without sublayers.
    pub fn leaf(tensors: Vec<Tensor>) -> Self {
        Self {
            tensors,
            children: Vec::new(),
        }
    }

    /// Weights of a combinator: one child per sublayer, no own tensors.
    pub fn node(children: Vec<Weights>) -> Self {
        Self {
            tensors: Vec::new(),
            children,
        }
    }

    /// Weights of sublayer `index`.
    pub fn child(&self, index: usize) -> Result<&Weights> {
        self.children.get(index).ok_or_else(|| {
            LayerError::WeightsStructure(format!(
                "missing child {} (have {})",
                index,
                self.children.len()
            ))
        })
    }

    /// Own tensor `index` of this layer.
    pub fn tensor(&self, index: usize) -> Result<&Tensor> {
        self.tensors.get(index).ok_or_else(|| {
            LayerError::WeightsStructure(format!(
                "missing tensor {} (have {})",
                index,
                self.tensors.len()
            ))
        })
    }

    /// All tensors in pre-order: own tensors first, then each child.
    pub fn flatten(&self) -> Vec<&Tensor> {
        let mut out: Vec<&Tensor> = self.tensors.iter().collect();
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }

    /// Mutable counterpart of [`flatten`](Self::flatten), same order.
    pub fn flatten_mut(&mut self) -> Vec<&mut Tensor> {
        let mut out: Vec<&mut Tensor> = self.tensors.iter_mut().collect();
        for child in &mut self.children {
            out.extend(child.flatten_mut());
        }
        out
    }

    /// Number of tensors in the tree.
    pub fn len(&self) -> usize {
        self.tensors.len() + self.children.iter().map(Weights::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of scalar parameters in the tree.
    pub fn size(&self) -> usize {
        self.flatten().iter().map(|t| t.len()).sum()
    }

    /// Same tree with every tensor replaced by zeros.
    pub fn zeros_like(&self) -> Weights {
        Weights {
            tensors: self
                .tensors
                .iter()
                .map(|t| Tensor::zeros(t.raw_dim()))
                .collect(),
            children: self.children.iter().map(Weights::zeros_like).collect(),
        }
    }

    /// True when both trees have the same nesting and tensor shapes.
    pub fn same_structure(&self, other: &Weights) -> bool {
        self.tensors.len() == other.tensors.len()
            && self.children.len() == other.children.len()
            && self
                .tensors
                .iter()
                .zip(&other.tensors)
                .all(|(a, b)| a.shape() == b.shape())
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.same_structure(b))
    }

    /// Tensors keyed by their path in the tree, e.g. `"1.0.0"` is tensor 0 of
    /// child 0 of child 1.
    pub fn to_named(&self) -> HashMap<String, Tensor> {
        let mut out = HashMap::new();
        self.collect_named("", &mut out);
        out
    }

    fn collect_named(&self, prefix: &str, out: &mut HashMap<String, Tensor>) {
        for (i, t) in self.tensors.iter().enumerate() {
            out.insert(format!("{}{}", prefix, i), t.clone());
        }
        for (i, child) in self.children.iter().enumerate() {
            child.collect_named(&format!("{}{}.", prefix, i), out);
        }
    }

    /// Replaces every tensor with the same-named entry from `named`.
    ///
    /// Missing names and shape mismatches are errors; the tree is left
    /// untouched unless every tensor loads.
    pub fn load_named(&mut self, named: &HashMap<String, Tensor>) -> Result<()> {
        let mut loaded = self.clone();
        loaded.fill_named("", named)?;
        *self = loaded;
        Ok(())
    }

    fn fill_named(&mut self, prefix: &str, named: &HashMap<String, Tensor>) -> Result<()> {
        for (i, t) in self.tensors.iter_mut().enumerate() {
            let key = format!("{}{}", prefix, i);
            let value = named
                .get(&key)
                .ok_or_else(|| LayerError::WeightsStructure(format!("no tensor named '{}'", key)))?;
            if value.shape() != t.shape() {
                return Err(LayerError::WeightsStructure(format!(
                    "tensor '{}' has shape {:?}, expected {:?}",
                    key,
                    value.shape(),
                    t.shape()
                )));
            }
            *t = value.clone();
        }
        for (i, child) in self.children.iter_mut().enumerate() {
            child.fill_named(&format!("{}{}.", prefix, i), named)?;
        }
        Ok(())
    }
}

/// Values a layer keeps from `forward` for use in `backward`.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    pub tensors: Vec<Tensor>,
    pub shapes: Vec<Vec<usize>>,
    pub children: Vec<Cache>,
}

impl Cache {
    /// Cache of a leaf layer holding `tensors`.
    pub fn with_tensors(tensors: Vec<Tensor>) -> Self {
        Self {
            tensors,
            ..Self::default()
        }
    }

    pub fn with_shapes(shapes: Vec<Vec<usize>>) -> Self {
        Self {
            shapes,
            ..Self::default()
        }
    }

    pub fn with_children(children: Vec<Cache>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    pub fn tensor(&self, index: usize) -> Result<&Tensor> {
        self.tensors.get(index).ok_or_else(|| {
            LayerError::InvalidArgument(format!("backward cache is missing tensor {}", index))
        })
    }

    pub fn child(&self, index: usize) -> Result<&Cache> {
        self.children.get(index).ok_or_else(|| {
            LayerError::InvalidArgument(format!("backward cache is missing child {}", index))
        })
    }
}

/// Common interface for layers and combinators.
pub trait Layer: fmt::Debug + Send + Sync {
    /// Display name, e.g. `"Dense_64"` or `"Serial"`.
    fn name(&self) -> &str;

    /// Number of inputs taken from the data stack.
    fn n_in(&self) -> usize;

    /// Number of outputs pushed back onto the data stack.
    fn n_out(&self) -> usize;

    /// Direct sublayers, empty for base layers.
    fn sublayers(&self) -> &[Box<dyn Layer>] {
        &[]
    }

    /// Creates weights for inputs described by `input_signature` and returns
    /// them together with the output signature.
    fn init(
        &self,
        input_signature: &[ShapeDtype],
        rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)>;

    /// Computes outputs, returning what `backward` will need.
    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)>;

    /// Given gradients of the loss with respect to each output, returns
    /// gradients with respect to each input and to every weight.
    fn backward(
        &self,
        cache: &Cache,
        weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)>;

    /// Output signature for the given input signature.
    fn output_signature(&self, input_signature: &[ShapeDtype]) -> Result<Vec<ShapeDtype>> {
        let mut rng = StdRng::seed_from_u64(0);
        Ok(self.init(input_signature, &mut rng)?.1)
    }

    /// Runs the layer in eval mode and discards the backward cache.
    fn apply(&self, inputs: &[Tensor], weights: &Weights) -> Result<Vec<Tensor>> {
        let mut ctx = Context::eval();
        Ok(self.forward(inputs, weights, &mut ctx)?.0)
    }
}

/// A shared layer behaves like the layer itself, so one model can sit inside
/// several combinators.
impl<L: Layer + ?Sized> Layer for std::sync::Arc<L> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn n_in(&self) -> usize {
        (**self).n_in()
    }

    fn n_out(&self) -> usize {
        (**self).n_out()
    }

    fn sublayers(&self) -> &[Box<dyn Layer>] {
        (**self).sublayers()
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        (**self).init(input_signature, rng)
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        (**self).forward(inputs, weights, ctx)
    }

    fn backward(
        &self,
        cache: &Cache,
        weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        (**self).backward(cache, weights, grads)
    }
}

/// Checks the number of forward inputs.
pub fn check_inputs(layer: &dyn Layer, inputs: usize) -> Result<()> {
    if inputs != layer.n_in() {
        return Err(LayerError::InputCount {
            layer: layer.name().to_string(),
            expected: layer.n_in(),
            actual: inputs,
        });
    }
    Ok(())
}

/// Checks the number of output gradients passed to backward.
pub fn check_grads(layer: &dyn Layer, grads: usize) -> Result<()> {
    if grads != layer.n_out() {
        return Err(LayerError::GradCount {
            layer: layer.name().to_string(),
            expected: layer.n_out(),
            actual: grads,
        });
    }
    Ok(())
}

/// Output signature of a compute layer, found by running it on zeros.
///
/// All outputs are tagged `F32`.
pub fn abstract_outputs(
    layer: &dyn Layer,
    input_signature: &[ShapeDtype],
    weights: &Weights,
) -> Result<Vec<ShapeDtype>> {
    let inputs: Vec<Tensor> = input_signature.iter().map(ShapeDtype::zeros).collect();
    let outputs = layer.apply(&inputs, weights)?;
    Ok(outputs
        .iter()
        .map(|t| ShapeDtype::of(t, DType::F32))
        .collect())
}

/// Shape-related failure attributed to `layer`.
pub fn shape_error(layer: &dyn Layer, message: impl Into<String>) -> LayerError {
    LayerError::Shape {
        layer: layer.name().to_string(),
        message: message.into(),
    }
}
