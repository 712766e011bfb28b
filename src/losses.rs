// --- File: src/losses.rs ---

//! Loss and metric layers.
//!
//! Each of these is an ordinary [`Layer`] that reduces its inputs to a
//! rank-0 tensor, so a loss can sit at the end of a `Serial` next to the
//! model it scores and share the same forward/backward machinery.
//!
//! # Available Layers
//!
//! - **Cross-Entropy**: [`CrossEntropyLoss`], plain or weighted by a mask
//! - **L2**: [`L2Loss`], mean squared error
//! - **Accuracy**: [`Accuracy`], plain or weighted; not differentiable

use crate::nn::module::{
    check_grads, check_inputs, shape_error, Cache, Context, Layer, LayerError, Result, Weights,
};
use crate::shapes::ShapeDtype;
use crate::tensor::{self, argmax_last, to_matrix, Tensor};
use ndarray::Array2;
use rand::rngs::StdRng;

/// Scalar output signature shared by every layer here.
fn scalar_signature() -> Vec<ShapeDtype> {
    vec![ShapeDtype::f32(Vec::new())]
}

/// Scalar gradient flowing into a loss layer.
fn scalar_grad(layer: &dyn Layer, grads: &[Tensor]) -> Result<f32> {
    match grads[0].iter().next() {
        Some(&g) if grads[0].len() == 1 => Ok(g),
        _ => Err(shape_error(
            layer,
            format!("expected a scalar gradient, got shape {:?}", grads[0].shape()),
        )),
    }
}

/// Checks `(scores[..., V], targets[...], weights[...]?)` shapes.
fn check_class_signature(layer: &dyn Layer, sig: &[ShapeDtype]) -> Result<()> {
    let scores = &sig[0].shape;
    let batch = scores
        .split_last()
        .map(|(_, rest)| rest)
        .ok_or_else(|| shape_error(layer, "scores must have at least one axis"))?;
    for other in &sig[1..] {
        if other.shape.as_slice() != batch {
            return Err(shape_error(
                layer,
                format!("shape {:?} does not match scores {:?}", other.shape, scores),
            ));
        }
    }
    Ok(())
}

/// Flattened `(scores, targets, weights)` for class-scoring layers.
struct ClassInputs {
    scores: Array2<f32>,
    targets: Vec<usize>,
    weights: Vec<f32>,
}

fn class_inputs(layer: &dyn Layer, inputs: &[Tensor]) -> Result<ClassInputs> {
    let sig: Vec<ShapeDtype> = inputs.iter().map(|t| ShapeDtype::f32(t.shape())).collect();
    check_class_signature(layer, &sig)?;

    let scores = to_matrix(&inputs[0])
        .ok_or_else(|| shape_error(layer, "scores cannot be viewed as a matrix"))?;
    let n_classes = scores.ncols();
    let targets = inputs[1]
        .iter()
        .map(|&t| {
            if t.fract() != 0.0 || t < 0.0 || t >= n_classes as f32 {
                Err(LayerError::IndexOutOfRange {
                    layer: layer.name().to_string(),
                    index: t as i64,
                    limit: n_classes,
                })
            } else {
                Ok(t as usize)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    let weights = match inputs.get(2) {
        Some(w) => w.iter().copied().collect(),
        None => vec![1.0; targets.len()],
    };
    Ok(ClassInputs {
        scores,
        targets,
        weights,
    })
}

// ============================================================================
// Cross-Entropy
// ============================================================================

/// Mean negative log-likelihood of the targets under log-probabilities.
///
/// Inputs are `(log_probs[..., V], targets[...])`, or with [`weighted`](Self::weighted)
/// a third `weights[...]` input: the loss is `sum(w * -log_probs[target]) / sum(w)`,
/// and 0 when the weights sum to 0.
#[derive(Debug, Clone)]
pub struct CrossEntropyLoss {
    weighted: bool,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self { weighted: false }
    }

    pub fn weighted() -> Self {
        Self { weighted: true }
    }
}

impl Default for CrossEntropyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for CrossEntropyLoss {
    fn name(&self) -> &str {
        if self.weighted {
            "WeightedCategoryCrossEntropy"
        } else {
            "CrossEntropyLoss"
        }
    }

    fn n_in(&self) -> usize {
        if self.weighted {
            3
        } else {
            2
        }
    }

    fn n_out(&self) -> usize {
        1
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        _rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        check_class_signature(self, input_signature)?;
        Ok((Weights::empty(), scalar_signature()))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        _weights: &Weights,
        _ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let ClassInputs {
            scores,
            targets,
            weights,
        } = class_inputs(self, inputs)?;

        let total_weight: f32 = weights.iter().sum();
        let loss = if total_weight == 0.0 {
            0.0
        } else {
            let weighted_nll: f32 = targets
                .iter()
                .zip(&weights)
                .enumerate()
                .map(|(row, (&t, &w))| -scores[[row, t]] * w)
                .sum();
            weighted_nll / total_weight
        };

        let shapes = inputs.iter().map(|t| t.shape().to_vec()).collect();
        let cache = Cache {
            tensors: inputs.to_vec(),
            shapes,
            children: Vec::new(),
        };
        Ok((vec![tensor::scalar(loss)], cache))
    }

    fn backward(
        &self,
        cache: &Cache,
        _weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let g = scalar_grad(self, grads)?;
        if cache.tensors.len() != self.n_in() {
            return Err(LayerError::InvalidArgument(format!(
                "backward cache for '{}' holds {} tensors",
                self.name(),
                cache.tensors.len()
            )));
        }
        let ClassInputs {
            scores,
            targets,
            weights,
        } = class_inputs(self, &cache.tensors)?;

        let mut d_scores = Array2::<f32>::zeros(scores.raw_dim());
        let total_weight: f32 = weights.iter().sum();
        if total_weight != 0.0 {
            for (row, (&t, &w)) in targets.iter().zip(&weights).enumerate() {
                d_scores[[row, t]] = -g * w / total_weight;
            }
        }

        // Targets and weights are treated as constants.
        let d_scores = tensor::from_matrix(d_scores, cache.tensors[0].shape())
            .ok_or_else(|| shape_error(self, "score gradient does not match the scores"))?;
        let mut input_grads = vec![d_scores];
        input_grads.extend(
            cache.tensors[1..]
                .iter()
                .map(|t| Tensor::zeros(t.raw_dim())),
        );
        Ok((input_grads, Weights::empty()))
    }
}

// ============================================================================
// L2 Loss
// ============================================================================

/// Mean squared difference between predictions and targets.
#[derive(Debug, Clone, Default)]
pub struct L2Loss;

impl L2Loss {
    pub fn new() -> Self {
        Self
    }
}

impl Layer for L2Loss {
    fn name(&self) -> &str {
        "L2Loss"
    }

    fn n_in(&self) -> usize {
        2
    }

    fn n_out(&self) -> usize {
        1
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        _rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        if input_signature[0].shape != input_signature[1].shape {
            return Err(shape_error(self, "predictions and targets differ in shape"));
        }
        Ok((Weights::empty(), scalar_signature()))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        _weights: &Weights,
        _ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let (pred, target) = (&inputs[0], &inputs[1]);
        if pred.shape() != target.shape() {
            return Err(shape_error(
                self,
                format!(
                    "predictions {:?} and targets {:?} differ in shape",
                    pred.shape(),
                    target.shape()
                ),
            ));
        }
        let diff = pred - target;
        let loss = diff.mapv(|d| d * d).mean().unwrap_or(0.0);
        Ok((vec![tensor::scalar(loss)], Cache::with_tensors(vec![diff])))
    }

    fn backward(
        &self,
        cache: &Cache,
        _weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let g = scalar_grad(self, grads)?;
        let diff = cache.tensor(0)?;
        let n = diff.len().max(1) as f32;
        let d_pred = diff.mapv(|d| 2.0 * d * g / n);
        let d_target = d_pred.mapv(|v| -v);
        Ok((vec![d_pred, d_target], Weights::empty()))
    }
}

// ============================================================================
// Accuracy
// ============================================================================

/// Fraction of positions whose highest score is the target class.
///
/// With [`weighted`](Self::weighted), positions count in proportion to a third
/// `weights` input, so padding with weight 0 is ignored.
#[derive(Debug, Clone)]
pub struct Accuracy {
    weighted: bool,
}

impl Accuracy {
    pub fn new() -> Self {
        Self { weighted: false }
    }

    pub fn weighted() -> Self {
        Self { weighted: true }
    }
}

impl Default for Accuracy {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for Accuracy {
    fn name(&self) -> &str {
        if self.weighted {
            "WeightedCategoryAccuracy"
        } else {
            "Accuracy"
        }
    }

    fn n_in(&self) -> usize {
        if self.weighted {
            3
        } else {
            2
        }
    }

    fn n_out(&self) -> usize {
        1
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        _rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        check_class_signature(self, input_signature)?;
        Ok((Weights::empty(), scalar_signature()))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        _weights: &Weights,
        _ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let ClassInputs {
            targets, weights, ..
        } = class_inputs(self, inputs)?;
        let predicted = argmax_last(&inputs[0])
            .ok_or_else(|| shape_error(self, "scores cannot be viewed as a matrix"))?;

        let total_weight: f32 = weights.iter().sum();
        let accuracy = if total_weight == 0.0 {
            0.0
        } else {
            let correct: f32 = predicted
                .iter()
                .zip(&targets)
                .zip(&weights)
                .filter(|((p, t), _)| p == t)
                .map(|(_, &w)| w)
                .sum();
            correct / total_weight
        };

        let shapes = inputs.iter().map(|t| t.shape().to_vec()).collect();
        Ok((vec![tensor::scalar(accuracy)], Cache::with_shapes(shapes)))
    }

    fn backward(
        &self,
        cache: &Cache,
        _weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let zeros = cache.shapes.iter().map(|s| tensor::zeros(s)).collect();
        Ok((zeros, Weights::empty()))
    }
}
