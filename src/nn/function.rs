//! Weightless layers defined by a pair of pure functions.
//!
//! [`PureFn`] wraps a forward function and its vector-Jacobian product. Most
//! elementwise and reshaping layers (activations, `add`, `mean`,
//! `concatenate`) are built this way.

use crate::nn::module::{
    abstract_outputs, check_grads, check_inputs, Cache, Context, Layer, LayerError, Result,
    Weights,
};
use crate::shapes::{ShapeDtype, ShapeError};
use crate::tensor::{normalize_axis, Tensor};
use ndarray::{Axis, Slice};
use rand::rngs::StdRng;
use std::fmt;
use std::sync::Arc;

/// Forward function: inputs to outputs.
pub type ForwardFn = dyn Fn(&[Tensor]) -> std::result::Result<Vec<Tensor>, String> + Send + Sync;

/// Backward function: `(inputs, outputs, output_grads)` to input gradients.
pub type BackwardFn =
    dyn Fn(&[Tensor], &[Tensor], &[Tensor]) -> std::result::Result<Vec<Tensor>, String> + Send + Sync;

/// A layer without weights, computing `forward` and differentiated by `backward`.
#[derive(Clone)]
pub struct PureFn {
    name: String,
    n_in: usize,
    n_out: usize,
    forward: Arc<ForwardFn>,
    backward: Arc<BackwardFn>,
}

impl PureFn {
    pub fn new<F, B>(name: impl Into<String>, n_in: usize, n_out: usize, forward: F, backward: B) -> Self
    where
        F: Fn(&[Tensor]) -> std::result::Result<Vec<Tensor>, String> + Send + Sync + 'static,
        B: Fn(&[Tensor], &[Tensor], &[Tensor]) -> std::result::Result<Vec<Tensor>, String>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            n_in,
            n_out,
            forward: Arc::new(forward),
            backward: Arc::new(backward),
        }
    }

    fn wrap<T>(&self, r: std::result::Result<T, String>) -> Result<T> {
        r.map_err(|message| LayerError::Shape {
            layer: self.name.clone(),
            message,
        })
    }
}

impl fmt::Debug for PureFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PureFn")
            .field("name", &self.name)
            .field("n_in", &self.n_in)
            .field("n_out", &self.n_out)
            .finish()
    }
}

impl Layer for PureFn {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_in(&self) -> usize {
        self.n_in
    }

    fn n_out(&self) -> usize {
        self.n_out
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        _rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        let weights = Weights::empty();
        let outputs = abstract_outputs(self, input_signature, &weights)?;
        Ok((weights, outputs))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        _weights: &Weights,
        _ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let outputs = self.wrap((self.forward)(inputs))?;
        if outputs.len() != self.n_out {
            return Err(LayerError::Shape {
                layer: self.name.clone(),
                message: format!("produced {} outputs, declared {}", outputs.len(), self.n_out),
            });
        }
        let mut saved = inputs.to_vec();
        saved.extend(outputs.iter().cloned());
        Ok((outputs, Cache::with_tensors(saved)))
    }

    fn backward(
        &self,
        cache: &Cache,
        _weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        if cache.tensors.len() != self.n_in + self.n_out {
            return Err(LayerError::InvalidArgument(format!(
                "backward cache for '{}' holds {} tensors",
                self.name,
                cache.tensors.len()
            )));
        }
        let (inputs, outputs) = cache.tensors.split_at(self.n_in);
        for (i, (grad, output)) in grads.iter().zip(outputs).enumerate() {
            if grad.shape() != output.shape() {
                return Err(LayerError::Shape {
                    layer: self.name.clone(),
                    message: format!(
                        "gradient {} has shape {:?}, output has {:?}",
                        i,
                        grad.shape(),
                        output.shape()
                    ),
                });
            }
        }
        let input_grads = self.wrap((self.backward)(inputs, outputs, grads))?;
        Ok((input_grads, Weights::empty()))
    }
}

fn axis_error(axis: isize, rank: usize) -> String {
    ShapeError::AxisOutOfRange { axis, rank }.to_string()
}

fn same_shape(a: &Tensor, b: &Tensor) -> std::result::Result<(), String> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(format!("shapes {:?} and {:?} differ", a.shape(), b.shape()))
    }
}

/// Elementwise sum of the top two stack items.
pub fn add() -> PureFn {
    PureFn::new(
        "Add",
        2,
        1,
        |x| {
            same_shape(&x[0], &x[1])?;
            Ok(vec![&x[0] + &x[1]])
        },
        |_x, _y, g| Ok(vec![g[0].clone(), g[0].clone()]),
    )
}

/// Elementwise product of the top two stack items.
pub fn multiply() -> PureFn {
    PureFn::new(
        "Multiply",
        2,
        1,
        |x| {
            same_shape(&x[0], &x[1])?;
            Ok(vec![&x[0] * &x[1]])
        },
        |x, _y, g| Ok(vec![&g[0] * &x[1], &g[0] * &x[0]]),
    )
}

/// Mean along `axis`, optionally keeping it as a size-1 dimension.
pub fn mean(axis: isize, keepdims: bool) -> PureFn {
    PureFn::new(
        format!("Mean(axis={})", axis),
        1,
        1,
        move |x| {
            let ax = normalize_axis(axis, x[0].ndim()).ok_or_else(|| axis_error(axis, x[0].ndim()))?;
            let n = x[0].len_of(Axis(ax));
            if n == 0 {
                return Err("mean over an empty axis".to_string());
            }
            let reduced = x[0].sum_axis(Axis(ax)) / n as f32;
            Ok(vec![if keepdims {
                reduced.insert_axis(Axis(ax))
            } else {
                reduced
            }])
        },
        move |x, _y, g| {
            let ax = normalize_axis(axis, x[0].ndim()).ok_or_else(|| axis_error(axis, x[0].ndim()))?;
            let n = x[0].len_of(Axis(ax)) as f32;
            let g_keep = if keepdims {
                g[0].clone()
            } else {
                g[0].clone().insert_axis(Axis(ax))
            };
            let spread = g_keep
                .broadcast(x[0].raw_dim())
                .ok_or_else(|| format!("cannot broadcast {:?} to {:?}", g_keep.shape(), x[0].shape()))?
                .to_owned();
            Ok(vec![spread / n])
        },
    )
}

/// Concatenates the top `n_items` stack items along `axis`.
pub fn concatenate(n_items: usize, axis: isize) -> PureFn {
    PureFn::new(
        format!("Concatenate_in{}", n_items),
        n_items,
        1,
        move |x| {
            let ndim = x.first().map(|t| t.ndim()).unwrap_or(0);
            let ax = normalize_axis(axis, ndim).ok_or_else(|| axis_error(axis, ndim))?;
            let views: Vec<_> = x.iter().map(|t| t.view()).collect();
            let joined = ndarray::concatenate(Axis(ax), &views).map_err(|e| e.to_string())?;
            Ok(vec![joined])
        },
        move |x, _y, g| {
            let ndim = g[0].ndim();
            let ax = normalize_axis(axis, ndim).ok_or_else(|| axis_error(axis, ndim))?;
            let mut start = 0isize;
            let mut grads = Vec::with_capacity(x.len());
            for t in x {
                let len = t.len_of(Axis(ax)) as isize;
                let part = g[0].slice_axis(Axis(ax), Slice::from(start..start + len));
                grads.push(part.to_owned());
                start += len;
            }
            Ok(grads)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    fn t(shape: &[usize], data: Vec<f32>) -> Tensor {
        tensor::from_vec(shape, data).unwrap()
    }

    #[test]
    fn test_add_forward_backward() {
        let layer = add();
        let a = t(&[2], vec![1.0, 2.0]);
        let b = t(&[2], vec![10.0, 20.0]);
        let mut ctx = Context::eval();
        let (out, cache) = layer.forward(&[a, b], &Weights::empty(), &mut ctx).unwrap();
        assert_eq!(out[0], t(&[2], vec![11.0, 22.0]));
        let (grads, _) = layer
            .backward(&cache, &Weights::empty(), &[tensor::ones(&[2])])
            .unwrap();
        assert_eq!(grads.len(), 2);
        assert_eq!(grads[1], tensor::ones(&[2]));
    }

    #[test]
    fn test_add_rejects_shape_mismatch() {
        let err = add()
            .apply(&[tensor::zeros(&[2]), tensor::zeros(&[3])], &Weights::empty())
            .unwrap_err();
        assert!(matches!(err, LayerError::Shape { .. }));
    }

    #[test]
    fn test_wrong_input_count() {
        let err = add().apply(&[tensor::zeros(&[2])], &Weights::empty()).unwrap_err();
        assert_eq!(
            err,
            LayerError::InputCount {
                layer: "Add".to_string(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_wrong_grad_count() {
        let layer = add();
        let mut ctx = Context::eval();
        let inputs = [tensor::zeros(&[2]), tensor::zeros(&[2])];
        let (_, cache) = layer.forward(&inputs, &Weights::empty(), &mut ctx).unwrap();
        let err = layer.backward(&cache, &Weights::empty(), &[]).unwrap_err();
        assert_eq!(
            err,
            LayerError::GradCount {
                layer: "Add".to_string(),
                expected: 1,
                actual: 0
            }
        );
    }

    #[test]
    fn test_wrong_grad_shape_is_an_error() {
        let mut ctx = Context::eval();
        let cases = [
            (mean(1, false), vec![tensor::zeros(&[2, 3])], tensor::scalar(1.0)),
            (
                concatenate(2, -1),
                vec![tensor::zeros(&[2, 2]), tensor::zeros(&[2, 4])],
                tensor::zeros(&[2, 4]),
            ),
        ];
        for (layer, inputs, grad) in cases {
            let (_, cache) = layer.forward(&inputs, &Weights::empty(), &mut ctx).unwrap();
            let err = layer.backward(&cache, &Weights::empty(), &[grad]).unwrap_err();
            assert!(matches!(err, LayerError::Shape { .. }), "{:?}", err);
        }
    }

    #[test]
    fn test_axis_out_of_range() {
        let err = mean(2, false)
            .apply(&[tensor::zeros(&[2, 3])], &Weights::empty())
            .unwrap_err();
        match err {
            LayerError::Shape { message, .. } => {
                assert_eq!(message, "Axis 2 is out of range for a rank-2 value.")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_mean_keepdims() {
        let x = t(&[2, 2], vec![1.0, 3.0, 5.0, 7.0]);
        let out = mean(-1, true).apply(&[x.clone()], &Weights::empty()).unwrap();
        assert_eq!(out[0], t(&[2, 1], vec![2.0, 6.0]));
        let out = mean(0, false).apply(&[x], &Weights::empty()).unwrap();
        assert_eq!(out[0], t(&[2], vec![3.0, 5.0]));
    }

    #[test]
    fn test_concatenate_splits_gradient() {
        let layer = concatenate(2, -1);
        let a = tensor::zeros(&[2, 1]);
        let b = tensor::zeros(&[2, 3]);
        let mut ctx = Context::eval();
        let (out, cache) = layer.forward(&[a, b], &Weights::empty(), &mut ctx).unwrap();
        assert_eq!(out[0].shape(), &[2, 4]);
        let g = t(&[2, 4], (0..8).map(|v| v as f32).collect());
        let (grads, _) = layer.backward(&cache, &Weights::empty(), &[g]).unwrap();
        assert_eq!(grads[0], t(&[2, 1], vec![0.0, 4.0]));
        assert_eq!(grads[1], t(&[2, 3], vec![1.0, 2.0, 3.0, 5.0, 6.0, 7.0]));
    }

    #[test]
    fn test_output_signature_from_abstract_evaluation() {
        let sig = concatenate(3, 0)
            .output_signature(&[
                ShapeDtype::f32([1, 4]),
                ShapeDtype::f32([2, 4]),
                ShapeDtype::f32([3, 4]),
            ])
            .unwrap();
        assert_eq!(sig, vec![ShapeDtype::f32([6, 4])]);
    }
}
