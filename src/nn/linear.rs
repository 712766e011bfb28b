//! Fully connected (dense) layer.

use crate::nn::init::{glorot_uniform, random_normal};
use crate::nn::module::{
    check_grads, check_inputs, shape_error, Cache, Context, Layer, Result, Weights,
};
use crate::shapes::ShapeDtype;
use crate::tensor::{from_matrix, to_matrix, Tensor};
use ndarray::{Array2, Axis, Ix1, Ix2};
use rand::rngs::StdRng;

/// Fully connected layer.
///
/// Computes `y = x·W + b` over the last axis of its single input, so inputs
/// of shape `[..., d_in]` map to `[..., n_units]`. Weights are
/// `[kernel: [d_in, n_units], bias: [n_units]]`.
#[derive(Debug, Clone)]
pub struct Dense {
    n_units: usize,
    use_bias: bool,
    name: String,
}

impl Dense {
    pub fn new(n_units: usize) -> Self {
        Self {
            n_units,
            use_bias: true,
            name: format!("Dense_{}", n_units),
        }
    }

    /// A dense layer without the bias term.
    pub fn without_bias(n_units: usize) -> Self {
        Self {
            use_bias: false,
            ..Self::new(n_units)
        }
    }

    pub fn n_units(&self) -> usize {
        self.n_units
    }

    fn kernel<'a>(&self, weights: &'a Weights) -> Result<ndarray::ArrayView2<'a, f32>> {
        weights
            .tensor(0)?
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| shape_error(self, format!("kernel is not a matrix: {}", e)))
    }

    fn check_input(&self, x: &Tensor, d_in: usize) -> Result<()> {
        match x.shape().last() {
            Some(&d) if d == d_in => Ok(()),
            _ => Err(shape_error(
                self,
                format!("input shape {:?} does not end in {}", x.shape(), d_in),
            )),
        }
    }
}

impl Layer for Dense {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_in(&self) -> usize {
        1
    }

    fn n_out(&self) -> usize {
        1
    }

    fn init(
        &self,
        input_signature: &[ShapeDtype],
        rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        let input = &input_signature[0];
        let d_in = *input
            .shape
            .last()
            .ok_or_else(|| shape_error(self, "input must have at least one axis"))?;

        let mut tensors = vec![glorot_uniform(d_in, self.n_units, rng)];
        if self.use_bias {
            tensors.push(random_normal(&[self.n_units], 1e-6, rng)?);
        }

        let mut out_shape = input.shape.clone();
        if let Some(last) = out_shape.last_mut() {
            *last = self.n_units;
        }
        Ok((Weights::leaf(tensors), vec![ShapeDtype::f32(out_shape)]))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        _ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let kernel = self.kernel(weights)?;
        let x = &inputs[0];
        self.check_input(x, kernel.nrows())?;

        let x2 = to_matrix(x).ok_or_else(|| shape_error(self, "input is not a matrix"))?;
        let mut y: Array2<f32> = x2.dot(&kernel);
        if self.use_bias {
            let bias = weights
                .tensor(1)?
                .view()
                .into_dimensionality::<Ix1>()
                .map_err(|e| shape_error(self, format!("bias is not a vector: {}", e)))?;
            y += &bias;
        }

        let mut out_shape = x.shape().to_vec();
        if let Some(last) = out_shape.last_mut() {
            *last = self.n_units;
        }
        let y = from_matrix(y, &out_shape)
            .ok_or_else(|| shape_error(self, format!("cannot reshape output to {:?}", out_shape)))?;
        Ok((
            vec![y],
            Cache::with_tensors(vec![x.clone()]),
        ))
    }

    fn backward(
        &self,
        cache: &Cache,
        weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let kernel = self.kernel(weights)?;
        let x = cache.tensor(0)?;
        let mismatch = || {
            shape_error(
                self,
                format!("gradient shape {:?} does not match the output", grads[0].shape()),
            )
        };
        let x2 = to_matrix(x).ok_or_else(mismatch)?;
        let g2 = to_matrix(&grads[0]).ok_or_else(mismatch)?;
        if g2.dim() != (x2.nrows(), self.n_units) {
            return Err(mismatch());
        }

        let dx = from_matrix(g2.dot(&kernel.t()), x.shape()).ok_or_else(mismatch)?;
        let mut weight_grads = vec![x2.t().dot(&g2).into_dyn()];
        if self.use_bias {
            weight_grads.push(g2.sum_axis(Axis(0)).into_dyn());
        }
        Ok((vec![dx], Weights::leaf(weight_grads)))
    }
}
