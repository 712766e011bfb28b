//! Layer normalization.

use crate::nn::module::{
    check_grads, check_inputs, shape_error, Cache, Context, Layer, Result, Weights,
};
use crate::shapes::ShapeDtype;
use crate::tensor::{self, sum_last_keepdims, Tensor};
use ndarray::Axis;
use rand::rngs::StdRng;

/// Layer normalization over the last axis with trainable scale and bias.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    epsilon: f32,
}

impl LayerNorm {
    /// Layer norm with `epsilon = 1e-6`.
    pub fn new() -> Self {
        Self::with_epsilon(1e-6)
    }

    /// Layer norm adding `epsilon` to the variance.
    pub fn with_epsilon(epsilon: f32) -> Self {
        Self { epsilon }
    }

    /// Returns `(normalized, 1 / std)` for `x`.
    fn normalize(&self, x: &Tensor) -> (Tensor, Tensor) {
        let d = x.shape()[x.ndim() - 1] as f32;
        let mean = sum_last_keepdims(x) / d;
        let centered = x - &mean;
        let var = sum_last_keepdims(&centered.mapv(|v| v * v)) / d;
        let inv_std = var.mapv(|v| 1.0 / (v + self.epsilon).sqrt());
        (&centered * &inv_std, inv_std)
    }
}

impl Default for LayerNorm {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for LayerNorm {
    fn name(&self) -> &str {
        "LayerNorm"
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
        _rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        let d = *input_signature[0]
            .shape
            .last()
            .ok_or_else(|| shape_error(self, "input must have at least one axis"))?;
        let weights = Weights::leaf(vec![tensor::ones(&[d]), tensor::zeros(&[d])]);
        Ok((weights, vec![ShapeDtype::f32(input_signature[0].shape.clone())]))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        _ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let x = &inputs[0];
        let scale = weights.tensor(0)?;
        let bias = weights.tensor(1)?;
        if x.ndim() == 0 || x.shape()[x.ndim() - 1] != scale.len() || scale.shape() != bias.shape() {
            return Err(shape_error(
                self,
                format!("input shape {:?} does not match scale {:?}", x.shape(), scale.shape()),
            ));
        }

        let (normed, inv_std) = self.normalize(x);
        let y = &(&normed * scale) + bias;
        Ok((vec![y], Cache::with_tensors(vec![normed, inv_std])))
    }

    fn backward(
        &self,
        cache: &Cache,
        weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let normed = cache.tensor(0)?;
        let inv_std = cache.tensor(1)?;
        let scale = weights.tensor(0)?;
        let g = &grads[0];
        if g.shape() != normed.shape() {
            return Err(shape_error(self, "gradient shape does not match the output"));
        }

        let d = normed.shape()[normed.ndim() - 1] as f32;
        let g_hat = g * scale;
        let mean_g = sum_last_keepdims(&g_hat) / d;
        let mean_gx = sum_last_keepdims(&(&g_hat * normed)) / d;
        let dx = &(&(&g_hat - &mean_g) - &(normed * &mean_gx)) * inv_std;

        let (g2, n2) = tensor::to_matrix(g)
            .zip(tensor::to_matrix(normed))
            .ok_or_else(|| shape_error(self, "gradient is not a matrix"))?;
        let d_scale = (&g2 * &n2).sum_axis(Axis(0)).into_dyn();
        let d_bias = g2.sum_axis(Axis(0)).into_dyn();
        Ok((vec![dx], Weights::leaf(vec![d_scale, d_bias])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_normalizes_last_axis() {
        let layer = LayerNorm::new();
        let mut rng = StdRng::seed_from_u64(0);
        let (w, _) = layer.init(&[ShapeDtype::f32([2, 4])], &mut rng).unwrap();
        let x = tensor::from_vec(&[2, 4], vec![1.0, 2.0, 3.0, 4.0, -5.0, 0.0, 5.0, 10.0]).unwrap();
        let out = layer.apply(&[x], &w).unwrap().remove(0);
        for row in out.rows() {
            let mean: f32 = row.iter().sum::<f32>() / 4.0;
            let var: f32 = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 4.0;
            assert!(mean.abs() < 1e-5);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_scale_and_bias_apply() {
        let layer = LayerNorm::new();
        let w = Weights::leaf(vec![
            tensor::from_vec(&[2], vec![2.0, 2.0]).unwrap(),
            tensor::from_vec(&[2], vec![1.0, 1.0]).unwrap(),
        ]);
        let x = tensor::from_vec(&[1, 2], vec![0.0, 2.0]).unwrap();
        let out = layer.apply(&[x], &w).unwrap().remove(0);
        assert!((out[[0, 0]] - -1.0).abs() < 1e-4);
        assert!((out[[0, 1]] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_feature_mismatch() {
        let w = Weights::leaf(vec![tensor::ones(&[3]), tensor::zeros(&[3])]);
        assert!(LayerNorm::new().apply(&[tensor::ones(&[2, 4])], &w).is_err());
    }
}
