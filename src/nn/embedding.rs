//! Embedding lookup layer.

use crate::nn::init::random_normal;
use crate::nn::module::{
    check_grads, check_inputs, shape_error, Cache, Context, Layer, LayerError, Result, Weights,
};
use crate::shapes::ShapeDtype;
use crate::tensor::{self, Tensor};
use ndarray::{Axis, Ix2};
use rand::rngs::StdRng;

/// Maps integer ids to learned vectors.
///
/// Input: ids of any shape (stored as `f32`, tagged `I32` in signatures).
/// Output: `ids.shape + [d_feature]`. Weights: `[kernel: [vocab_size, d_feature]]`.
#[derive(Debug, Clone)]
pub struct Embedding {
    vocab_size: usize,
    d_feature: usize,
    name: String,
}

impl Embedding {
    pub fn new(vocab_size: usize, d_feature: usize) -> Self {
        Self {
            vocab_size,
            d_feature,
            name: format!("Embedding_{}_{}", vocab_size, d_feature),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn d_feature(&self) -> usize {
        self.d_feature
    }

    fn ids(&self, x: &Tensor) -> Result<Vec<usize>> {
        x.iter()
            .map(|&v| {
                if v.fract() != 0.0 || v < 0.0 || v >= self.vocab_size as f32 {
                    Err(LayerError::IndexOutOfRange {
                        layer: self.name.clone(),
                        index: v as i64,
                        limit: self.vocab_size,
                    })
                } else {
                    Ok(v as usize)
                }
            })
            .collect()
    }
}

impl Layer for Embedding {
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
        let kernel = random_normal(&[self.vocab_size, self.d_feature], 1.0, rng)?;
        let mut out_shape = input_signature[0].shape.clone();
        out_shape.push(self.d_feature);
        Ok((Weights::leaf(vec![kernel]), vec![ShapeDtype::f32(out_shape)]))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        weights: &Weights,
        _ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let kernel = weights
            .tensor(0)?
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| shape_error(self, format!("kernel is not a matrix: {}", e)))?;
        if kernel.dim() != (self.vocab_size, self.d_feature) {
            return Err(shape_error(
                self,
                format!("kernel shape {:?} is wrong", kernel.shape()),
            ));
        }

        let ids = self.ids(&inputs[0])?;
        let rows: Vec<_> = ids.iter().map(|&i| kernel.row(i)).collect();
        let mut out_shape = inputs[0].shape().to_vec();
        out_shape.push(self.d_feature);
        let out = if rows.is_empty() {
            tensor::zeros(&out_shape)
        } else {
            let stacked = ndarray::stack(Axis(0), &rows)
                .map_err(|e| shape_error(self, e.to_string()))?;
            tensor::from_matrix(stacked, &out_shape)
                .ok_or_else(|| shape_error(self, format!("cannot reshape output to {:?}", out_shape)))?
        };
        Ok((vec![out], Cache::with_tensors(vec![inputs[0].clone()])))
    }

    fn backward(
        &self,
        cache: &Cache,
        _weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        let x = cache.tensor(0)?;
        let ids = self.ids(x)?;
        let mismatch = || {
            shape_error(
                self,
                format!("gradient shape {:?} does not match the output", grads[0].shape()),
            )
        };
        let g = tensor::to_matrix(&grads[0]).ok_or_else(mismatch)?;
        if g.nrows() != ids.len() || g.ncols() != self.d_feature {
            return Err(mismatch());
        }

        let mut d_kernel = ndarray::Array2::<f32>::zeros((self.vocab_size, self.d_feature));
        for (row, &id) in g.rows().into_iter().zip(&ids) {
            let mut target = d_kernel.row_mut(id);
            target += &row;
        }
        // Ids are not differentiable.
        Ok((
            vec![Tensor::zeros(x.raw_dim())],
            Weights::leaf(vec![d_kernel.into_dyn()]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn weights() -> Weights {
        Weights::leaf(vec![tensor::from_vec(
            &[3, 2],
            vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5],
        )
        .unwrap()])
    }

    #[test]
    fn test_lookup() {
        let ids = tensor::from_vec(&[2, 2], vec![2.0, 0.0, 1.0, 1.0]).unwrap();
        let out = Embedding::new(3, 2).apply(&[ids], &weights()).unwrap();
        assert_eq!(out[0].shape(), &[2, 2, 2]);
        assert_eq!(out[0][[0, 0, 1]], 2.5);
        assert_eq!(out[0][[1, 1, 0]], 1.0);
    }

    #[test]
    fn test_out_of_range_id() {
        let ids = tensor::from_vec(&[1], vec![3.0]).unwrap();
        let err = Embedding::new(3, 2).apply(&[ids], &weights()).unwrap_err();
        assert!(matches!(err, LayerError::IndexOutOfRange { index: 3, limit: 3, .. }));
    }

    #[test]
    fn test_fractional_id_rejected() {
        let ids = tensor::from_vec(&[1], vec![1.5]).unwrap();
        assert!(Embedding::new(3, 2).apply(&[ids], &weights()).is_err());
    }

    #[test]
    fn test_backward_accumulates_repeated_ids() {
        let layer = Embedding::new(3, 2);
        let ids = tensor::from_vec(&[3], vec![1.0, 1.0, 2.0]).unwrap();
        let mut ctx = Context::eval();
        let (_, cache) = layer.forward(&[ids], &weights(), &mut ctx).unwrap();
        let (_, dw) = layer
            .backward(&cache, &weights(), &[tensor::ones(&[3, 2])])
            .unwrap();
        assert_eq!(
            dw.tensors[0],
            tensor::from_vec(&[3, 2], vec![0.0, 0.0, 2.0, 2.0, 1.0, 1.0]).unwrap()
        );
    }

    #[test]
    fn test_init_signature() {
        let mut rng = StdRng::seed_from_u64(0);
        let (w, out) = Embedding::new(10, 4)
            .init(&[ShapeDtype::i32([2, 6])], &mut rng)
            .unwrap();
        assert_eq!(w.tensors[0].shape(), &[10, 4]);
        assert_eq!(out, vec![ShapeDtype::f32([2, 6, 4])]);
    }
}
