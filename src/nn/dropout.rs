//! Dropout layer for regularization.
//!
//! During training, zeroes elements with probability `rate` and scales the
//! rest by `1 / (1 - rate)`. In eval and predict modes it passes its input
//! through unchanged.

use crate::nn::module::{
    check_grads, check_inputs, shape_error, Cache, Context, Layer, LayerError, Mode, Result,
    Weights,
};
use crate::shapes::ShapeDtype;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    name: String,
}

impl Dropout {
    /// Creates a dropout layer; `rate` must lie in `[0, 1)`.
    pub fn new(rate: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(LayerError::InvalidArgument(format!(
                "dropout rate must be in [0, 1), got {}",
                rate
            )));
        }
        Ok(Self {
            rate,
            name: format!("Dropout_{}", rate),
        })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Layer for Dropout {
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
        _rng: &mut StdRng,
    ) -> Result<(Weights, Vec<ShapeDtype>)> {
        check_inputs(self, input_signature.len())?;
        Ok((Weights::empty(), input_signature.to_vec()))
    }

    fn forward(
        &self,
        inputs: &[Tensor],
        _weights: &Weights,
        ctx: &mut Context,
    ) -> Result<(Vec<Tensor>, Cache)> {
        check_inputs(self, inputs.len())?;
        let x = &inputs[0];
        if ctx.mode() != Mode::Train || self.rate == 0.0 {
            return Ok((vec![x.clone()], Cache::default()));
        }

        let keep = 1.0 - self.rate;
        let rng = ctx.rng();
        let mask = x.mapv(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 });
        let y = x * &mask;
        Ok((vec![y], Cache::with_tensors(vec![mask])))
    }

    fn backward(
        &self,
        cache: &Cache,
        _weights: &Weights,
        grads: &[Tensor],
    ) -> Result<(Vec<Tensor>, Weights)> {
        check_grads(self, grads.len())?;
        // An empty cache means the forward pass was the identity.
        let dx = match cache.tensors.first() {
            None => grads[0].clone(),
            Some(mask) if mask.shape() == grads[0].shape() => &grads[0] * mask,
            Some(_) => return Err(shape_error(self, "gradient shape does not match the mask")),
        };
        Ok((vec![dx], Weights::empty()))
    }
}
