//! Weight initializers.

use crate::nn::module::{LayerError, Result};
use crate::tensor::Tensor;
use ndarray::IxDyn;
use ndarray_rand::rand_distr::{Normal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

/// Glorot (Xavier) uniform initialization for a `[fan_in, fan_out]` kernel.
pub fn glorot_uniform(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Tensor {
    let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    Tensor::random_using(IxDyn(&[fan_in, fan_out]), Uniform::new_inclusive(-limit, limit), rng)
}

/// Samples from `Normal(0, stddev)`.
pub fn random_normal(shape: &[usize], stddev: f32, rng: &mut StdRng) -> Result<Tensor> {
    let dist = Normal::new(0.0f32, stddev)
        .map_err(|e| LayerError::InvalidArgument(format!("normal initializer: {}", e)))?;
    Ok(Tensor::random_using(IxDyn(shape), dist, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_glorot_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let w = glorot_uniform(10, 20, &mut rng);
        let limit = (6.0f32 / 30.0).sqrt();
        assert_eq!(w.shape(), &[10, 20]);
        assert!(w.iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn test_seeded_initialization_is_deterministic() {
        let a = random_normal(&[4, 4], 1.0, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = random_normal(&[4, 4], 1.0, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_stddev_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(random_normal(&[2], -1.0, &mut rng).is_err());
    }
}
