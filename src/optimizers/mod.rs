//! Optimizers that update a weight tree from its gradient tree.
//!
//! An optimizer keeps no per-weight state itself. Its state lives in slots:
//! one weight-shaped tree per kind of moment (none for SGD, velocity for
//! momentum, first and second moments for Adam), created by
//! [`Optimizer::init_slots`] and passed back into every update. This keeps
//! optimizers shareable and lets checkpoints save slots next to the weights.

use crate::nn::module::{LayerError, Result, Weights};
use crate::tensor::Tensor;
use std::collections::BTreeMap;
use std::fmt;

/// Common interface for all optimizers.
pub trait Optimizer: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Names of the slot trees this optimizer keeps, in slot order.
    fn slot_names(&self) -> &[&'static str];

    /// Updates one weight tensor in place.
    ///
    /// `step` is the 1-based number of this update; `slots` holds the
    /// tensor's entry from each slot tree, in [`slot_names`](Self::slot_names) order.
    fn update_tensor(
        &self,
        step: usize,
        learning_rate: f32,
        weight: &mut Tensor,
        grad: &Tensor,
        slots: &mut [&mut Tensor],
    );

    /// Hyperparameters recorded in checkpoint metadata.
    fn hyperparameters(&self) -> BTreeMap<String, f64>;

    /// Zero-initialized slot trees for `weights`.
    fn init_slots(&self, weights: &Weights) -> Vec<Weights> {
        self.slot_names()
            .iter()
            .map(|_| weights.zeros_like())
            .collect()
    }

    /// Applies one update to every tensor of `weights`.
    fn update(
        &self,
        step: usize,
        learning_rate: f32,
        weights: &mut Weights,
        grads: &Weights,
        slots: &mut [Weights],
    ) -> Result<()> {
        if !weights.same_structure(grads) {
            return Err(LayerError::WeightsStructure(
                "gradients do not match the weights".to_string(),
            ));
        }
        if slots.len() != self.slot_names().len()
            || slots.iter().any(|s| !weights.same_structure(s))
        {
            return Err(LayerError::WeightsStructure(format!(
                "{} expects {} slot tree(s) shaped like the weights",
                self.name(),
                self.slot_names().len()
            )));
        }

        let grad_list = grads.flatten();
        let mut slot_lists: Vec<Vec<&mut Tensor>> =
            slots.iter_mut().map(|s| s.flatten_mut()).collect();
        for (i, (weight, grad)) in weights.flatten_mut().into_iter().zip(grad_list).enumerate() {
            let mut tensor_slots: Vec<&mut Tensor> =
                slot_lists.iter_mut().map(|list| &mut *list[i]).collect();
            self.update_tensor(step, learning_rate, weight, grad, &mut tensor_slots);
        }
        Ok(())
    }
}

/// Global L2 norm of all gradients.
pub fn global_norm(grads: &Weights) -> f32 {
    grads
        .flatten()
        .iter()
        .map(|g| g.iter().map(|v| v * v).sum::<f32>())
        .sum::<f32>()
        .sqrt()
}

/// Rescales `grads` so their global norm is at most `max_norm`.
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut Weights, max_norm: f32) -> f32 {
    let norm = global_norm(grads);
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        for g in grads.flatten_mut() {
            g.mapv_inplace(|v| v * scale);
        }
    }
    norm
}

// ============================================================================
// SGD
// ============================================================================

/// Plain stochastic gradient descent: `w -= lr * (g + weight_decay_rate * w)`.
#[derive(Debug, Clone, Default)]
pub struct Sgd {
    weight_decay_rate: f32,
}

impl Sgd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weight_decay(weight_decay_rate: f32) -> Self {
        Self { weight_decay_rate }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &str {
        "sgd"
    }

    fn slot_names(&self) -> &[&'static str] {
        &[]
    }

    fn update_tensor(
        &self,
        _step: usize,
        learning_rate: f32,
        weight: &mut Tensor,
        grad: &Tensor,
        _slots: &mut [&mut Tensor],
    ) {
        let wd = self.weight_decay_rate;
        ndarray::azip!((w in weight, &g in grad) *w -= learning_rate * (g + wd * *w));
    }

    fn hyperparameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([(
            "weight_decay_rate".to_string(),
            self.weight_decay_rate as f64,
        )])
    }
}

// ============================================================================
// Momentum
// ============================================================================

/// SGD with (optionally Nesterov) momentum.
///
/// `v = mass * v + g`, then `w -= lr * (v + wd * w)`, or with Nesterov
/// `w -= lr * (mass * v + g + wd * w)`.
#[derive(Debug, Clone)]
pub struct Momentum {
    mass: f32,
    nesterov: bool,
    weight_decay_rate: f32,
}

impl Momentum {
    pub fn new(mass: f32) -> Self {
        Self {
            mass,
            nesterov: false,
            weight_decay_rate: 0.0,
        }
    }

    pub fn nesterov(mut self, nesterov: bool) -> Self {
        self.nesterov = nesterov;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay_rate: f32) -> Self {
        self.weight_decay_rate = weight_decay_rate;
        self
    }
}

impl Default for Momentum {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl Optimizer for Momentum {
    fn name(&self) -> &str {
        "momentum"
    }

    fn slot_names(&self) -> &[&'static str] {
        &["velocity"]
    }

    fn update_tensor(
        &self,
        _step: usize,
        learning_rate: f32,
        weight: &mut Tensor,
        grad: &Tensor,
        slots: &mut [&mut Tensor],
    ) {
        let (mass, wd, nesterov) = (self.mass, self.weight_decay_rate, self.nesterov);
        let velocity = &mut *slots[0];
        ndarray::azip!((w in weight, v in velocity, &g in grad) {
            *v = mass * *v + g;
            let direction = if nesterov { mass * *v + g } else { *v };
            *w -= learning_rate * (direction + wd * *w);
        });
    }

    fn hyperparameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("mass".to_string(), self.mass as f64),
            ("nesterov".to_string(), if self.nesterov { 1.0 } else { 0.0 }),
            ("weight_decay_rate".to_string(), self.weight_decay_rate as f64),
        ])
    }
}

// ============================================================================
// Adam
// ============================================================================

/// Adam with bias correction and decoupled weight decay.
#[derive(Debug, Clone)]
pub struct Adam {
    pub b1: f32,
    pub b2: f32,
    pub eps: f32,
    pub weight_decay_rate: f32,
}

impl Adam {
    pub fn new(b1: f32, b2: f32, eps: f32, weight_decay_rate: f32) -> Self {
        Self {
            b1,
            b2,
            eps,
            weight_decay_rate,
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-5, 1e-5)
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &str {
        "adam"
    }

    fn slot_names(&self) -> &[&'static str] {
        &["m", "v"]
    }

    fn update_tensor(
        &self,
        step: usize,
        learning_rate: f32,
        weight: &mut Tensor,
        grad: &Tensor,
        slots: &mut [&mut Tensor],
    ) {
        let Adam {
            b1,
            b2,
            eps,
            weight_decay_rate: wd,
        } = *self;
        let t = step.max(1) as i32;
        let m_correction = 1.0 - b1.powi(t);
        let v_correction = 1.0 - b2.powi(t);

        let (first, second) = slots.split_at_mut(1);
        let (m_t, v_t) = (&mut *first[0], &mut *second[0]);
        ndarray::azip!((w in weight, m in m_t, v in v_t, &g in grad) {
            *m = b1 * *m + (1.0 - b1) * g;
            *v = b2 * *v + (1.0 - b2) * g * g;
            let m_hat = *m / m_correction;
            let v_hat = *v / v_correction;
            *w -= learning_rate * (m_hat / (v_hat.sqrt() + eps) + wd * *w);
        });
    }

    fn hyperparameters(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("b1".to_string(), self.b1 as f64),
            ("b2".to_string(), self.b2 as f64),
            ("eps".to_string(), self.eps as f64),
            ("weight_decay_rate".to_string(), self.weight_decay_rate as f64),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    fn weights(values: Vec<f32>) -> Weights {
        let n = values.len();
        Weights::node(vec![Weights::leaf(vec![tensor::from_vec(&[n], values).unwrap()])])
    }

    #[test]
    fn test_sgd_step() {
        let opt = Sgd::new();
        let mut w = weights(vec![1.0, 2.0]);
        let g = weights(vec![0.5, -1.0]);
        let mut slots = opt.init_slots(&w);
        opt.update(1, 0.1, &mut w, &g, &mut slots).unwrap();
        let expected = tensor::from_vec(&[2], vec![0.95, 2.1]).unwrap();
        assert!(tensor::max_abs_diff(w.flatten()[0], &expected).unwrap() < 1e-6);
    }

    #[test]
    fn test_sgd_weight_decay() {
        let opt = Sgd::with_weight_decay(0.5);
        let mut w = weights(vec![2.0]);
        opt.update(1, 0.1, &mut w, &weights(vec![0.0]), &mut [])
            .unwrap();
        assert!((w.flatten()[0][0] - 1.9).abs() < 1e-6);
    }

    #[test]
    fn test_momentum_accumulates_velocity() {
        let opt = Momentum::new(0.5);
        let mut w = weights(vec![0.0]);
        let g = weights(vec![1.0]);
        let mut slots = opt.init_slots(&w);
        opt.update(1, 1.0, &mut w, &g, &mut slots).unwrap();
        opt.update(2, 1.0, &mut w, &g, &mut slots).unwrap();
        // Velocity 1.0 then 1.5.
        assert!((w.flatten()[0][0] + 2.5).abs() < 1e-6);
        assert!((slots[0].flatten()[0][0] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        let opt = Adam::new(0.9, 0.999, 1e-8, 0.0);
        let mut w = weights(vec![1.0, 1.0]);
        let g = weights(vec![3.0, -0.01]);
        let mut slots = opt.init_slots(&w);
        assert_eq!(slots.len(), 2);
        opt.update(1, 0.01, &mut w, &g, &mut slots).unwrap();
        // Bias-corrected first step is lr * sign(g).
        let flat = w.flatten();
        assert!((flat[0][0] - 0.99).abs() < 1e-5);
        assert!((flat[0][1] - 1.01).abs() < 1e-4);
    }

    #[test]
    fn test_update_rejects_mismatched_trees() {
        let opt = Adam::default();
        let mut w = weights(vec![1.0, 2.0]);
        let g = weights(vec![1.0]);
        let mut slots = opt.init_slots(&w);
        assert!(matches!(
            opt.update(1, 0.1, &mut w, &g, &mut slots),
            Err(LayerError::WeightsStructure(_))
        ));
        let g = weights(vec![1.0, 1.0]);
        assert!(opt.update(1, 0.1, &mut w, &g, &mut []).is_err());
    }

    #[test]
    fn test_clip_grad_norm() {
        let mut g = Weights::node(vec![
            Weights::leaf(vec![tensor::from_vec(&[1], vec![3.0]).unwrap()]),
            Weights::leaf(vec![tensor::from_vec(&[1], vec![4.0]).unwrap()]),
        ]);
        let norm = clip_grad_norm(&mut g, 1.0);
        assert!((norm - 5.0).abs() < 1e-6);
        assert!((global_norm(&g) - 1.0).abs() < 1e-6);

        let before = g.clone();
        clip_grad_norm(&mut g, 10.0);
        assert_eq!(g, before);
    }

    #[test]
    fn test_hyperparameters() {
        let hp = Adam::default().hyperparameters();
        assert_eq!(hp["b1"], 0.9f32 as f64);
        assert_eq!(hp.len(), 4);
    }
}
