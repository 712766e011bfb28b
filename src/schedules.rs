//! Learning-rate schedules.
//!
//! A [`MultiFactor`] schedule multiplies together the factors named in a
//! string such as `"constant * linear_warmup * rsqrt_decay"`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Unknown learning-rate factor '{0}'.")]
    UnknownFactor(String),

    #[error("Empty learning-rate factor list.")]
    Empty,
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Maps a 1-based training step to a learning rate.
pub trait Schedule: fmt::Debug + Send + Sync {
    fn learning_rate(&self, step: usize) -> f32;
}

/// The same learning rate at every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub f32);

impl Schedule for Constant {
    fn learning_rate(&self, _step: usize) -> f32 {
        self.0
    }
}

/// One multiplicative term of a [`MultiFactor`] schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Constant,
    LinearWarmup,
    RsqrtDecay,
    RsqrtNormalizedDecay,
    DecayEvery,
    CosineDecay,
}

impl FromStr for Factor {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "constant" => Ok(Factor::Constant),
            "linear_warmup" => Ok(Factor::LinearWarmup),
            "rsqrt_decay" => Ok(Factor::RsqrtDecay),
            "rsqrt_normalized_decay" => Ok(Factor::RsqrtNormalizedDecay),
            "decay_every" => Ok(Factor::DecayEvery),
            "cosine_decay" => Ok(Factor::CosineDecay),
            other => Err(ScheduleError::UnknownFactor(other.to_string())),
        }
    }
}

/// Parses `"a * b * c"` into factors.
pub fn parse_factors(names: &str) -> Result<Vec<Factor>> {
    let factors = names
        .split('*')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(Factor::from_str)
        .collect::<Result<Vec<_>>>()?;
    if factors.is_empty() {
        return Err(ScheduleError::Empty);
    }
    Ok(factors)
}

/// Product of named factors, evaluated at each step.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiFactor {
    factors: Vec<Factor>,
    pub constant: f32,
    pub warmup_steps: usize,
    pub decay_factor: f32,
    pub steps_per_decay: usize,
    pub steps_per_cycle: usize,
}

impl MultiFactor {
    /// Schedule with the given factors and default parameters.
    pub fn new(factors: &str) -> Result<Self> {
        Ok(Self {
            factors: parse_factors(factors)?,
            constant: 0.1,
            warmup_steps: 400,
            decay_factor: 0.5,
            steps_per_decay: 20_000,
            steps_per_cycle: 100_000,
        })
    }

    pub fn with_constant(mut self, constant: f32) -> Self {
        self.constant = constant;
        self
    }

    pub fn with_warmup_steps(mut self, warmup_steps: usize) -> Self {
        self.warmup_steps = warmup_steps;
        self
    }

    pub fn with_decay(mut self, decay_factor: f32, steps_per_decay: usize) -> Self {
        self.decay_factor = decay_factor;
        self.steps_per_decay = steps_per_decay;
        self
    }

    pub fn with_steps_per_cycle(mut self, steps_per_cycle: usize) -> Self {
        self.steps_per_cycle = steps_per_cycle;
        self
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }
}

impl Schedule for MultiFactor {
    fn learning_rate(&self, step: usize) -> f32 {
        let step_f = step as f64;
        let warmup = self.warmup_steps as f64;
        let mut lr = 1.0f64;
        for factor in &self.factors {
            match factor {
                Factor::Constant => lr *= self.constant as f64,
                Factor::LinearWarmup => {
                    if self.warmup_steps > 0 {
                        lr *= (step_f / warmup).min(1.0);
                    }
                }
                Factor::RsqrtDecay => lr /= step_f.max(warmup).max(1.0).sqrt(),
                Factor::RsqrtNormalizedDecay => {
                    lr *= warmup.sqrt();
                    lr /= step_f.max(warmup).max(1.0).sqrt();
                }
                Factor::DecayEvery => {
                    let decays = step / self.steps_per_decay.max(1);
                    lr *= (self.decay_factor as f64).powi(decays as i32);
                }
                Factor::CosineDecay => {
                    let progress =
                        ((step_f - warmup) / self.steps_per_cycle.max(1) as f64).max(0.0);
                    lr *= 0.5 * (1.0 + (std::f64::consts::PI * (progress % 1.0)).cos());
                }
            }
        }
        lr as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() <= 1e-6 * b.abs().max(1.0)
    }

    #[test]
    fn test_parse_factors() {
        let factors = parse_factors("constant *linear_warmup*  rsqrt_decay").unwrap();
        assert_eq!(
            factors,
            vec![Factor::Constant, Factor::LinearWarmup, Factor::RsqrtDecay]
        );
        assert_eq!(
            parse_factors("constant * cubic").unwrap_err(),
            ScheduleError::UnknownFactor("cubic".to_string())
        );
        assert_eq!(parse_factors(" ").unwrap_err(), ScheduleError::Empty);
    }

    #[test]
    fn test_warmup_then_rsqrt_decay() {
        let s = MultiFactor::new("constant * linear_warmup * rsqrt_decay")
            .unwrap()
            .with_constant(1.0)
            .with_warmup_steps(100);
        // Linear ramp to 1/sqrt(100) at the end of warmup.
        assert!(close(s.learning_rate(50), 0.5 / 10.0));
        assert!(close(s.learning_rate(100), 0.1));
        assert!(close(s.learning_rate(400), 1.0 / 20.0));
    }

    #[test]
    fn test_rsqrt_normalized_decay_is_one_at_warmup_end() {
        let s = MultiFactor::new("rsqrt_normalized_decay")
            .unwrap()
            .with_warmup_steps(64);
        assert!(close(s.learning_rate(10), 1.0));
        assert!(close(s.learning_rate(256), 0.5));
    }

    #[test]
    fn test_decay_every() {
        let s = MultiFactor::new("constant * decay_every")
            .unwrap()
            .with_constant(2.0)
            .with_decay(0.5, 10);
        assert!(close(s.learning_rate(9), 2.0));
        assert!(close(s.learning_rate(10), 1.0));
        assert!(close(s.learning_rate(25), 0.5));
    }

    #[test]
    fn test_cosine_decay() {
        let s = MultiFactor::new("cosine_decay")
            .unwrap()
            .with_warmup_steps(0)
            .with_steps_per_cycle(100);
        assert!(close(s.learning_rate(0), 1.0));
        assert!(close(s.learning_rate(50), 0.5));
        assert!(s.learning_rate(99) < 0.01);
        assert!(close(s.learning_rate(100), 1.0));
    }

    #[test]
    fn test_constant_schedule() {
        assert_eq!(Constant(0.01).learning_rate(12345), 0.01);
    }
}
