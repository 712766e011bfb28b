//! Typed hyperparameter file.
//!
//! Training runs are described by a TOML file whose sections bind the
//! hyperparameters of each component:
//!
//! ```toml
//! [inputs]
//! batch_size = 16
//! max_length = 12
//!
//! [model]
//! d_model = 64
//! n_layers = 2
//!
//! [optimizer]
//! kind = "adam"
//! weight_decay_rate = 1e-5
//!
//! [lr_schedule]
//! factors = "constant * linear_warmup * rsqrt_decay"
//! constant = 1.0
//! warmup_steps = 200
//!
//! [train]
//! steps = 1000
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use crate::optimizers::{Adam, Momentum, Optimizer, Sgd};
use crate::schedules::{parse_factors, MultiFactor, ScheduleError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value for '{field}': {message}")]
    Invalid { field: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Complete hyperparameter set for a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub inputs: InputsConfig,
    pub model: ModelConfig,
    pub optimizer: OptimizerConfig,
    pub lr_schedule: LrScheduleConfig,
    pub train: TrainConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputsConfig {
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            eval_batch_size: 16,
            min_length: 4,
            max_length: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub d_model: usize,
    pub d_ff: usize,
    pub n_layers: usize,
    pub input_vocab_size: usize,
    pub output_vocab_size: usize,
    pub dropout: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            d_model: 32,
            d_ff: 64,
            n_layers: 2,
            input_vocab_size: 32,
            output_vocab_size: 32,
            dropout: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Momentum,
    Adam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub b1: f32,
    pub b2: f32,
    pub eps: f32,
    pub mass: f32,
    pub nesterov: bool,
    pub weight_decay_rate: f32,
    /// Global gradient-norm limit; no clipping when absent.
    pub clip_grad_norm: Option<f32>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            b1: 0.9,
            b2: 0.999,
            eps: 1e-5,
            mass: 0.9,
            nesterov: false,
            weight_decay_rate: 1e-5,
            clip_grad_norm: None,
        }
    }
}

impl OptimizerConfig {
    pub fn build(&self) -> Box<dyn Optimizer> {
        match self.kind {
            OptimizerKind::Sgd => Box::new(Sgd::with_weight_decay(self.weight_decay_rate)),
            OptimizerKind::Momentum => Box::new(
                Momentum::new(self.mass)
                    .nesterov(self.nesterov)
                    .with_weight_decay(self.weight_decay_rate),
            ),
            OptimizerKind::Adam => Box::new(Adam::new(
                self.b1,
                self.b2,
                self.eps,
                self.weight_decay_rate,
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LrScheduleConfig {
    pub factors: String,
    pub constant: f32,
    pub warmup_steps: usize,
    pub decay_factor: f32,
    pub steps_per_decay: usize,
    pub steps_per_cycle: usize,
}

impl Default for LrScheduleConfig {
    fn default() -> Self {
        Self {
            factors: "constant * linear_warmup * rsqrt_decay".to_string(),
            constant: 0.5,
            warmup_steps: 100,
            decay_factor: 0.5,
            steps_per_decay: 20_000,
            steps_per_cycle: 100_000,
        }
    }
}

impl LrScheduleConfig {
    pub fn build(&self) -> std::result::Result<MultiFactor, ScheduleError> {
        Ok(MultiFactor::new(&self.factors)?
            .with_constant(self.constant)
            .with_warmup_steps(self.warmup_steps)
            .with_decay(self.decay_factor, self.steps_per_decay)
            .with_steps_per_cycle(self.steps_per_cycle))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub steps: usize,
    /// Evaluate every this many steps; 0 evaluates only at the end.
    pub eval_frequency: usize,
    pub eval_steps: usize,
    /// Save a checkpoint every this many steps; 0 saves only at the end.
    pub checkpoint_frequency: usize,
    pub checkpoints_to_keep: usize,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            steps: 500,
            eval_frequency: 100,
            eval_steps: 4,
            checkpoint_frequency: 100,
            checkpoints_to_keep: 3,
            seed: 0,
            output_dir: PathBuf::from("runs/seq2seq"),
        }
    }
}

impl Config {
    /// Loads and validates a config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let inputs = &self.inputs;
        if inputs.batch_size == 0 {
            return Err(invalid("inputs.batch_size", "must be positive"));
        }
        if inputs.eval_batch_size == 0 {
            return Err(invalid("inputs.eval_batch_size", "must be positive"));
        }
        if inputs.min_length == 0 {
            return Err(invalid("inputs.min_length", "must be positive"));
        }
        if inputs.min_length > inputs.max_length {
            return Err(invalid(
                "inputs.min_length",
                format!(
                    "{} exceeds max_length {}",
                    inputs.min_length, inputs.max_length
                ),
            ));
        }

        let model = &self.model;
        for (field, value) in [
            ("model.d_model", model.d_model),
            ("model.d_ff", model.d_ff),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be positive"));
            }
        }
        for (field, value) in [
            ("model.input_vocab_size", model.input_vocab_size),
            ("model.output_vocab_size", model.output_vocab_size),
        ] {
            if value < 2 {
                return Err(invalid(field, "needs at least 2 ids (0 is padding)"));
            }
        }
        if !(0.0..1.0).contains(&model.dropout) {
            return Err(invalid(
                "model.dropout",
                format!("{} is outside [0, 1)", model.dropout),
            ));
        }

        let optimizer = &self.optimizer;
        if let Some(max_norm) = optimizer.clip_grad_norm {
            if !(max_norm > 0.0) {
                return Err(invalid("optimizer.clip_grad_norm", "must be positive"));
            }
        }
        if !(0.0..1.0).contains(&optimizer.b1) || !(0.0..1.0).contains(&optimizer.b2) {
            return Err(invalid("optimizer.b1/b2", "must lie in [0, 1)"));
        }

        parse_factors(&self.lr_schedule.factors)
            .map_err(|e| invalid("lr_schedule.factors", e.to_string()))?;
        if self.lr_schedule.steps_per_decay == 0 || self.lr_schedule.steps_per_cycle == 0 {
            return Err(invalid(
                "lr_schedule.steps_per_decay/steps_per_cycle",
                "must be positive",
            ));
        }

        if self.train.steps == 0 {
            return Err(invalid("train.steps", "must be positive"));
        }
        if self.train.checkpoints_to_keep == 0 {
            return Err(invalid("train.checkpoints_to_keep", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            [inputs]
            batch_size = 4

            [optimizer]
            kind = "momentum"
            mass = 0.8

            [train]
            steps = 20
            output_dir = "/tmp/run"
            "#,
        )
        .unwrap();
        assert_eq!(config.inputs.batch_size, 4);
        assert_eq!(config.inputs.max_length, 12);
        assert_eq!(config.optimizer.kind, OptimizerKind::Momentum);
        assert_eq!(config.optimizer.build().name(), "momentum");
        assert_eq!(config.train.output_dir, PathBuf::from("/tmp/run"));
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let err = Config::from_toml_str("[model]\nwidth = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation() {
        let err = Config::from_toml_str("[inputs]\nmin_length = 9\nmax_length = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "inputs.min_length"));

        let err = Config::from_toml_str("[model]\ndropout = 1.0\n").unwrap_err();
        assert!(err.to_string().contains("model.dropout"));

        let err = Config::from_toml_str("[model]\noutput_vocab_size = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err =
            Config::from_toml_str("[lr_schedule]\nfactors = \"constant * bogus\"\n").unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.model.n_layers = 5;
        config.optimizer.clip_grad_norm = Some(1.0);
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_shipped_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/configs/seq2seq.toml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.optimizer.kind, OptimizerKind::Adam);
        assert_eq!(config.optimizer.clip_grad_norm, Some(1.0));
        assert_eq!(config.train.steps, 500);
    }

    #[test]
    fn test_schedule_from_config() {
        let schedule = LrScheduleConfig::default().build().unwrap();
        assert_eq!(schedule.warmup_steps, 100);
        assert_eq!(schedule.constant, 0.5);
    }
}
