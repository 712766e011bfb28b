//! Training: one optimizer step at a time ([`Trainer`]) or a whole run
//! driven by a [`Config`](crate::config::Config) ([`train`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use layerstack::config::Config;
//! use layerstack::data::Inputs;
//! use layerstack::training::train;
//!
//! let config = Config::from_file("configs/seq2seq.toml").unwrap();
//! let inputs = Inputs::synthetic(&config.inputs, &config.model, config.train.seed);
//! let summary = train(&config, inputs).unwrap();
//! println!("final loss {:?}", summary.final_loss);
//! ```

pub mod train_loop;
pub mod trainer;

use crate::config::ConfigError;
use crate::nn::LayerError;
use crate::schedules::ScheduleError;
use crate::serialization::CheckpointError;
use thiserror::Error;

pub use train_loop::{train, TrainSummary};
pub use trainer::{EvalMetrics, StepOutput, Trainer};

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Loss is {loss} at step {step}.")]
    NonFiniteLoss { step: usize, loss: f32 },

    #[error("Input stream ended after {0} batch(es).")]
    StreamExhausted(usize),

    #[error("Checkpoint does not fit this trainer: {0}")]
    IncompatibleCheckpoint(String),
}

pub type Result<T> = std::result::Result<T, TrainError>;
