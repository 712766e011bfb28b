// --- File: src/metrics/mod.rs ---

//! Metric bookkeeping for training and evaluation.
//!
//! The metric values themselves come from layers such as
//! [`Accuracy`](crate::losses::Accuracy); this module averages them over
//! batches and keeps their history.
//!
//! # Example
//!
//! ```rust
//! use layerstack::metrics::{MetricLogger, RunningMean};
//!
//! let mut mean = RunningMean::new();
//! mean.update(0.5);
//! mean.update(1.5);
//! assert_eq!(mean.compute(), 1.0);
//!
//! let mut logger = MetricLogger::new();
//! logger.log("loss", mean.compute());
//! logger.end_step(100);
//! assert_eq!(logger.last("loss"), Some(1.0));
//! ```

pub mod running;

pub use running::{MetricLogger, RunningMean};
