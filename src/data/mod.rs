//! # Data Module
//!
//! Batches of aligned token sequences and the streams that produce them.
//!
//! ## Key Components
//!
//! - [`Batch`]: padded `(inputs, targets, weights)` triple
//! - [`SyntheticTranslation`]: seeded, infinite stream of batches
//! - [`Inputs`]: the train and eval streams of a run
//!
//! ## Example
//!
//! ```
//! use layerstack::data::SyntheticTranslation;
//!
//! let mut stream = SyntheticTranslation::new(16, 16, 2, 8, 4, 0);
//! let batch = stream.next().unwrap();
//! assert_eq!(batch.inputs.shape(), &[4, 8]);
//! ```

pub mod batch;
pub mod synthetic;

pub use batch::{batch_signature, Batch};
pub use synthetic::{target_id, Inputs, SyntheticTranslation, PAD_ID};
