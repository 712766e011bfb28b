//! # Neural Network Layers Module
//!
//! Layers, combinators, and the [`Layer`] trait they share.
//!
//! Layers compose through a data stack: a combinator such as [`Serial`]
//! feeds the outputs of one sublayer to the next, with items a sublayer does
//! not consume passing through below it.
//!
//! ## Available Layers
//!
//! ### Core Layers
//! - [`Dense`]: Fully connected layer
//! - [`Embedding`]: Embedding lookup table
//! - [`LayerNorm`]: Layer normalization
//! - [`Dropout`]: Inverted dropout, active in train mode only
//!
//! ### Functions
//! - [`relu`], [`sigmoid`], [`tanh`], [`log_softmax`], [`softmax`]
//! - [`add`], [`multiply`], [`mean`], [`concatenate`]
//!
//! ### Combinators
//! - [`Serial`], [`Parallel`], [`Branch`], [`Residual`]
//! - [`Select`] and its shorthands [`dup`], [`swap`], [`drop_top`], [`identity`]
//!
//! ## Example
//!
//! ```
//! use layerstack::nn::{relu, Dense, Layer, Residual, LayerNorm};
//! use layerstack::serial;
//! use layerstack::shapes::ShapeDtype;
//! use rand::SeedableRng;
//!
//! let model = serial![
//!     Dense::new(16),
//!     Residual::new(vec![Box::new(LayerNorm::new()), Box::new(Dense::new(16)), Box::new(relu())]),
//!     Dense::new(4),
//! ];
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let (_weights, out) = model.init(&[ShapeDtype::f32([8, 3])], &mut rng).unwrap();
//! assert_eq!(out, vec![ShapeDtype::f32([8, 4])]);
//! ```

pub mod activations;
pub mod combinators;
pub mod dropout;
pub mod embedding;
pub mod function;
pub mod init;
pub mod linear;
pub mod module;
pub mod network;
pub mod norm;

pub use activations::{log_softmax, relu, sigmoid, softmax, tanh};
pub use combinators::{drop_top, dup, identity, swap, Branch, Parallel, Residual, Select, Serial};
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use function::{add, concatenate, mean, multiply, PureFn};
pub use linear::Dense;
pub use module::{Cache, Context, Layer, LayerError, Mode, Weights};
pub use network::Network;
pub use norm::LayerNorm;
