//! # layerstack: composable neural-network layers in Rust
//!
//! **layerstack** builds models from small layers wired together by
//! combinators. Layers exchange values through a **data stack**: each layer
//! takes its inputs from the top of the stack and pushes its outputs back, so
//! `Serial`, `Branch`, `Parallel`, `Select` and `Residual` can route tensors
//! between layers without naming them. Weights are created from **shape/dtype
//! signatures** and kept in a tree that mirrors the layer tree.
//!
//! ## Usage Example
//!
//! ```
//! use layerstack::nn::{relu, Dense, Layer, LayerNorm, Network};
//! use layerstack::serial;
//! use layerstack::shapes::ShapeDtype;
//! use layerstack::tensor;
//!
//! // 1. Describe the model
//! let model = serial![Dense::new(16), relu(), LayerNorm::new(), Dense::new(4)];
//! assert_eq!((model.n_in(), model.n_out()), (1, 1));
//!
//! // 2. Create weights from an input signature
//! let mut net = Network::new(model);
//! net.init(&[ShapeDtype::f32([8, 3])], 0).unwrap();
//!
//! // 3. Run it
//! let y = net.call(&[tensor::ones(&[8, 3])]).unwrap();
//! assert_eq!(y[0].shape(), &[8, 4]);
//! ```

pub mod config;
pub mod data;
pub mod logging;
pub mod losses;
pub mod metrics;
pub mod models;
pub mod nn;
pub mod optimizers;
pub mod schedules;
pub mod serialization;
pub mod shapes;
pub mod tensor;
pub mod training;
