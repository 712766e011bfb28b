// --- File: src/serialization/mod.rs ---

//! Saving and loading weights and training state.
//!
//! - **SafeTensors**: named tensors in a safe binary format
//! - **JSON**: checkpoint metadata and optimizer hyperparameters
//! - **Checkpoint**: full snapshots of model and optimizer state
//!
//! # Example
//!
//! ```rust,no_run
//! use layerstack::serialization::{load_safetensors, save_safetensors};
//! use layerstack::tensor;
//! use std::collections::HashMap;
//!
//! let mut weights = HashMap::new();
//! weights.insert("0.0".to_string(), tensor::zeros(&[4, 4]));
//! save_safetensors("model.safetensors", &weights).unwrap();
//!
//! let loaded = load_safetensors("model.safetensors").unwrap();
//! assert_eq!(loaded.len(), 1);
//! ```

pub mod checkpoint;
pub mod safetensors_io;

pub use checkpoint::{
    load_checkpoint, load_weights, save_checkpoint, save_weights, Checkpoint, CheckpointError,
    CheckpointManager, CheckpointMetadata, OptimizerState,
};
pub use safetensors_io::{
    list_tensors, load_safetensors, load_tensor, save_safetensors, tensor_info, SafeTensorsError,
};
