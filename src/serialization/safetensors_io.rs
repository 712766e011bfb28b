// --- File: src/serialization/safetensors_io.rs ---

//! Reading and writing named tensors in the SafeTensors format.
//!
//! SafeTensors is a simple binary layout (a JSON header followed by raw
//! little-endian buffers) that cannot execute code on load. Tensors are
//! written as `F32`; `F64` files are accepted and narrowed on load.

use crate::tensor::Tensor;
use ndarray::{ArrayD, IxDyn};
use safetensors::serialize_to_file;
use safetensors::tensor::{SafeTensors, TensorView};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SafeTensorsError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensorsError(#[from] safetensors::SafeTensorError),

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("Tensor '{name}' holds {actual} values, shape {shape:?} needs {expected}")]
    ShapeMismatch {
        name: String,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Tensor '{0}' not found")]
    TensorNotFound(String),
}

pub type Result<T> = std::result::Result<T, SafeTensorsError>;

/// Writes `tensors` to `path` as F32, in name order.
pub fn save_safetensors<P: AsRef<Path>>(path: P, tensors: &HashMap<String, Tensor>) -> Result<()> {
    let ordered: BTreeMap<&str, &Tensor> =
        tensors.iter().map(|(k, v)| (k.as_str(), v)).collect();

    // Views borrow their bytes, so all buffers are built first.
    let buffers: Vec<Vec<u8>> = ordered
        .values()
        .map(|t| t.iter().flat_map(|x| x.to_le_bytes()).collect())
        .collect();

    let mut views: Vec<(&str, TensorView<'_>)> = Vec::with_capacity(ordered.len());
    for ((name, tensor), data) in ordered.iter().zip(&buffers) {
        views.push((
            *name,
            TensorView::new(safetensors::Dtype::F32, tensor.shape().to_vec(), data)?,
        ));
    }

    serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

fn decode(name: &str, shape: &[usize], floats: Vec<f32>) -> Result<Tensor> {
    let actual = floats.len();
    ArrayD::from_shape_vec(IxDyn(shape), floats).map_err(|_| SafeTensorsError::ShapeMismatch {
        name: name.to_string(),
        shape: shape.to_vec(),
        expected: shape.iter().product(),
        actual,
    })
}

/// Reads every tensor in `path`.
pub fn load_safetensors<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Tensor>> {
    let buffer = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut result = HashMap::new();
    for (name, view) in tensors.tensors() {
        let floats: Vec<f32> = match view.dtype() {
            safetensors::Dtype::F32 => view
                .data()
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            safetensors::Dtype::F64 => view
                .data()
                .chunks_exact(8)
                .map(|c| {
                    f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                })
                .collect(),
            other => return Err(SafeTensorsError::UnsupportedDtype(format!("{:?}", other))),
        };
        let tensor = decode(&name, view.shape(), floats)?;
        result.insert(name, tensor);
    }
    Ok(result)
}

/// Reads a single tensor by name.
pub fn load_tensor<P: AsRef<Path>>(path: P, name: &str) -> Result<Tensor> {
    load_safetensors(path)?
        .remove(name)
        .ok_or_else(|| SafeTensorsError::TensorNotFound(name.to_string()))
}

/// Names of the tensors stored in `path`, sorted.
pub fn list_tensors<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let buffer = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;
    let mut names: Vec<String> = tensors.names().into_iter().cloned().collect();
    names.sort();
    Ok(names)
}

/// `(name, shape, dtype)` of each tensor in `path`, sorted by name.
pub fn tensor_info<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Vec<usize>, String)>> {
    let buffer = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&buffer)?;
    let mut info: Vec<(String, Vec<usize>, String)> = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| (name, view.shape().to_vec(), format!("{:?}", view.dtype())))
        .collect();
    info.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(info)
}
