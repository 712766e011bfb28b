// --- File: src/data/batch.rs ---

//! Padded batches of aligned token sequences.

use crate::shapes::{assert_shape_equals, DType, Result, ShapeDtype, ShapeError};
use crate::tensor::Tensor;

/// One training batch: `[batch, length]` source ids, target ids, and
/// per-position loss weights (0 on padding).
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Tensor,
    pub targets: Tensor,
    pub weights: Tensor,
}

impl Batch {
    /// Builds a batch, checking that all three tensors are `[batch, length]`
    /// and share a shape.
    pub fn new(inputs: Tensor, targets: Tensor, weights: Tensor) -> Result<Self> {
        if inputs.ndim() != 2 {
            return Err(ShapeError::InvalidRank {
                expected: 2,
                actual: inputs.ndim(),
            });
        }
        assert_shape_equals(&targets, inputs.shape())?;
        assert_shape_equals(&weights, inputs.shape())?;
        Ok(Self {
            inputs,
            targets,
            weights,
        })
    }

    /// Number of sequences in the batch.
    pub fn len(&self) -> usize {
        self.inputs.shape().first().copied().unwrap_or(0)
    }

    /// True for a batch with no sequences.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Padded sequence length.
    pub fn seq_len(&self) -> usize {
        self.inputs.shape().get(1).copied().unwrap_or(0)
    }

    /// Total weight of the non-padding positions.
    pub fn total_weight(&self) -> f32 {
        self.weights.sum()
    }

    /// The batch as a data stack: `[inputs, targets, weights]`.
    pub fn into_stack(self) -> Vec<Tensor> {
        vec![self.inputs, self.targets, self.weights]
    }
}

/// Input signature of the batches a model is trained on.
pub fn batch_signature(batch_size: usize, max_length: usize) -> Vec<ShapeDtype> {
    let shape = [batch_size, max_length];
    vec![
        ShapeDtype::new(shape, DType::I32),
        ShapeDtype::new(shape, DType::I32),
        ShapeDtype::new(shape, DType::F32),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn test_new_checks_shapes() {
        let ok = Batch::new(
            tensor::ones(&[2, 5]),
            tensor::ones(&[2, 5]),
            tensor::ones(&[2, 5]),
        )
        .unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok.seq_len(), 5);
        assert_eq!(ok.total_weight(), 10.0);

        let err = Batch::new(
            tensor::ones(&[2, 5]),
            tensor::ones(&[2, 4]),
            tensor::ones(&[2, 5]),
        )
        .unwrap_err();
        assert!(matches!(err, ShapeError::Mismatch { .. }));

        assert!(Batch::new(tensor::ones(&[5]), tensor::ones(&[5]), tensor::ones(&[5])).is_err());
    }

    #[test]
    fn test_into_stack_order() {
        let batch = Batch::new(
            tensor::zeros(&[1, 2]),
            tensor::ones(&[1, 2]),
            tensor::from_vec(&[1, 2], vec![1.0, 0.0]).unwrap(),
        )
        .unwrap();
        let stack = batch.into_stack();
        assert_eq!(stack.len(), 3);
        assert_eq!(stack[1], tensor::ones(&[1, 2]));
        assert_eq!(stack[2][[0, 1]], 0.0);
    }

    #[test]
    fn test_batch_signature() {
        let sig = batch_signature(8, 10);
        assert_eq!(sig[0], ShapeDtype::i32([8, 10]));
        assert_eq!(sig[2], ShapeDtype::f32([8, 10]));
    }
}
