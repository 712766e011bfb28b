//! Handling data abstractly as shapes and dtypes.
//!
//! A [`ShapeDtype`] stands in for an array when only its layout matters, most
//! importantly when initializing weights: layers receive an input
//! [`Signature`] and derive weight shapes from it without seeing any data.

use crate::tensor::{self, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeError {
    #[error("Invalid shape {actual:?}; expected {expected:?}.")]
    Mismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Axis {axis} is out of range for a rank-{rank} value.")]
    AxisOutOfRange { axis: isize, rank: usize },

    #[error("Invalid rank: expected at least {expected}D, got {actual}D.")]
    InvalidRank { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, ShapeError>;

/// Logical element type of a value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DType {
    #[default]
    F32,
    I32,
    Bool,
}

/// An array-like value abstracted as shape and dtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeDtype {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl ShapeDtype {
    /// Creates a `ShapeDtype`; arrays, slices and vectors all canonicalize to a `Vec`.
    pub fn new(shape: impl Into<Vec<usize>>, dtype: DType) -> Self {
        Self {
            shape: shape.into(),
            dtype,
        }
    }

    /// Float value of the given shape.
    pub fn f32(shape: impl Into<Vec<usize>>) -> Self {
        Self::new(shape, DType::F32)
    }

    /// Integer value of the given shape, e.g. token ids.
    pub fn i32(shape: impl Into<Vec<usize>>) -> Self {
        Self::new(shape, DType::I32)
    }

    /// Signature of a concrete tensor, tagged with `dtype`.
    pub fn of(tensor: &Tensor, dtype: DType) -> Self {
        Self::new(tensor.shape().to_vec(), dtype)
    }

    pub fn as_tuple(&self) -> (&[usize], DType) {
        (&self.shape, self.dtype)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// A zero-filled tensor matching this signature.
    pub fn zeros(&self) -> Tensor {
        tensor::zeros(&self.shape)
    }
}

impl fmt::Display for ShapeDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShapeDtype{{shape:{:?}, dtype:{:?}}}", self.shape, self.dtype)
    }
}

/// Either a single `ShapeDtype` or a tuple of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signature {
    Single(ShapeDtype),
    Tuple(Vec<ShapeDtype>),
}

impl Signature {
    /// Builds a signature from items: one item gives `Single`, anything else `Tuple`.
    pub fn from_items(mut items: Vec<ShapeDtype>) -> Self {
        if items.len() == 1 {
            Signature::Single(items.remove(0))
        } else {
            Signature::Tuple(items)
        }
    }

    /// Flat view of the signature's items.
    pub fn items(&self) -> &[ShapeDtype] {
        match self {
            Signature::Single(sd) => std::slice::from_ref(sd),
            Signature::Tuple(items) => items,
        }
    }

    pub fn into_items(self) -> Vec<ShapeDtype> {
        match self {
            Signature::Single(sd) => vec![sd],
            Signature::Tuple(items) => items,
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

impl From<ShapeDtype> for Signature {
    fn from(sd: ShapeDtype) -> Self {
        Signature::Single(sd)
    }
}

impl From<Vec<ShapeDtype>> for Signature {
    fn from(items: Vec<ShapeDtype>) -> Self {
        Signature::from_items(items)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signature::Single(sd) => write!(f, "{}", sd),
            Signature::Tuple(items) => {
                write!(f, "(")?;
                for (i, sd) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", sd)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Returns the float signature of the given tensors.
///
/// A single tensor yields `Signature::Single`, several yield a tuple.
/// Tensors carry no dtype of their own, so integer ids need
/// [`ShapeDtype::of`] with an explicit dtype.
pub fn signature(tensors: &[Tensor]) -> Signature {
    Signature::from_items(
        tensors
            .iter()
            .map(|t| ShapeDtype::of(t, DType::F32))
            .collect(),
    )
}

/// Splices signatures together by flattening their top level.
///
/// `sd1, (sd2, sd3, sd4), (), sd5` becomes `(sd1, sd2, sd3, sd4, sd5)`.
pub fn splice_signatures(sigs: &[Signature]) -> Signature {
    Signature::from_items(
        sigs.iter()
            .flat_map(|s| s.items().iter().cloned())
            .collect(),
    )
}

/// Checks that a tensor has the given shape.
pub fn assert_shape_equals(tensor: &Tensor, shape: &[usize]) -> Result<()> {
    if tensor.shape() == shape {
        Ok(())
    } else {
        Err(ShapeError::Mismatch {
            expected: shape.to_vec(),
            actual: tensor.shape().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_dtype_canonicalizes_shape() {
        let from_array = ShapeDtype::f32([2, 3]);
        let from_vec = ShapeDtype::new(vec![2, 3], DType::F32);
        let from_slice = ShapeDtype::f32(&[2usize, 3][..]);
        assert_eq!(from_array, from_vec);
        assert_eq!(from_vec, from_slice);
        assert_ne!(from_array, ShapeDtype::i32([2, 3]));
        assert_eq!(from_array.as_tuple(), (&[2usize, 3][..], DType::F32));
    }

    #[test]
    fn test_display() {
        let sd = ShapeDtype::f32([2, 3]);
        assert_eq!(sd.to_string(), "ShapeDtype{shape:[2, 3], dtype:F32}");
    }

    #[test]
    fn test_signature_single_vs_tuple() {
        let one = signature(&[tensor::zeros(&[4])]);
        assert_eq!(one, Signature::Single(ShapeDtype::f32([4])));

        let two = signature(&[tensor::zeros(&[4]), tensor::zeros(&[2, 2])]);
        assert_eq!(two.len(), 2);
        assert!(matches!(two, Signature::Tuple(_)));
    }

    #[test]
    fn test_signature_tags_float_unless_told() {
        let ids = tensor::zeros(&[2, 5]);
        assert_eq!(signature(&[ids.clone()]).items()[0].dtype, DType::F32);
        assert_eq!(ShapeDtype::of(&ids, DType::I32), ShapeDtype::i32([2, 5]));
    }

    #[test]
    fn test_splice_flattens_top_level() {
        let sd = |n: usize| ShapeDtype::f32([n]);
        let spliced = splice_signatures(&[
            Signature::Single(sd(1)),
            Signature::Tuple(vec![sd(2), sd(3), sd(4)]),
            Signature::Tuple(vec![]),
            Signature::Single(sd(5)),
        ]);
        assert_eq!(
            spliced,
            Signature::Tuple(vec![sd(1), sd(2), sd(3), sd(4), sd(5)])
        );
    }

    #[test]
    fn test_splice_single_element_collapses() {
        let spliced = splice_signatures(&[
            Signature::Tuple(vec![]),
            Signature::Single(ShapeDtype::i32([7])),
        ]);
        assert_eq!(spliced, Signature::Single(ShapeDtype::i32([7])));
    }

    #[test]
    fn test_assert_shape_equals() {
        let t = tensor::zeros(&[2, 5]);
        assert!(assert_shape_equals(&t, &[2, 5]).is_ok());
        let err = assert_shape_equals(&t, &[5, 2]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid shape [2, 5]; expected [5, 2].");
    }
}
