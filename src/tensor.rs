//! Module defining the `Tensor` type and small helpers shared by all layers.
//!
//! Tensors are plain dynamic-rank `ndarray` arrays of `f32`. Integer data
//! (token ids, class targets) is carried in the same arrays; the logical
//! dtype lives in the [`ShapeDtype`](crate::shapes::ShapeDtype) signature.

use ndarray::{Array2, ArrayD, Axis, IxDyn};

/// Dense N-dimensional array flowing between layers.
pub type Tensor = ArrayD<f32>;

/// Creates a tensor of zeros with the given shape.
pub fn zeros(shape: &[usize]) -> Tensor {
    ArrayD::zeros(IxDyn(shape))
}

/// Creates a tensor of ones with the given shape.
pub fn ones(shape: &[usize]) -> Tensor {
    ArrayD::ones(IxDyn(shape))
}

/// Creates a rank-0 tensor holding `value`.
pub fn scalar(value: f32) -> Tensor {
    ndarray::arr0(value).into_dyn()
}

/// Builds a tensor from a flat vector, returning `None` on a size mismatch.
pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Option<Tensor> {
    ArrayD::from_shape_vec(IxDyn(shape), data).ok()
}

/// Resolves a possibly negative axis against `ndim`.
pub fn normalize_axis(axis: isize, ndim: usize) -> Option<usize> {
    let resolved = if axis < 0 { ndim as isize + axis } else { axis };
    if resolved >= 0 && (resolved as usize) < ndim {
        Some(resolved as usize)
    } else {
        None
    }
}

/// Views `x` as a `[rows, cols]` matrix, where `cols` is its last dimension
/// and `rows` the product of the others. A scalar is a `[1, 1]` matrix.
///
/// Elements are copied in logical order, so non-standard layouts are fine.
pub fn to_matrix(x: &Tensor) -> Option<Array2<f32>> {
    let (cols, rows) = match x.shape().split_last() {
        Some((&cols, leading)) => (cols, leading.iter().product()),
        None => (1, 1),
    };
    let data: Vec<f32> = x.iter().copied().collect();
    Array2::from_shape_vec((rows, cols), data).ok()
}

/// Inverse of [`to_matrix`]: reshapes a matrix back to `shape`.
///
/// `None` if the element counts differ.
pub fn from_matrix(m: Array2<f32>, shape: &[usize]) -> Option<Tensor> {
    let data: Vec<f32> = m.iter().copied().collect();
    ArrayD::from_shape_vec(IxDyn(shape), data).ok()
}

/// Sums over the last axis keeping it as size 1.
pub fn sum_last_keepdims(x: &Tensor) -> Tensor {
    let axis = Axis(x.ndim().saturating_sub(1));
    x.sum_axis(axis).insert_axis(axis)
}

/// Index of the largest element along the last axis of each row.
pub fn argmax_last(x: &Tensor) -> Option<Vec<usize>> {
    let m = to_matrix(x)?;
    let indices = m
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best_i, best), (i, &v)| {
                    if v > best {
                        (i, v)
                    } else {
                        (best_i, best)
                    }
                })
                .0
        })
        .collect();
    Some(indices)
}

/// Maximum absolute elementwise difference; `None` if shapes differ.
pub fn max_abs_diff(a: &Tensor, b: &Tensor) -> Option<f32> {
    if a.shape() != b.shape() {
        return None;
    }
    Some(
        a.iter()
            .zip(b.iter())
            .fold(0.0f32, |acc, (x, y)| acc.max((x - y).abs())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_axis() {
        assert_eq!(normalize_axis(-1, 3), Some(2));
        assert_eq!(normalize_axis(0, 3), Some(0));
        assert_eq!(normalize_axis(3, 3), None);
        assert_eq!(normalize_axis(-4, 3), None);
    }

    #[test]
    fn test_matrix_round_trip_keeps_layout() {
        let x = from_vec(&[2, 2, 3], (0..12).map(|v| v as f32).collect()).unwrap();
        let m = to_matrix(&x).unwrap();
        assert_eq!(m.shape(), &[4, 3]);
        assert_eq!(m[[3, 2]], 11.0);
        let back = from_matrix(m, &[2, 2, 3]).unwrap();
        assert_eq!(back, x);
    }

    #[test]
    fn test_matrix_of_transposed_view() {
        let x = from_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let t = x.t().to_owned().into_dyn();
        let m = to_matrix(&t).unwrap();
        assert_eq!(m.row(0).to_vec(), vec![1.0, 4.0]);
    }

    #[test]
    fn test_argmax_last() {
        let x = from_vec(&[2, 3], vec![0.1, 0.7, 0.2, 0.9, 0.0, 0.1]).unwrap();
        assert_eq!(argmax_last(&x), Some(vec![1, 0]));
    }

    #[test]
    fn test_matrix_of_zero_width_keeps_rows() {
        let m = to_matrix(&zeros(&[3, 0])).unwrap();
        assert_eq!(m.dim(), (3, 0));
        let m = to_matrix(&scalar(2.0)).unwrap();
        assert_eq!(m.dim(), (1, 1));
        assert!(from_matrix(Array2::zeros((2, 3)), &[4, 2]).is_none());
    }
}
