//! Activation layers: elementwise nonlinearities and (log-)softmax over the last axis.
//!
//! None of these layers have trainable weights.

use crate::nn::function::PureFn;
use crate::tensor::{sum_last_keepdims, Tensor};
use ndarray::Axis;

/// `max(0, x)`.
pub fn relu() -> PureFn {
    PureFn::new(
        "Relu",
        1,
        1,
        |x| Ok(vec![x[0].mapv(|v| v.max(0.0))]),
        |x, _y, g| {
            let mask = x[0].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
            Ok(vec![&g[0] * &mask])
        },
    )
}

/// `1 / (1 + exp(-x))`.
pub fn sigmoid() -> PureFn {
    PureFn::new(
        "Sigmoid",
        1,
        1,
        |x| Ok(vec![x[0].mapv(|v| 1.0 / (1.0 + (-v).exp()))]),
        |_x, y, g| {
            let dy = y[0].mapv(|s| s * (1.0 - s));
            Ok(vec![&g[0] * &dy])
        },
    )
}

/// Hyperbolic tangent.
pub fn tanh() -> PureFn {
    PureFn::new(
        "Tanh",
        1,
        1,
        |x| Ok(vec![x[0].mapv(f32::tanh)]),
        |_x, y, g| {
            let dy = y[0].mapv(|t| 1.0 - t * t);
            Ok(vec![&g[0] * &dy])
        },
    )
}

fn max_last_keepdims(x: &Tensor) -> Tensor {
    let axis = Axis(x.ndim() - 1);
    x.map_axis(axis, |row| row.fold(f32::NEG_INFINITY, |m, &v| m.max(v)))
        .insert_axis(axis)
}

fn check_rank(x: &Tensor) -> std::result::Result<(), String> {
    if x.ndim() == 0 {
        Err("softmax needs at least one axis".to_string())
    } else {
        Ok(())
    }
}

/// Log of the softmax over the last axis, computed stably.
pub fn log_softmax() -> PureFn {
    PureFn::new(
        "LogSoftmax",
        1,
        1,
        |x| {
            check_rank(&x[0])?;
            let shifted = &x[0] - &max_last_keepdims(&x[0]);
            let log_norm = sum_last_keepdims(&shifted.mapv(f32::exp)).mapv(f32::ln);
            Ok(vec![&shifted - &log_norm])
        },
        |_x, y, g| {
            let probs = y[0].mapv(f32::exp);
            let g_sum = sum_last_keepdims(&g[0]);
            Ok(vec![&g[0] - &(&probs * &g_sum)])
        },
    )
}

/// Softmax over the last axis.
pub fn softmax() -> PureFn {
    PureFn::new(
        "Softmax",
        1,
        1,
        |x| {
            check_rank(&x[0])?;
            let exp = (&x[0] - &max_last_keepdims(&x[0])).mapv(f32::exp);
            let norm = sum_last_keepdims(&exp);
            Ok(vec![&exp / &norm])
        },
        |_x, y, g| {
            let dot = sum_last_keepdims(&(&g[0] * &y[0]));
            Ok(vec![&y[0] * &(&g[0] - &dot)])
        },
    )
}
