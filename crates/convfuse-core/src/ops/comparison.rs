//! Numerical comparison helpers used to check transformed networks

use crate::tensor::TensorElement;
use crate::{Result, Tensor, TensorError};

fn check_shapes<T>(operation: &str, a: &Tensor<T>, b: &Tensor<T>) -> Result<()> {
    if !a.same_shape(b) {
        return Err(TensorError::shape_mismatch(
            operation,
            &a.shape().to_string(),
            &b.shape().to_string(),
        ));
    }
    Ok(())
}

/// Largest absolute element-wise difference. NaN anywhere yields NaN.
pub fn max_abs_diff<T: TensorElement>(a: &Tensor<T>, b: &Tensor<T>) -> Result<T> {
    check_shapes("max_abs_diff", a, b)?;
    let mut worst = T::zero();
    for (&x, &y) in a.array().iter().zip(b.array().iter()) {
        let d = (x - y).abs();
        if d.is_nan() {
            return Ok(d);
        }
        if d > worst {
            worst = d;
        }
    }
    Ok(worst)
}

/// `|a - b| <= atol + rtol * |b|` for every element
pub fn allclose<T: TensorElement>(a: &Tensor<T>, b: &Tensor<T>, rtol: T, atol: T) -> Result<bool> {
    check_shapes("allclose", a, b)?;
    Ok(a
        .array()
        .iter()
        .zip(b.array().iter())
        .all(|(&x, &y)| (x - y).abs() <= atol + rtol * y.abs()))
}
