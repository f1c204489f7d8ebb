//! 2D pooling over NCHW tensors (valid padding)

use super::conv::output_dim;
use crate::tensor::TensorElement;
use crate::{Result, Tensor, TensorError};
use ndarray::{Array4, ArrayView4, Ix4};

fn pool2d<T, F>(
    operation: &str,
    input: &Tensor<T>,
    kernel_size: (usize, usize),
    stride: (usize, usize),
    mut reduce: F,
) -> Result<Tensor<T>>
where
    T: TensorElement,
    F: FnMut(ArrayView4<'_, T>, usize, usize, usize, usize) -> T,
{
    let x = input.view().into_dimensionality::<Ix4>().map_err(|_| {
        TensorError::invalid_shape(operation, "input must be 4D (NCHW format)", input.shape().dims())
    })?;
    let (batch, channels, in_h, in_w) = x.dim();

    let out_h = output_dim(in_h, kernel_size.0, stride.0, 0);
    let out_w = output_dim(in_w, kernel_size.1, stride.1, 0);
    let (out_h, out_w) = match (out_h, out_w) {
        (Some(h), Some(w)) => (h, w),
        _ => {
            return Err(TensorError::invalid_argument_op(
                operation,
                &format!(
                    "window {kernel_size:?} with stride {stride:?} does not fit input {in_h}x{in_w}"
                ),
            ))
        }
    };

    let mut output = Array4::<T>::zeros((batch, channels, out_h, out_w));
    for n in 0..batch {
        for c in 0..channels {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    output[[n, c, oy, ox]] = reduce(x.view(), n, c, oy * stride.0, ox * stride.1);
                }
            }
        }
    }
    Ok(Tensor::from_array(output.into_dyn()))
}

pub fn max_pool2d<T: TensorElement>(
    input: &Tensor<T>,
    kernel_size: (usize, usize),
    stride: (usize, usize),
) -> Result<Tensor<T>> {
    pool2d("max_pool2d", input, kernel_size, stride, |x, n, c, y0, x0| {
        let mut best = T::neg_infinity();
        for ky in 0..kernel_size.0 {
            for kx in 0..kernel_size.1 {
                let v = x[[n, c, y0 + ky, x0 + kx]];
                if v > best {
                    best = v;
                }
            }
        }
        best
    })
}

pub fn avg_pool2d<T: TensorElement>(
    input: &Tensor<T>,
    kernel_size: (usize, usize),
    stride: (usize, usize),
) -> Result<Tensor<T>> {
    let count = T::from_usize(kernel_size.0 * kernel_size.1).unwrap_or_else(T::one);
    pool2d("avg_pool2d", input, kernel_size, stride, |x, n, c, y0, x0| {
        let mut sum = T::zero();
        for ky in 0..kernel_size.0 {
            for kx in 0..kernel_size.1 {
                sum = sum + x[[n, c, y0 + ky, x0 + kx]];
            }
        }
        sum / count
    })
}
