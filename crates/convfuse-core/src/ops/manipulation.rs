//! Shape manipulation: concatenation and space-to-depth reorganization

use crate::tensor::TensorElement;
use crate::{Result, Tensor, TensorError};
use ndarray::{Array4, ArrayViewD, Axis, Ix4};

/// Concatenate tensors along `axis`. All other dimensions must agree.
pub fn concat<T: TensorElement>(tensors: &[&Tensor<T>], axis: usize) -> Result<Tensor<T>> {
    let first = tensors.first().ok_or_else(|| {
        TensorError::invalid_argument_op("concat", "cannot concatenate an empty list of tensors")
    })?;
    let rank = first.shape().rank();
    if axis >= rank {
        return Err(TensorError::invalid_argument_op(
            "concat",
            &format!("axis {axis} out of range for rank {rank}"),
        ));
    }

    for (i, t) in tensors.iter().enumerate().skip(1) {
        let compatible = t.shape().rank() == rank
            && t
                .shape()
                .dims()
                .iter()
                .zip(first.shape().dims())
                .enumerate()
                .all(|(d, (a, b))| d == axis || a == b);
        if !compatible {
            return Err(TensorError::shape_mismatch(
                "concat",
                &format!("{} (except axis {axis})", first.shape()),
                &format!("{} for input {i}", t.shape()),
            ));
        }
    }

    let views: Vec<ArrayViewD<'_, T>> = tensors.iter().map(|t| t.view()).collect();
    let joined = ndarray::concatenate(Axis(axis), &views)
        .map_err(|e| TensorError::invalid_shape_simple(e.to_string()))?;
    Ok(Tensor::from_array(joined))
}

/// Space-to-depth reorganization.
///
/// `[B, C, H, W] -> [B, s*s*C, H/s, W/s]` where output channel
/// `(i * s + j) * C + c` at `(h, w)` holds input channel `c` at
/// `(h * s + i, w * s + j)`. Channels for one sub-pixel offset stay contiguous.
pub fn reorg<T: TensorElement>(input: &Tensor<T>, stride: usize) -> Result<Tensor<T>> {
    let x = input.view().into_dimensionality::<Ix4>().map_err(|_| {
        TensorError::invalid_shape("reorg", "input must be 4D (NCHW format)", input.shape().dims())
    })?;
    let (batch, channels, height, width) = x.dim();
    if stride == 0 || height % stride != 0 || width % stride != 0 {
        return Err(TensorError::invalid_argument_op(
            "reorg",
            &format!("spatial size {height}x{width} is not divisible by stride {stride}"),
        ));
    }

    let (out_h, out_w) = (height / stride, width / stride);
    let mut output = Array4::<T>::zeros((batch, stride * stride * channels, out_h, out_w));
    for b in 0..batch {
        for i in 0..stride {
            for j in 0..stride {
                let block = (i * stride + j) * channels;
                for c in 0..channels {
                    for h in 0..out_h {
                        for w in 0..out_w {
                            output[[b, block + c, h, w]] = x[[b, c, h * stride + i, w * stride + j]];
                        }
                    }
                }
            }
        }
    }
    Ok(Tensor::from_array(output.into_dyn()))
}
