//! 2D convolution
//!
//! Direct (non-im2col) grouped convolution over NCHW tensors. This is the
//! executable definition of what a convolution layer computes and is what the
//! fusion equivalence tests compare against, so it favors a fixed, obvious
//! accumulation order over speed.

use crate::tensor::TensorElement;
use crate::{Result, Tensor, TensorError};
use ndarray::{Array4, Ix1, Ix4};

/// Output spatial size of a convolution or pooling window along one axis.
pub fn output_dim(input: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = input + 2 * padding;
    if stride == 0 || kernel == 0 || padded < kernel {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

/// Performs grouped 2D convolution with zero padding.
///
/// Input shape: `[batch, in_channels, height, width]`
/// Weight shape: `[out_channels, in_channels / groups, kernel_h, kernel_w]`
/// Bias shape: `[out_channels]`
/// Output shape: `[batch, out_channels, out_h, out_w]`
///
/// Output channel `o` belongs to group `o / (out_channels / groups)` and only
/// reads the input channels of that group. `groups == 1` is an ordinary
/// convolution, `groups == in_channels` a depthwise one.
pub fn conv2d<T: TensorElement>(
    input: &Tensor<T>,
    weight: &Tensor<T>,
    bias: Option<&Tensor<T>>,
    stride: (usize, usize),
    padding: (usize, usize),
    groups: usize,
) -> Result<Tensor<T>> {
    let x = input
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| {
            TensorError::invalid_shape(
                "conv2d",
                "input must be 4D (NCHW format)",
                input.shape().dims(),
            )
        })?;
    let w = weight
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| {
            TensorError::invalid_shape("conv2d", "weight must be 4D", weight.shape().dims())
        })?;

    let (batch, in_channels, in_h, in_w) = x.dim();
    let (out_channels, group_in, kernel_h, kernel_w) = w.dim();

    if groups == 0 || in_channels % groups != 0 || out_channels % groups != 0 {
        return Err(TensorError::invalid_argument_op(
            "conv2d",
            &format!(
                "groups={groups} must divide in_channels={in_channels} and out_channels={out_channels}"
            ),
        ));
    }
    if group_in * groups != in_channels {
        return Err(TensorError::shape_mismatch(
            "conv2d",
            &format!("{} input channels per group", in_channels / groups),
            &format!("weight with {group_in} input channels per group"),
        ));
    }

    let out_h = output_dim(in_h, kernel_h, stride.0, padding.0).ok_or_else(|| {
        TensorError::invalid_argument_op(
            "conv2d",
            &format!("kernel height {kernel_h} does not fit input height {in_h} with padding {}", padding.0),
        )
    })?;
    let out_w = output_dim(in_w, kernel_w, stride.1, padding.1).ok_or_else(|| {
        TensorError::invalid_argument_op(
            "conv2d",
            &format!("kernel width {kernel_w} does not fit input width {in_w} with padding {}", padding.1),
        )
    })?;

    let b = match bias {
        Some(bias) => {
            let b = bias.view().into_dimensionality::<Ix1>().map_err(|_| {
                TensorError::invalid_shape("conv2d", "bias must be 1D", bias.shape().dims())
            })?;
            if b.len() != out_channels {
                return Err(TensorError::shape_mismatch(
                    "conv2d",
                    &format!("bias of length {out_channels}"),
                    &format!("bias of length {}", b.len()),
                ));
            }
            Some(b)
        }
        None => None,
    };

    let out_per_group = out_channels / groups;
    let mut output = Array4::<T>::zeros((batch, out_channels, out_h, out_w));

    for n in 0..batch {
        for o in 0..out_channels {
            let first_in = (o / out_per_group) * group_in;
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = T::zero();
                    for ci in 0..group_in {
                        for ky in 0..kernel_h {
                            let iy = (oy * stride.0 + ky) as isize - padding.0 as isize;
                            if iy < 0 || iy as usize >= in_h {
                                continue;
                            }
                            for kx in 0..kernel_w {
                                let ix = (ox * stride.1 + kx) as isize - padding.1 as isize;
                                if ix < 0 || ix as usize >= in_w {
                                    continue;
                                }
                                acc = acc
                                    + x[[n, first_in + ci, iy as usize, ix as usize]]
                                        * w[[o, ci, ky, kx]];
                            }
                        }
                    }
                    if let Some(ref b) = b {
                        acc = acc + b[o];
                    }
                    output[[n, o, oy, ox]] = acc;
                }
            }
        }
    }

    Ok(Tensor::from_array(output.into_dyn()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dim() {
        assert_eq!(output_dim(8, 3, 1, 1), Some(8));
        assert_eq!(output_dim(8, 3, 2, 1), Some(4));
        assert_eq!(output_dim(2, 3, 1, 0), None);
        assert_eq!(output_dim(4, 2, 0, 0), None);
    }

    #[test]
    fn test_conv2d_identity_kernel() {
        let input = Tensor::from_vec((0..9).map(|v| v as f32).collect(), &[1, 1, 3, 3]).unwrap();
        let weight = Tensor::from_vec(vec![1.0f32], &[1, 1, 1, 1]).unwrap();
        let out = conv2d(&input, &weight, None, (1, 1), (0, 0), 1).unwrap();
        assert_eq!(out.to_vec(), input.to_vec());
    }

    #[test]
    fn test_conv2d_padding_and_bias() {
        // 3x3 box filter over a 2x2 input of ones with same-padding
        let input = Tensor::<f32>::ones(&[1, 1, 2, 2]);
        let weight = Tensor::<f32>::ones(&[1, 1, 3, 3]);
        let bias = Tensor::from_vec(vec![0.5f32], &[1]).unwrap();
        let out = conv2d(&input, &weight, Some(&bias), (1, 1), (1, 1), 1).unwrap();
        assert_eq!(out.shape().dims(), &[1, 1, 2, 2]);
        assert_eq!(out.to_vec(), vec![4.5, 4.5, 4.5, 4.5]);
    }

    #[test]
    fn test_conv2d_stride() {
        let input = Tensor::from_vec((0..16).map(|v| v as f32).collect(), &[1, 1, 4, 4]).unwrap();
        let weight = Tensor::<f32>::ones(&[1, 1, 2, 2]);
        let out = conv2d(&input, &weight, None, (2, 2), (0, 0), 1).unwrap();
        assert_eq!(out.shape().dims(), &[1, 1, 2, 2]);
        assert_eq!(out.to_vec(), vec![10.0, 18.0, 42.0, 50.0]);
    }

    #[test]
    fn test_depthwise_keeps_channels_separate() {
        // channel 0 = ones, channel 1 = twos; per-channel weights 3 and 5
        let mut data = vec![1.0f32; 4];
        data.extend(vec![2.0f32; 4]);
        let input = Tensor::from_vec(data, &[1, 2, 2, 2]).unwrap();
        let weight = Tensor::from_vec(vec![3.0f32, 5.0], &[2, 1, 1, 1]).unwrap();

        let out = conv2d(&input, &weight, None, (1, 1), (0, 0), 2).unwrap();
        assert_eq!(out.to_vec(), vec![3.0, 3.0, 3.0, 3.0, 10.0, 10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_conv2d_rejects_group_mismatch() {
        let input = Tensor::<f32>::ones(&[1, 4, 3, 3]);
        let weight = Tensor::<f32>::ones(&[4, 1, 1, 1]);
        // depthwise weight used as a standard conv
        assert!(matches!(
            conv2d(&input, &weight, None, (1, 1), (0, 0), 1),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            conv2d(&input, &weight, None, (1, 1), (0, 0), 3),
            Err(TensorError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_conv2d_rejects_bad_bias() {
        let input = Tensor::<f32>::ones(&[1, 1, 3, 3]);
        let weight = Tensor::<f32>::ones(&[2, 1, 1, 1]);
        let bias = Tensor::<f32>::ones(&[3]);
        assert!(conv2d(&input, &weight, Some(&bias), (1, 1), (0, 0), 1).is_err());
    }
}
