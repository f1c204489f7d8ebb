//! Convolution + batch-norm folding.
//!
//! Inference-mode batch norm is a per-channel affine map, so it can be folded
//! into the convolution feeding it:
//!
//! ```text
//! std[c]     = sqrt(running_var[c] + eps)
//! scale[c]   = gamma[c] / std[c]
//! weight'[c] = scale[c] * weight[c]
//! bias'[c]   = scale[c] * bias[c] + (beta[c] - (gamma[c] * mean[c]) / std[c])
//! ```
//!
//! The weight is treated as the `[out_channels, in_channels / groups * kh * kw]`
//! matrix left-multiplied by `diag(scale)`, which is the same arithmetic for
//! standard, grouped and depthwise convolutions. `groups` is carried through.

use super::error::FusionError;
use crate::layers::{BNParams, Conv2D, ConvParams, Layer};
use convfuse_core::{Tensor, TensorElement, TensorError};
use ndarray::Axis;
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Which kind of convolution a fused pair was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum FusionVariant {
    /// `groups == 1`
    Standard,
    /// `groups == in_channels`
    Depthwise,
    /// Any other grouping
    Grouped,
}

impl FusionVariant {
    /// Classify a convolution by its grouping.
    pub fn of<T: TensorElement>(conv: &ConvParams<T>) -> Self {
        if conv.groups() == 1 {
            FusionVariant::Standard
        } else if conv.is_depthwise() {
            FusionVariant::Depthwise
        } else {
            FusionVariant::Grouped
        }
    }
}

impl fmt::Display for FusionVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FusionVariant::Standard => "standard",
            FusionVariant::Depthwise => "depthwise",
            FusionVariant::Grouped => "grouped",
        };
        f.write_str(name)
    }
}

/// Convolution produced by folding a batch norm.
///
/// Always carries a bias, and keeps the weight shape and `groups` of the
/// convolution it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedConv<T>(ConvParams<T>);

impl<T: TensorElement> FusedConv<T> {
    /// Kind of convolution this was fused from.
    pub fn variant(&self) -> FusionVariant {
        FusionVariant::of(&self.0)
    }

    /// The fused bias; present by construction.
    pub fn fused_bias(&self) -> Option<&Tensor<T>> {
        self.0.bias()
    }

    /// Unwrap into the underlying convolution descriptor.
    pub fn into_params(self) -> ConvParams<T> {
        self.0
    }

    /// Wrap as a convolution layer.
    pub fn into_layer(self) -> Layer<T> {
        Layer::Convolution(Conv2D::new(self.0))
    }
}

impl<T> Deref for FusedConv<T> {
    type Target = ConvParams<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: TensorElement> From<FusedConv<T>> for ConvParams<T> {
    fn from(fused: FusedConv<T>) -> Self {
        fused.0
    }
}

impl<T: TensorElement> From<FusedConv<T>> for Conv2D<T> {
    fn from(fused: FusedConv<T>) -> Self {
        Conv2D::new(fused.0)
    }
}

fn to_f64<T: TensorElement>(value: T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Fold `bn` into `conv`.
///
/// Fails with [`FusionError::ShapeMismatch`] when the batch norm does not
/// match the convolution's output channels, and with
/// [`FusionError::DegenerateVariance`] when `running_var[c] + eps` is not
/// strictly positive for some channel. Every channel is checked before any
/// square root is taken.
pub fn fuse<T: TensorElement>(
    conv: &ConvParams<T>,
    bn: &BNParams<T>,
) -> Result<FusedConv<T>, FusionError> {
    let channels = conv.out_channels();
    if bn.num_features() != channels {
        return Err(FusionError::ShapeMismatch {
            layer_index: None,
            conv_out_channels: channels,
            bn_features: bn.num_features(),
        });
    }

    let eps = bn.eps();
    let running_var = bn.running_var().to_vec();
    if let Some((channel, &var)) = running_var
        .iter()
        .enumerate()
        .find(|(_, var)| !(**var + eps > T::zero()))
    {
        return Err(FusionError::DegenerateVariance {
            layer_index: None,
            channel,
            running_var: to_f64(var),
            eps: to_f64(eps),
        });
    }

    let gamma = bn.scale().to_vec();
    let beta = bn.shift().to_vec();
    let mean = bn.running_mean().to_vec();
    let std: Vec<T> = running_var.iter().map(|&var| (var + eps).sqrt()).collect();
    let scale: Vec<T> = gamma.iter().zip(&std).map(|(&g, &s)| g / s).collect();

    let mut weight = conv.weight().array().clone();
    for (mut filter, &s) in weight.axis_iter_mut(Axis(0)).zip(&scale) {
        filter.mapv_inplace(|w| s * w);
    }

    let bias = conv.bias_or_zeros();
    let fused_bias: Vec<T> = (0..channels)
        .map(|c| scale[c] * bias[c] + (beta[c] - (gamma[c] * mean[c]) / std[c]))
        .collect();

    let params = conv
        .clone()
        .with_weight(Tensor::from_array(weight))?
        .with_bias(Some(Tensor::from_vec(fused_bias, &[channels])?))?;

    log::trace!(
        "fused {} convolution {}->{} k={:?} groups={} with batch norm",
        FusionVariant::of(&params),
        params.in_channels(),
        params.out_channels(),
        params.kernel_size(),
        params.groups()
    );
    Ok(FusedConv(params))
}

/// [`fuse`] for a convolution expected to have `groups == 1`.
pub fn fuse_standard<T: TensorElement>(
    conv: &ConvParams<T>,
    bn: &BNParams<T>,
) -> Result<FusedConv<T>, FusionError> {
    if conv.groups() != 1 {
        return Err(TensorError::invalid_argument_op(
            "fuse_standard",
            &format!("expected groups=1, got groups={}", conv.groups()),
        )
        .into());
    }
    fuse(conv, bn)
}

/// [`fuse`] for a convolution expected to have `groups == in_channels`.
pub fn fuse_grouped<T: TensorElement>(
    conv: &ConvParams<T>,
    bn: &BNParams<T>,
) -> Result<FusedConv<T>, FusionError> {
    if conv.groups() != conv.in_channels() {
        return Err(TensorError::invalid_argument_op(
            "fuse_grouped",
            &format!(
                "expected groups={} (one per input channel), got groups={}",
                conv.in_channels(),
                conv.groups()
            ),
        )
        .into());
    }
    fuse(conv, bn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{BatchNorm, Conv2D};
    use approx::assert_relative_eq;
    use convfuse_core::ops;

    fn vector(values: &[f32]) -> Tensor<f32> {
        Tensor::from_vec(values.to_vec(), &[values.len()]).unwrap()
    }

    fn single_pixel_pair() -> (ConvParams<f32>, BNParams<f32>) {
        let conv = ConvParams::new(
            1,
            1,
            (1, 1),
            (1, 1),
            (0, 0),
            1,
            Tensor::from_vec(vec![2.0], &[1, 1, 1, 1]).unwrap(),
            None,
        )
        .unwrap();
        let bn = BNParams::new(
            vector(&[3.0]),
            vector(&[1.0]),
            vector(&[0.5]),
            vector(&[0.25]),
            1e-5,
        )
        .unwrap();
        (conv, bn)
    }

    fn ramp(shape: &[usize], step: f32) -> Tensor<f32> {
        let n: usize = shape.iter().product();
        Tensor::from_vec((0..n).map(|i| (i as f32 * step).sin()).collect(), shape).unwrap()
    }

    #[test]
    fn test_single_pixel_values() {
        let (conv, bn) = single_pixel_pair();
        let fused = fuse(&conv, &bn).unwrap();

        let std = (0.25f32 + 1e-5).sqrt();
        assert_relative_eq!(fused.weight().to_vec()[0], 2.0 * 3.0 / std, epsilon = 1e-5);
        assert_relative_eq!(fused.weight().to_vec()[0], 11.99976, epsilon = 1e-4);
        let bias = fused.fused_bias().unwrap().to_vec()[0];
        assert_relative_eq!(bias, 3.0 / std * (0.0 - 0.5) + 1.0, epsilon = 1e-5);
        assert_relative_eq!(bias, -1.99994, epsilon = 1e-4);

        let original = Conv2D::new(conv);
        let norm = BatchNorm::new(bn);
        let folded = Conv2D::from(fused);
        for x in [-3.0f32, -0.5, 0.0, 0.25, 1.0, 7.5] {
            let input = Tensor::from_vec(vec![x], &[1, 1, 1, 1]).unwrap();
            let expected = norm.forward(&original.forward(&input).unwrap()).unwrap();
            let actual = folded.forward(&input).unwrap();
            assert_relative_eq!(actual.to_vec()[0], expected.to_vec()[0], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_degenerate_variance() {
        let (conv, _) = single_pixel_pair();
        let bn = BNParams::new(
            vector(&[1.0]),
            vector(&[0.0]),
            vector(&[0.0]),
            vector(&[-1e-5]),
            1e-5,
        )
        .unwrap();
        match fuse(&conv, &bn).unwrap_err() {
            FusionError::DegenerateVariance {
                layer_index,
                channel,
                ..
            } => {
                assert_eq!(layer_index, None);
                assert_eq!(channel, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_nan_variance_names_channel() {
        let conv = ConvParams::<f32>::zeros(2, 3, (1, 1), (1, 1), (0, 0), 1, false).unwrap();
        let bn = BNParams::new(
            vector(&[1.0, 1.0, 1.0]),
            vector(&[0.0, 0.0, 0.0]),
            vector(&[0.0, 0.0, 0.0]),
            vector(&[1.0, 1.0, f32::NAN]),
            1e-5,
        )
        .unwrap();
        let err = fuse(&conv, &bn).unwrap_err();
        assert!(matches!(err, FusionError::DegenerateVariance { channel: 2, .. }));
    }

    #[test]
    fn test_shape_mismatch() {
        let conv = ConvParams::<f32>::zeros(4, 16, (3, 3), (1, 1), (1, 1), 1, true).unwrap();
        let bn = BNParams::identity(8).unwrap();
        assert_eq!(
            fuse(&conv, &bn).unwrap_err(),
            FusionError::ShapeMismatch {
                layer_index: None,
                conv_out_channels: 16,
                bn_features: 8,
            }
        );
    }

    #[test]
    fn test_depthwise_keeps_groups() {
        let conv = ConvParams::new(
            4,
            4,
            (3, 3),
            (1, 1),
            (1, 1),
            4,
            ramp(&[4, 1, 3, 3], 0.7),
            None,
        )
        .unwrap();
        let bn = BNParams::new(
            vector(&[1.0, 2.0, 0.5, -1.0]),
            vector(&[0.1, 0.2, 0.3, 0.4]),
            vector(&[0.0, 1.0, -1.0, 0.5]),
            vector(&[1.0, 0.5, 2.0, 0.1]),
            1e-5,
        )
        .unwrap();
        let fused = fuse_grouped(&conv, &bn).unwrap();

        assert_eq!(fused.groups(), 4);
        assert_eq!(fused.variant(), FusionVariant::Depthwise);
        assert_eq!(fused.weight().shape(), conv.weight().shape());
        assert_eq!(fused.fused_bias().unwrap().shape().dims(), &[4]);

        let input = ramp(&[1, 4, 5, 5], 0.31);
        let expected = BatchNorm::new(bn)
            .forward(&Conv2D::new(conv).forward(&input).unwrap())
            .unwrap();
        let actual = Conv2D::from(fused).forward(&input).unwrap();
        assert!(ops::allclose(&actual, &expected, 1e-5, 1e-4).unwrap());
    }

    #[test]
    fn test_bias_always_present() {
        let conv = ConvParams::<f32>::zeros(3, 2, (1, 1), (1, 1), (0, 0), 1, false).unwrap();
        let fused = fuse(&conv, &BNParams::identity(2).unwrap()).unwrap();
        assert_eq!(fused.fused_bias().unwrap().to_vec(), vec![0.0, 0.0]);
        assert_eq!(fused.variant(), FusionVariant::Standard);
    }

    #[test]
    fn test_fuse_is_deterministic() {
        let conv = ConvParams::new(
            2,
            3,
            (3, 3),
            (2, 2),
            (1, 1),
            1,
            ramp(&[3, 2, 3, 3], 1.3),
            Some(vector(&[0.1, -0.2, 0.3])),
        )
        .unwrap();
        let bn = BNParams::new(
            vector(&[0.9, 1.1, 1.7]),
            vector(&[0.0, 0.5, -0.5]),
            vector(&[0.2, 0.3, 0.4]),
            vector(&[0.7, 1.3, 0.05]),
            1e-3,
        )
        .unwrap();
        let a = fuse(&conv, &bn).unwrap();
        let b = fuse(&conv, &bn).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_variant_assertions() {
        let depthwise = ConvParams::<f32>::zeros(4, 4, (3, 3), (1, 1), (1, 1), 4, false).unwrap();
        let standard = ConvParams::<f32>::zeros(4, 4, (1, 1), (1, 1), (0, 0), 1, false).unwrap();
        let bn = BNParams::identity(4).unwrap();

        assert!(matches!(
            fuse_standard(&depthwise, &bn).unwrap_err(),
            FusionError::Tensor(TensorError::InvalidArgument { .. })
        ));
        assert!(fuse_grouped(&standard, &bn).is_err());
        assert!(fuse_standard(&standard, &bn).is_ok());

        let grouped = ConvParams::<f32>::zeros(4, 4, (1, 1), (1, 1), (0, 0), 2, false).unwrap();
        assert_eq!(fuse(&grouped, &bn).unwrap().variant(), FusionVariant::Grouped);
    }
}
