use crate::layers::LayerType;
use convfuse_core::TensorError;
use thiserror::Error;

/// Failures of conv/batch-norm folding and network reassembly.
///
/// Errors raised while fusing a single pair carry `layer_index: None`;
/// reassembly attaches the position of the offending layer with
/// [`FusionError::at_layer`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("{}batch norm has {bn_features} features but the convolution produces {conv_out_channels} channels", at(.layer_index))]
    ShapeMismatch {
        layer_index: Option<usize>,
        conv_out_channels: usize,
        bn_features: usize,
    },

    #[error("{}degenerate variance in channel {channel}: running_var={running_var}, eps={eps}", at(.layer_index))]
    DegenerateVariance {
        layer_index: Option<usize>,
        channel: usize,
        running_var: f64,
        eps: f64,
    },

    #[error("layer {layer_index} ({layer_type}) cannot be fused: {reason}")]
    UnfusableLayer {
        layer_index: usize,
        layer_type: LayerType,
        reason: String,
    },

    #[error("fused layer {layer_index} deviates from the original by {max_abs_diff} (tolerance {tolerance})")]
    VerificationFailed {
        layer_index: usize,
        max_abs_diff: f64,
        tolerance: f64,
    },

    #[error(transparent)]
    Tensor(#[from] TensorError),
}

fn at(layer_index: &Option<usize>) -> String {
    match layer_index {
        Some(i) => format!("layer {i}: "),
        None => String::new(),
    }
}

impl FusionError {
    /// Attach the position of the offending layer to a pair-level error.
    pub fn at_layer(self, index: usize) -> Self {
        match self {
            Self::ShapeMismatch {
                conv_out_channels,
                bn_features,
                ..
            } => Self::ShapeMismatch {
                layer_index: Some(index),
                conv_out_channels,
                bn_features,
            },
            Self::DegenerateVariance {
                channel,
                running_var,
                eps,
                ..
            } => Self::DegenerateVariance {
                layer_index: Some(index),
                channel,
                running_var,
                eps,
            },
            other => other,
        }
    }

    /// Position of the offending layer, when known.
    pub fn layer_index(&self) -> Option<usize> {
        match self {
            Self::ShapeMismatch { layer_index, .. }
            | Self::DegenerateVariance { layer_index, .. } => *layer_index,
            Self::UnfusableLayer { layer_index, .. }
            | Self::VerificationFailed { layer_index, .. } => Some(*layer_index),
            Self::Tensor(_) => None,
        }
    }
}
