//! Common Building Blocks for Pretrained Models
//!
//! Blocks are returned as flat layer lists so that every (convolution,
//! batch norm) pair is adjacent in the enclosing sequence.

use crate::layers::{Activation, BatchNorm, Conv2D, Layer};
use convfuse_core::{Result, TensorElement};

/// 3x3 convolution, batch norm, ReLU.
pub fn conv_bn<T: TensorElement>(inp: usize, oup: usize, stride: usize) -> Result<Vec<Layer<T>>> {
    Ok(vec![
        Conv2D::zeros(inp, oup, (3, 3), (stride, stride), (1, 1), 1, false)?.into(),
        BatchNorm::identity(oup)?.into(),
        Activation::ReLU.into(),
    ])
}

/// Depthwise-separable block: 3x3 depthwise convolution, batch norm, ReLU6,
/// then 1x1 pointwise convolution, batch norm, ReLU6
pub fn conv_dw<T: TensorElement>(inp: usize, oup: usize, stride: usize) -> Result<Vec<Layer<T>>> {
    Ok(vec![
        Conv2D::zeros(inp, inp, (3, 3), (stride, stride), (1, 1), inp, false)?.into(),
        BatchNorm::identity(inp)?.into(),
        Activation::ReLU6.into(),
        Conv2D::zeros(inp, oup, (1, 1), (1, 1), (0, 0), 1, false)?.into(),
        BatchNorm::identity(oup)?.into(),
        Activation::ReLU6.into(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerType;

    #[test]
    fn test_conv_dw_layout() {
        let block = conv_dw::<f32>(8, 16, 1).unwrap();
        let kinds: Vec<_> = block.iter().map(Layer::layer_type).collect();
        assert_eq!(
            kinds,
            vec![
                LayerType::Conv2D,
                LayerType::BatchNorm,
                LayerType::Activation,
                LayerType::Conv2D,
                LayerType::BatchNorm,
                LayerType::Activation,
            ]
        );
        match &block[0] {
            Layer::Convolution(conv) => assert!(conv.params().is_depthwise()),
            other => panic!("unexpected layer: {other:?}"),
        }
    }

    #[test]
    fn test_conv_bn_stride() {
        let block = conv_bn::<f32>(3, 4, 2).unwrap();
        match &block[0] {
            Layer::Convolution(conv) => {
                assert_eq!(conv.params().stride(), (2, 2));
                assert_eq!(conv.params().groups(), 1);
            }
            other => panic!("unexpected layer: {other:?}"),
        }
    }
}
