pub mod activation;
pub mod concat;
pub mod conv;
pub mod normalization;
pub mod pooling;
pub mod reorg;

pub use activation::Activation;
pub use concat::Concat;
pub use conv::{Conv2D, ConvParams};
pub use normalization::{BNParams, BatchNorm, DEFAULT_EPSILON};
pub use pooling::{Pool2D, PoolKind};
pub use reorg::Reorg;

use convfuse_core::{Result, Tensor, TensorElement, TensorError};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a layer, for introspection and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum LayerType {
    Conv2D,
    BatchNorm,
    Activation,
    Pool,
    Concat,
    Reorg,
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerType::Conv2D => "Conv2D",
            LayerType::BatchNorm => "BatchNorm",
            LayerType::Activation => "Activation",
            LayerType::Pool => "Pool",
            LayerType::Concat => "Concat",
            LayerType::Reorg => "Reorg",
        };
        f.write_str(name)
    }
}

/// One layer of a network.
///
/// A closed set of variants: transforms over layer sequences match on these
/// structurally instead of inspecting trait objects.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer<T> {
    Convolution(Conv2D<T>),
    BatchNorm(BatchNorm<T>),
    Activation(Activation),
    Pool(Pool2D),
    Concat(Concat),
    Reorg(Reorg),
}

impl<T: TensorElement> Layer<T> {
    /// Run the layer on a single input.
    ///
    /// `Concat` needs several inputs and fails here; use
    /// [`Concat::forward_many`] from the code that wires the branches.
    pub fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        match self {
            Layer::Convolution(conv) => conv.forward(input),
            Layer::BatchNorm(bn) => bn.forward(input),
            Layer::Activation(act) => Ok(act.forward(input)),
            Layer::Pool(pool) => pool.forward(input),
            Layer::Concat(_) => Err(TensorError::invalid_operation(
                "Layer::forward",
                "Concat takes several inputs and must be wired by the enclosing network",
            )),
            Layer::Reorg(reorg) => reorg.forward(input),
        }
    }

    pub fn layer_type(&self) -> LayerType {
        match self {
            Layer::Convolution(_) => LayerType::Conv2D,
            Layer::BatchNorm(_) => LayerType::BatchNorm,
            Layer::Activation(_) => LayerType::Activation,
            Layer::Pool(_) => LayerType::Pool,
            Layer::Concat(_) => LayerType::Concat,
            Layer::Reorg(_) => LayerType::Reorg,
        }
    }

    /// Named parameter tensors, in the order used by state dictionaries.
    pub fn parameters(&self) -> Vec<(&'static str, &Tensor<T>)> {
        match self {
            Layer::Convolution(conv) => {
                let p = conv.params();
                let mut params = vec![("weight", p.weight())];
                if let Some(bias) = p.bias() {
                    params.push(("bias", bias));
                }
                params
            }
            Layer::BatchNorm(bn) => {
                let p = bn.params();
                vec![
                    ("weight", p.scale()),
                    ("bias", p.shift()),
                    ("running_mean", p.running_mean()),
                    ("running_var", p.running_var()),
                ]
            }
            _ => Vec::new(),
        }
    }

    pub fn num_parameters(&self) -> usize {
        match self {
            Layer::Convolution(conv) => conv.params().num_parameters(),
            Layer::BatchNorm(bn) => bn.params().num_parameters(),
            _ => 0,
        }
    }
}

impl<T> From<Conv2D<T>> for Layer<T> {
    fn from(layer: Conv2D<T>) -> Self {
        Layer::Convolution(layer)
    }
}

impl<T> From<BatchNorm<T>> for Layer<T> {
    fn from(layer: BatchNorm<T>) -> Self {
        Layer::BatchNorm(layer)
    }
}

impl<T> From<Activation> for Layer<T> {
    fn from(layer: Activation) -> Self {
        Layer::Activation(layer)
    }
}

impl<T> From<Pool2D> for Layer<T> {
    fn from(layer: Pool2D) -> Self {
        Layer::Pool(layer)
    }
}

impl<T> From<Concat> for Layer<T> {
    fn from(layer: Concat) -> Self {
        Layer::Concat(layer)
    }
}

impl<T> From<Reorg> for Layer<T> {
    fn from(layer: Reorg) -> Self {
        Layer::Reorg(layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_types_and_parameters() {
        let conv: Layer<f32> = Conv2D::zeros(3, 4, (3, 3), (1, 1), (1, 1), 1, true)
            .unwrap()
            .into();
        assert_eq!(conv.layer_type(), LayerType::Conv2D);
        let names: Vec<_> = conv.parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["weight", "bias"]);
        assert_eq!(conv.num_parameters(), 4 * 3 * 9 + 4);

        let bn: Layer<f32> = BatchNorm::identity(4).unwrap().into();
        assert_eq!(bn.parameters().len(), 4);
        assert_eq!(bn.layer_type().to_string(), "BatchNorm");

        let act: Layer<f32> = Activation::ReLU6.into();
        assert!(act.parameters().is_empty());
        assert_eq!(act.num_parameters(), 0);
    }

    #[test]
    fn test_concat_needs_wiring() {
        let concat: Layer<f32> = Concat::channels().into();
        let err = concat.forward(&Tensor::ones(&[1, 1, 1, 1])).unwrap_err();
        assert!(matches!(err, TensorError::InvalidOperation { .. }));
    }

    #[test]
    fn test_single_input_layers_forward() {
        let input = Tensor::<f32>::ones(&[1, 2, 4, 4]);
        let pool: Layer<f32> = Pool2D::max((2, 2), None).into();
        assert_eq!(pool.forward(&input).unwrap().shape().dims(), &[1, 2, 2, 2]);
        let reorg: Layer<f32> = Reorg::new(2).into();
        assert_eq!(reorg.forward(&input).unwrap().shape().dims(), &[1, 8, 2, 2]);
    }
}
