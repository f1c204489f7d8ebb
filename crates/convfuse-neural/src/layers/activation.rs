use convfuse_core::{ops, Tensor, TensorElement};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Parameter-free element-wise activation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Activation {
    ReLU,
    /// ReLU clamped at 6
    ReLU6,
    LeakyReLU { negative_slope: f32 },
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Activation::ReLU => "ReLU",
            Activation::ReLU6 => "ReLU6",
            Activation::LeakyReLU { .. } => "LeakyReLU",
        }
    }

    pub fn forward<T: TensorElement>(&self, input: &Tensor<T>) -> Tensor<T> {
        match *self {
            Activation::ReLU => ops::relu(input),
            Activation::ReLU6 => ops::relu6(input),
            Activation::LeakyReLU { negative_slope } => {
                let slope = T::from_f32(negative_slope).unwrap_or_else(T::zero);
                ops::leaky_relu(input, slope)
            }
        }
    }
}
