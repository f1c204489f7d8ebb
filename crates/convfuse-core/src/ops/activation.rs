//! Element-wise activations

use crate::tensor::TensorElement;
use crate::Tensor;

pub fn relu<T: TensorElement>(input: &Tensor<T>) -> Tensor<T> {
    input.map(|&x| if x > T::zero() { x } else { T::zero() })
}

/// ReLU clamped to `[0, 6]`
pub fn relu6<T: TensorElement>(input: &Tensor<T>) -> Tensor<T> {
    let six = T::from_f32(6.0).unwrap_or_else(T::max_value);
    input.map(|&x| x.max(T::zero()).min(six))
}

pub fn leaky_relu<T: TensorElement>(input: &Tensor<T>, negative_slope: T) -> Tensor<T> {
    input.map(|&x| if x > T::zero() { x } else { x * negative_slope })
}
