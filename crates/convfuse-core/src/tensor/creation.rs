//! Tensor Creation and Construction

use super::core::Tensor;
use crate::{Result, Shape, TensorError};
use ndarray::{ArrayD, IxDyn};
use num_traits::{One, Zero};

impl<T: Clone> Tensor<T> {
    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize]) -> Self
    where
        T: Zero,
    {
        Self::from_array(ArrayD::zeros(IxDyn(shape)))
    }

    /// Create a tensor filled with ones
    pub fn ones(shape: &[usize]) -> Self
    where
        T: One,
    {
        Self::from_array(ArrayD::ones(IxDyn(shape)))
    }

    /// Create a tensor filled with a specific value
    pub fn full(shape: &[usize], value: T) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(shape), value))
    }

    /// Create a tensor from an existing ndarray
    pub fn from_array(array: ArrayD<T>) -> Self {
        let shape = Shape::from_slice(array.shape());
        Self { array, shape }
    }

    /// Create a scalar tensor from a single value
    pub fn from_scalar(value: T) -> Self {
        Self::from_array(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Create a tensor from a vector of data with specified shape
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let total_size: usize = shape.iter().product();
        if data.len() != total_size {
            return Err(TensorError::invalid_shape(
                "from_vec",
                &format!(
                    "data length {} doesn't match shape {:?} (size {})",
                    data.len(),
                    shape,
                    total_size
                ),
                shape,
            ));
        }

        let array = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| TensorError::invalid_shape_simple(e.to_string()))?;

        Ok(Self::from_array(array))
    }

    /// Reinterpret the elements under a new shape with the same element count
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let total_size: usize = shape.iter().product();
        if total_size != self.size() {
            return Err(TensorError::invalid_shape(
                "reshape",
                &format!("cannot reshape {} into {:?}", self.shape(), shape),
                shape,
            ));
        }
        Self::from_vec(self.to_vec(), shape)
    }

    /// Apply `f` to every element, producing a new tensor of the same shape
    pub fn map<U, F>(&self, f: F) -> Tensor<U>
    where
        U: Clone,
        F: FnMut(&T) -> U,
    {
        Tensor::from_array(self.array.map(f))
    }
}
