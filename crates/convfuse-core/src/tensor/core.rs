//! Core Tensor Structure and Properties
//!
//! The tensor is a thin owner of an `ndarray::ArrayD` plus its `Shape`. All
//! storage is host memory; there is no device abstraction.

use crate::{DType, Shape};
use ndarray::{ArrayD, ArrayViewD};
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Floating-point element types a tensor can hold.
pub trait TensorElement: Float + FromPrimitive + Debug + Default + Send + Sync + 'static {}

impl<T> TensorElement for T where T: Float + FromPrimitive + Debug + Default + Send + Sync + 'static {}

/// Core tensor structure that holds data and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub(in crate::tensor) array: ArrayD<T>,
    pub(in crate::tensor) shape: Shape,
}

impl<T> Tensor<T> {
    /// Get the shape of the tensor
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Get the data type of the tensor
    pub fn dtype(&self) -> DType
    where
        T: 'static,
    {
        crate::dtype_from_type::<T>()
    }

    /// Number of elements
    pub fn size(&self) -> usize {
        self.shape.elements()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Get the underlying data as a slice (standard layout only)
    pub fn as_slice(&self) -> Option<&[T]> {
        self.array.as_slice()
    }

    /// Get the value at a specific index
    pub fn get(&self, index: &[usize]) -> Option<T>
    where
        T: Clone,
    {
        if index.len() != self.array.ndim() {
            return None;
        }
        self.array.get(index).cloned()
    }

    /// Borrow the backing array
    pub fn array(&self) -> &ArrayD<T> {
        &self.array
    }

    pub fn view(&self) -> ArrayViewD<'_, T> {
        self.array.view()
    }

    /// Copy the elements out in logical (row-major) order
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.array.iter().cloned().collect()
    }

    pub fn same_shape(&self, other: &Self) -> bool {
        self.shape == other.shape
    }
}
