use convfuse_core::{ops, Result, Tensor, TensorElement};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Concatenation of several branch outputs along one axis.
///
/// The only multi-input layer: a sequential model cannot run it on its own,
/// the surrounding network decides which tensors feed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Concat {
    axis: usize,
}

impl Concat {
    pub fn new(axis: usize) -> Self {
        Self { axis }
    }

    /// Channel concatenation for NCHW tensors.
    pub fn channels() -> Self {
        Self::new(1)
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn forward_many<T: TensorElement>(&self, inputs: &[&Tensor<T>]) -> Result<Tensor<T>> {
        ops::concat(inputs, self.axis)
    }
}
