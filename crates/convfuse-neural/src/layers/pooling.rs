use convfuse_core::{ops, Result, Tensor, TensorElement};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum PoolKind {
    Max,
    Average,
}

/// 2D pooling layer with valid padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Pool2D {
    kind: PoolKind,
    kernel_size: (usize, usize),
    stride: (usize, usize),
}

impl Pool2D {
    /// Max pooling; stride defaults to the kernel size.
    pub fn max(kernel_size: (usize, usize), stride: Option<(usize, usize)>) -> Self {
        Self {
            kind: PoolKind::Max,
            kernel_size,
            stride: stride.unwrap_or(kernel_size),
        }
    }

    /// Average pooling; stride defaults to the kernel size.
    pub fn average(kernel_size: (usize, usize), stride: Option<(usize, usize)>) -> Self {
        Self {
            kind: PoolKind::Average,
            kernel_size,
            stride: stride.unwrap_or(kernel_size),
        }
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        self.kernel_size
    }

    pub fn stride(&self) -> (usize, usize) {
        self.stride
    }

    pub fn forward<T: TensorElement>(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        match self.kind {
            PoolKind::Max => ops::max_pool2d(input, self.kernel_size, self.stride),
            PoolKind::Average => ops::avg_pool2d(input, self.kernel_size, self.stride),
        }
    }
}
