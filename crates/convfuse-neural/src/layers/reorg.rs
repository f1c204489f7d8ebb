use convfuse_core::{ops, Result, Tensor, TensorElement};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// Space-to-depth reorganization: `[B, C, H, W] -> [B, s*s*C, H/s, W/s]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Reorg {
    stride: usize,
}

impl Reorg {
    pub fn new(stride: usize) -> Self {
        Self { stride }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Channel count produced for `in_channels` input channels.
    pub fn out_channels(&self, in_channels: usize) -> usize {
        self.stride * self.stride * in_channels
    }

    pub fn forward<T: TensorElement>(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        ops::reorg(input, self.stride)
    }
}

impl Default for Reorg {
    fn default() -> Self {
        Self::new(2)
    }
}
