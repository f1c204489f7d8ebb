//! Tensor Module
//!
//! - **core**: tensor structure, element trait and property access
//! - **creation**: constructors, reshape and element-wise mapping

pub mod core;
pub mod creation;

pub use core::{Tensor, TensorElement};
