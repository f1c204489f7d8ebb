//! # convfuse-core
//!
//! Host-memory tensor type and the reference NCHW operators (grouped
//! convolution, inference batch normalization, activations, pooling,
//! concatenation and space-to-depth) that define what each network layer
//! computes.

pub mod dtype;
pub mod error;
pub mod ops;
pub mod shape;
pub mod tensor;

pub use dtype::{dtype_from_type, DType};
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use tensor::{Tensor, TensorElement};
