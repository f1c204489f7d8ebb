//! Reference NCHW operators.
//!
//! Every layer's forward pass is defined by one of these functions.

pub mod activation;
pub mod comparison;
pub mod conv;
pub mod manipulation;
pub mod normalization;
pub mod pooling;

pub use activation::{leaky_relu, relu, relu6};
pub use comparison::{allclose, max_abs_diff};
pub use conv::{conv2d, output_dim};
pub use manipulation::{concat, reorg};
pub use normalization::batch_norm_inference;
pub use pooling::{avg_pool2d, max_pool2d};
