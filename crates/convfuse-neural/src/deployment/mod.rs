//! Inference-time network transforms.
//!
//! Folds every batch norm into the convolution that feeds it, for standard,
//! grouped and depthwise convolutions alike.

pub mod conv_bn;
pub mod error;
pub mod fusion;

pub use conv_bn::{fuse, fuse_grouped, fuse_standard, FusedConv, FusionVariant};
pub use error::FusionError;
pub use fusion::{
    fuse_layers, fuse_pair, reassemble, FusionConfig, FusionPolicy, FusionStats, LayerFusion,
};
