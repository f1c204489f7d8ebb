//! # convfuse Neural
//!
//! Layers, sequential models and the inference-time transform that folds
//! batch normalization into the preceding convolution.
//!
//! ## Features
//!
//! - **Layers**: grouped/depthwise `Conv2D`, inference `BatchNorm`, activations,
//!   pooling, channel concatenation and space-to-depth `Reorg`
//! - **Fusion**: `deployment::fuse` for a single pair, `LayerFusion` for whole
//!   layer sequences, with optional numerical verification
//! - **Persistence**: named state dicts, strict or lenient loading, JSON files
//! - **Pretrained topologies**: the SkyNet detector backbone
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use convfuse_neural::deployment::{FusionConfig, FusionPolicy, LayerFusion};
//! use convfuse_neural::pretrained::SkyNet;
//! use convfuse_core::Tensor;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let net = SkyNet::<f32>::new()?;
//! let fusion = LayerFusion::with_config(
//!     FusionConfig::default().with_policy(FusionPolicy::FuseAvailable),
//! );
//! let (fused, stats) = net.fuse(&fusion)?;
//! assert_eq!(fused.num_layers(), net.num_layers() - stats.fusions_applied);
//!
//! let _output = fused.forward(&Tensor::zeros(&[1, 3, 160, 320]))?;
//! # Ok(())
//! # }
//! ```

pub mod deployment;
pub mod layers;
pub mod model;
pub mod pretrained;
pub mod serialization;

pub use deployment::{
    fuse, reassemble, FusedConv, FusionConfig, FusionError, FusionPolicy, FusionStats,
    FusionVariant, LayerFusion,
};
pub use layers::{
    Activation, BNParams, BatchNorm, Concat, Conv2D, ConvParams, Layer, LayerType, Pool2D,
    PoolKind, Reorg,
};
pub use model::Sequential;
pub use pretrained::SkyNet;
pub use serialization::{LoadConfig, LoadSummary, StateDict};

#[cfg(feature = "serialize")]
pub use serialization::{load_state_dict, save_state_dict};
