//! # convfuse
//!
//! Inference-time folding of batch normalization into the preceding
//! convolution, for standard, grouped and depthwise convolutions.
//!
//! A convolution followed by a batch norm in inference mode computes an
//! affine function of the convolution output per channel. Folding it into
//! the convolution's weight and bias removes one layer per pair and one full
//! pass over the activations, without changing what the network computes.
//!
//! ## Quick Start
//!
//! ### Fusing a single pair
//!
//! ```rust
//! use convfuse::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conv = ConvParams::<f32>::zeros(32, 32, (3, 3), (1, 1), (1, 1), 32, false)?;
//! let bn = BNParams::identity(32)?;
//!
//! let fused = fuse(&conv, &bn)?;
//! assert_eq!(fused.variant(), FusionVariant::Depthwise);
//! assert_eq!(fused.groups(), 32);
//! # Ok(())
//! # }
//! ```
//!
//! ### Fusing a whole network
//!
//! ```rust,no_run
//! use convfuse::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let net = SkyNet::<f32>::new()?;
//! let fusion = LayerFusion::with_config(
//!     FusionConfig::default()
//!         .with_policy(FusionPolicy::FuseAvailable)
//!         .with_verify(true),
//! );
//! let (fused, stats) = net.fuse(&fusion)?;
//! println!("{} pairs fused", stats.fusions_applied);
//! # let _ = fused;
//! # Ok(())
//! # }
//! ```
//!
//! ### Fusing a state file
//!
//! ```rust,no_run
//! use convfuse::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FusionConfig::default().with_policy(FusionPolicy::FuseAvailable);
//! let report = convfuse::fuse_state_file("skynet.json", "skynet_fused.json", &config)?;
//! println!("{} -> {} layers", report.layers_before, report.layers_after);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: CPU tensors and reference NCHW operators
//! - [`neural`]: layers, sequential models, fusion, persistence and the
//!   SkyNet topology

#![deny(missing_docs)]
#![warn(clippy::all)]

pub use convfuse_core as core;
pub use convfuse_neural as neural;

use neural::deployment::{FusionConfig, FusionError, FusionStats, LayerFusion};
use neural::pretrained::SkyNet;
use neural::serialization::LoadConfig;
use std::path::Path;

/// Prelude module for convenient imports.
///
/// ```rust
/// use convfuse::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::ops;
    pub use crate::core::{DType, Shape, Tensor, TensorElement, TensorError};

    // Layers
    pub use crate::neural::layers::{
        Activation, BNParams, BatchNorm, Concat, Conv2D, ConvParams, Layer, LayerType, Pool2D,
        Reorg,
    };

    // Models
    pub use crate::neural::{Sequential, SkyNet};

    // Fusion
    pub use crate::neural::deployment::{
        fuse, fuse_layers, fuse_pair, reassemble, FusedConv, FusionConfig, FusionError,
        FusionPolicy, FusionStats, FusionVariant, LayerFusion,
    };

    // Persistence
    pub use crate::neural::serialization::{
        load_state_dict, save_state_dict, LoadConfig, LoadSummary, StateDict,
    };
}

/// Outcome of [`fuse_state_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct FusionReport {
    /// Layers in the network before fusion
    pub layers_before: usize,
    /// Layers in the fused network
    pub layers_after: usize,
    /// Learned tensors read from the source file
    pub tensors_loaded: usize,
    /// Learned tensors written to the destination file
    pub tensors_written: usize,
    /// Per-pair fusion statistics
    pub stats: FusionStats,
}

/// Load a SkyNet state file, fuse every conv/batch-norm pair and write the
/// fused state to `dst`.
///
/// `num_batches_tracked` counters, which training frameworks store next to
/// the batch norm statistics, are ignored.
///
/// Parameter names are flat, `<stage>.<layer>.<param>`, where `<layer>`
/// indexes the stage's layer list with every block expanded in place
/// (`model_p1.0.weight`, `model_p1.1.running_var`, ...). Checkpoints that
/// nest layers inside blocks (`model_p1.0.0.weight`) must have their keys
/// renamed first; with the default strict loading they are rejected as
/// missing parameters.
pub fn fuse_state_file<P, Q>(
    src: P,
    dst: Q,
    config: &FusionConfig,
) -> Result<FusionReport, FusionError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let load = LoadConfig::new().with_exclude("num_batches_tracked");
    fuse_state_file_with(src, dst, &load, config)
}

/// [`fuse_state_file`] with explicit loading rules.
pub fn fuse_state_file_with<P, Q>(
    src: P,
    dst: Q,
    load: &LoadConfig,
    config: &FusionConfig,
) -> Result<FusionReport, FusionError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let dict = neural::serialization::load_state_dict(src)?;

    let mut net = SkyNet::<f32>::new()?;
    let summary = net.load_state_dict(&dict, load)?;
    if !summary.is_complete() {
        log::warn!(
            "{}: {} missing, {} unexpected, {} mis-shaped parameters",
            src.display(),
            summary.missing.len(),
            summary.unexpected.len(),
            summary.mismatched.len()
        );
    }

    let (fused, stats) = net.fuse(&LayerFusion::with_config(config.clone()))?;
    let fused_state = fused.state_dict();
    neural::serialization::save_state_dict(dst, &fused_state)?;

    let report = FusionReport {
        layers_before: net.num_layers(),
        layers_after: fused.num_layers(),
        tensors_loaded: summary.num_loaded,
        tensors_written: fused_state.len(),
        stats,
    };
    log::info!(
        "fused {} into {}: {} pairs, {} -> {} layers",
        src.display(),
        dst.display(),
        report.stats.fusions_applied,
        report.layers_before,
        report.layers_after
    );
    Ok(report)
}

/// The version of convfuse.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the version string of convfuse.
pub fn version() -> &'static str {
    VERSION
}
