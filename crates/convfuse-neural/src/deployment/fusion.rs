//! Network reassembly: replace every (convolution, batch norm) pair of a
//! layer sequence by its fused convolution.
//!
//! The scan is a single left-to-right pass over the slice, matching on the
//! shape of what remains. Layers that take no part in a pair are copied
//! through in their original order.

use super::conv_bn::{fuse, FusedConv, FusionVariant};
use super::error::FusionError;
use crate::layers::{BNParams, BatchNorm, Conv2D, ConvParams, Layer};
use crate::model::Sequential;
use convfuse_core::{ops, Tensor, TensorElement, TensorError};
#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What to do with layers that cannot take part in a fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum FusionPolicy {
    /// Every convolution must be followed by a batch norm, and every batch
    /// norm preceded by a convolution.
    #[default]
    RequireAll,
    /// Fuse the pairs that exist; copy unpaired convolutions and batch
    /// norms through with a warning.
    FuseAvailable,
}

/// Configuration for conv/batch-norm fusion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct FusionConfig {
    /// Handling of unpaired layers
    pub policy: FusionPolicy,
    /// Check each fused pair numerically against the unfused pair
    pub verify: bool,
    /// Relative and absolute tolerance of the numerical check
    pub tolerance: f64,
    /// Spatial size of the probe input used by the numerical check
    pub probe_size: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            policy: FusionPolicy::RequireAll,
            verify: false,
            tolerance: 1e-4,
            probe_size: 8,
        }
    }
}

impl FusionConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handling of unpaired layers.
    pub fn with_policy(mut self, policy: FusionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable numerical verification of every fused pair.
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Set the relative and absolute verification tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Set the spatial size of the verification input.
    pub fn with_probe_size(mut self, probe_size: usize) -> Self {
        self.probe_size = probe_size;
        self
    }
}

/// Statistics about an applied fusion.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct FusionStats {
    /// Number of (convolution, batch norm) pairs fused
    pub fusions_applied: usize,
    /// Number of layers removed from the sequence
    pub layers_removed: usize,
    /// Unpaired convolutions and batch norms copied through
    pub passed_through: usize,
    /// Fused pairs per convolution kind
    pub variant_counts: HashMap<FusionVariant, usize>,
    /// Largest deviation observed by the numerical check, when enabled
    pub max_verification_error: Option<f64>,
}

impl FusionStats {
    /// Create new empty fusion statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fused pair.
    pub fn add_fusion(&mut self, variant: FusionVariant) {
        self.fusions_applied += 1;
        self.layers_removed += 1;
        *self.variant_counts.entry(variant).or_insert(0) += 1;
    }

    fn record_verification(&mut self, deviation: f64) {
        self.max_verification_error = Some(
            self.max_verification_error
                .map_or(deviation, |worst| worst.max(deviation)),
        );
    }

    /// Fold the statistics of another reassembly into these.
    pub fn merge(&mut self, other: &FusionStats) {
        self.fusions_applied += other.fusions_applied;
        self.layers_removed += other.layers_removed;
        self.passed_through += other.passed_through;
        for (variant, count) in &other.variant_counts {
            *self.variant_counts.entry(*variant).or_insert(0) += count;
        }
        if let Some(deviation) = other.max_verification_error {
            self.record_verification(deviation);
        }
    }
}

/// Conv/batch-norm fusion engine.
#[derive(Debug, Clone, Default)]
pub struct LayerFusion {
    config: FusionConfig,
}

impl LayerFusion {
    /// Create a fusion engine with the default configuration.
    pub fn new() -> Self {
        Self {
            config: FusionConfig::default(),
        }
    }

    /// Create a fusion engine with the given configuration.
    pub fn with_config(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Rebuild `blocks` with every (convolution, batch norm) pair fused.
    ///
    /// The output has `blocks.len() - stats.fusions_applied` layers. Errors
    /// carry the index of the offending layer in `blocks`.
    pub fn reassemble<T: TensorElement>(
        &self,
        blocks: &[Layer<T>],
    ) -> Result<(Vec<Layer<T>>, FusionStats), FusionError> {
        let mut stats = FusionStats::new();
        let mut layers = Vec::with_capacity(blocks.len());
        let mut rest = blocks;
        let mut index = 0;

        loop {
            rest = match rest {
                [] => break,
                [Layer::Convolution(conv), Layer::BatchNorm(bn), tail @ ..] => {
                    let folded = fuse(conv.params(), bn.params())
                        .map_err(|e| e.at_layer(index + 1))?;
                    if self.config.verify {
                        let deviation = self.verify_pair(conv, bn, &folded, index)?;
                        stats.record_verification(deviation);
                    }
                    stats.add_fusion(folded.variant());
                    layers.push(folded.into_layer());
                    index += 2;
                    tail
                }
                [layer @ Layer::Convolution(_), tail @ ..] => {
                    self.pass_through(layer, index, "convolution is not followed by a batch norm")?;
                    stats.passed_through += 1;
                    layers.push(layer.clone());
                    index += 1;
                    tail
                }
                [layer @ Layer::BatchNorm(_), tail @ ..] => {
                    self.pass_through(layer, index, "batch norm has no preceding convolution")?;
                    stats.passed_through += 1;
                    layers.push(layer.clone());
                    index += 1;
                    tail
                }
                [layer, tail @ ..] => {
                    layers.push(layer.clone());
                    index += 1;
                    tail
                }
            };
        }

        log::debug!(
            "reassembled {} layers into {} ({} fused, {} passed through)",
            blocks.len(),
            layers.len(),
            stats.fusions_applied,
            stats.passed_through
        );
        Ok((layers, stats))
    }

    /// Fuse a sequential model, returning the new model and fusion statistics.
    pub fn fuse_sequential<T: TensorElement>(
        &self,
        model: &Sequential<T>,
    ) -> Result<(Sequential<T>, FusionStats), FusionError> {
        let (layers, stats) = self.reassemble(model.layers())?;
        Ok((Sequential::new(layers), stats))
    }

    fn pass_through<T: TensorElement>(
        &self,
        layer: &Layer<T>,
        index: usize,
        reason: &str,
    ) -> Result<(), FusionError> {
        match self.config.policy {
            FusionPolicy::RequireAll => Err(FusionError::UnfusableLayer {
                layer_index: index,
                layer_type: layer.layer_type(),
                reason: reason.to_string(),
            }),
            FusionPolicy::FuseAvailable => {
                log::warn!("keeping layer {index} ({}) unfused: {reason}", layer.layer_type());
                Ok(())
            }
        }
    }

    /// Run the original pair and the fused convolution on a deterministic
    /// probe and return the largest deviation.
    fn verify_pair<T: TensorElement>(
        &self,
        conv: &Conv2D<T>,
        bn: &BatchNorm<T>,
        folded: &FusedConv<T>,
        index: usize,
    ) -> Result<f64, FusionError> {
        let probe = probe_input(conv.params(), self.config.probe_size)?;
        let expected = bn.forward(&conv.forward(&probe)?)?;
        let actual = ops::conv2d(
            &probe,
            folded.weight(),
            folded.bias(),
            folded.stride(),
            folded.padding(),
            folded.groups(),
        )?;

        let tolerance = self.config.tolerance;
        let tol = T::from_f64(tolerance).ok_or_else(|| {
            TensorError::numerical_error("verify_pair", "tolerance not representable")
        })?;
        let deviation = ops::max_abs_diff(&actual, &expected)?
            .to_f64()
            .unwrap_or(f64::NAN);
        if !ops::allclose(&actual, &expected, tol, tol)? {
            return Err(FusionError::VerificationFailed {
                layer_index: index,
                max_abs_diff: deviation,
                tolerance,
            });
        }
        Ok(deviation)
    }
}

/// `[1, in_channels, h, w]` probe with values spread over `[-1, 1]`, large
/// enough for at least one output pixel.
fn probe_input<T: TensorElement>(
    conv: &ConvParams<T>,
    probe_size: usize,
) -> Result<Tensor<T>, TensorError> {
    let (kh, kw) = conv.kernel_size();
    let shape = [
        1,
        conv.in_channels(),
        probe_size.max(kh),
        probe_size.max(kw),
    ];
    let len: usize = shape.iter().product();
    let data = (0..len)
        .map(|i| {
            let v = ((i * 7919) % 97) as f64 / 48.5 - 1.0;
            T::from_f64(v).ok_or_else(|| {
                TensorError::numerical_error("probe_input", "probe value not representable")
            })
        })
        .collect::<Result<Vec<T>, TensorError>>()?;
    Tensor::from_vec(data, &shape)
}

/// Reassemble `blocks` with the default configuration.
pub fn reassemble<T: TensorElement>(blocks: &[Layer<T>]) -> Result<Vec<Layer<T>>, FusionError> {
    LayerFusion::new().reassemble(blocks).map(|(layers, _)| layers)
}

/// High-level API for conv/batch-norm fusion of a sequential model.
pub fn fuse_layers<T: TensorElement>(
    model: &Sequential<T>,
    config: Option<FusionConfig>,
) -> Result<(Sequential<T>, FusionStats), FusionError> {
    LayerFusion::with_config(config.unwrap_or_default()).fuse_sequential(model)
}

/// Fuse a single pair given as layer descriptors, outside any sequence.
pub fn fuse_pair<T: TensorElement>(
    conv: &ConvParams<T>,
    bn: &BNParams<T>,
) -> Result<Layer<T>, FusionError> {
    fuse(conv, bn).map(FusedConv::into_layer)
}
