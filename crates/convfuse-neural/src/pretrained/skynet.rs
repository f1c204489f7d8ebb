//! SkyNet detector backbone.
//!
//! ```text
//! x ──► model_p1 ──┬──► reorg ───────────┐
//!                  └──► model_p2 ──► concat ──► model_p3 ──► out
//! ```
//!
//! `model_p1` and `model_p2` are stacks of depthwise-separable blocks with
//! max pooling; `model_p3` ends with a 1x1 detection head that has no batch
//! norm. The input's height and width must be multiples of 8.

use super::common::conv_dw;
use crate::deployment::{FusionError, FusionStats, LayerFusion};
use crate::layers::{Concat, Conv2D, Layer, Pool2D, Reorg};
use crate::model::Sequential;
use crate::serialization::weight_loader::in_scope;
use crate::serialization::{LoadConfig, LoadSummary, StateDict};
use convfuse_core::{Result, Tensor, TensorElement, TensorError};

/// Native input height.
pub const INPUT_HEIGHT: usize = 160;
/// Native input width.
pub const INPUT_WIDTH: usize = 320;
/// Channels produced by the detection head.
pub const OUTPUT_CHANNELS: usize = 10;
/// State-dict prefixes of the three stages.
pub const STAGE_NAMES: [&str; 3] = ["model_p1", "model_p2", "model_p3"];

/// SkyNet backbone: three sequential stages joined by a reorg branch and a
/// channel concatenation.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyNet<T> {
    model_p1: Sequential<T>,
    model_p2: Sequential<T>,
    model_p3: Sequential<T>,
    reorg: Reorg,
    concat: Concat,
}

fn stage<T: TensorElement>(blocks: Vec<Vec<Layer<T>>>) -> Sequential<T> {
    blocks.into_iter().flatten().collect()
}

impl<T: TensorElement> SkyNet<T> {
    /// Untrained network: zero convolution weights, identity batch norms.
    pub fn new() -> Result<Self> {
        let pool = || vec![Layer::Pool(Pool2D::max((2, 2), Some((2, 2))))];
        let model_p1 = stage(vec![conv_dw(3, 48, 1)?, pool(), conv_dw(48, 96, 1)?, pool()]);
        let model_p2 = stage(vec![conv_dw(96, 192, 1)?, pool(), conv_dw(192, 384, 1)?]);
        let model_p3 = stage(vec![
            conv_dw(768, 96, 1)?,
            vec![Conv2D::zeros(96, OUTPUT_CHANNELS, (1, 1), (1, 1), (0, 0), 1, false)?.into()],
        ]);
        Ok(Self::from_stages(model_p1, model_p2, model_p3))
    }

    /// Network whose every learned tensor is produced by `init(name, shape)`.
    pub fn with_initializer<F>(mut init: F) -> Result<Self>
    where
        F: FnMut(&str, &[usize]) -> Tensor<T>,
    {
        let mut net = Self::new()?;
        let dict: StateDict<T> = net
            .state_dict()
            .iter()
            .map(|(name, tensor)| (name.to_string(), init(name, tensor.shape().dims())))
            .collect();
        net.load_state_dict(&dict, &LoadConfig::new())?;
        Ok(net)
    }

    /// Assemble a network from already built stages, keeping the
    /// reorg/concat wiring between them
    pub fn from_stages(
        model_p1: Sequential<T>,
        model_p2: Sequential<T>,
        model_p3: Sequential<T>,
    ) -> Self {
        Self {
            model_p1,
            model_p2,
            model_p3,
            reorg: Reorg::new(2),
            concat: Concat::channels(),
        }
    }

    /// The three stages in execution order.
    pub fn stages(&self) -> [&Sequential<T>; 3] {
        [&self.model_p1, &self.model_p2, &self.model_p3]
    }

    fn stages_mut(&mut self) -> [&mut Sequential<T>; 3] {
        [&mut self.model_p1, &mut self.model_p2, &mut self.model_p3]
    }

    /// Total number of layers across all stages.
    pub fn num_layers(&self) -> usize {
        self.stages().iter().map(|s| s.len()).sum()
    }

    pub fn num_parameters(&self) -> usize {
        self.stages().iter().map(|s| s.num_parameters()).sum()
    }

    /// Run the network on an NCHW input.
    pub fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        if let Some((_, _, h, w)) = input.shape().as_nchw() {
            if h % 8 != 0 || w % 8 != 0 {
                return Err(TensorError::invalid_shape(
                    "SkyNet::forward",
                    "height and width must be multiples of 8",
                    input.shape().dims(),
                ));
            }
        }
        let x_p1 = self.model_p1.forward(input)?;
        let x_p1_reorg = self.reorg.forward(&x_p1)?;
        let x_p2 = self.model_p2.forward(&x_p1)?;
        let x_p3_in = self.concat.forward_many(&[&x_p1_reorg, &x_p2])?;
        self.model_p3.forward(&x_p3_in)
    }

    /// Learned state of all stages, named `<stage>.<layer index>.<parameter>`.
    pub fn state_dict(&self) -> StateDict<T> {
        let mut dict = StateDict::new();
        for (name, stage) in STAGE_NAMES.iter().zip(self.stages()) {
            dict.merge(stage.state_dict(name));
        }
        dict
    }

    /// Load the learned state of all stages. The network is only updated when
    /// every stage loads.
    pub fn load_state_dict(
        &mut self,
        dict: &StateDict<T>,
        config: &LoadConfig,
    ) -> Result<LoadSummary> {
        let mut loaded = self.clone();
        let mut summary = LoadSummary::default();
        for (name, stage) in STAGE_NAMES.iter().zip(loaded.stages_mut()) {
            summary.merge(stage.load_state_dict(name, dict, config)?);
        }

        for name in dict.names() {
            if STAGE_NAMES.iter().any(|stage| in_scope(stage, name)) {
                continue;
            }
            if !config.should_include(name) {
                summary.num_skipped += 1;
            } else {
                summary.unexpected.push(name.to_string());
            }
        }
        if config.strict && !summary.unexpected.is_empty() {
            return Err(TensorError::serialization_error(
                "SkyNet::load_state_dict",
                &format!("unexpected parameters: {}", summary.unexpected.join(", ")),
            ));
        }

        *self = loaded;
        Ok(summary)
    }

    /// Fold every batch norm into its convolution.
    ///
    /// Each stage is reassembled on its own so the reorg branch and the
    /// concatenation still see the same tensors. The detection head has no
    /// batch norm, so the default `RequireAll` policy rejects it; use
    /// `FusionPolicy::FuseAvailable`. Layer indices in errors are relative
    /// to the stage being fused.
    pub fn fuse(
        &self,
        fusion: &LayerFusion,
    ) -> std::result::Result<(Self, FusionStats), FusionError> {
        let mut stats = FusionStats::new();
        let mut fuse_stage = |name: &str, stage: &Sequential<T>| {
            let (model, stage_stats) = fusion.fuse_sequential(stage).map_err(|e| {
                log::error!("fusing {name} failed: {e}");
                e
            })?;
            log::debug!("{name}: {} -> {} layers", stage.len(), model.len());
            stats.merge(&stage_stats);
            Ok::<_, FusionError>(model)
        };

        let model_p1 = fuse_stage(STAGE_NAMES[0], &self.model_p1)?;
        let model_p2 = fuse_stage(STAGE_NAMES[1], &self.model_p2)?;
        let model_p3 = fuse_stage(STAGE_NAMES[2], &self.model_p3)?;
        let fused = Self {
            model_p1,
            model_p2,
            model_p3,
            reorg: self.reorg,
            concat: self.concat,
        };
        Ok((fused, stats))
    }
}
