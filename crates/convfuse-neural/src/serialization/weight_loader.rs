//! Loading named parameters into layer sequences.
//!
//! Only learned state travels through a [`StateDict`]: convolution weight and
//! bias, batch-norm scale, shift and running statistics. Hyper-parameters and
//! batch-norm `eps` belong to the topology the state is loaded into.

use super::state_dict::StateDict;
use crate::layers::{BatchNorm, Conv2D, Layer};
use crate::model::Sequential;
use convfuse_core::{Result, Tensor, TensorElement, TensorError};
use std::collections::HashSet;

/// Configuration for parameter loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    /// Strict mode: fail on missing, unexpected or mis-shaped parameters
    pub strict: bool,

    /// Parameters whose name contains one of these patterns are ignored
    pub exclude_patterns: Vec<String>,
}

impl LoadConfig {
    /// Create a new load configuration with defaults.
    pub fn new() -> Self {
        Self {
            strict: true,
            exclude_patterns: Vec::new(),
        }
    }

    /// Set strict mode.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Exclude parameters matching pattern.
    pub fn with_exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_patterns.push(pattern.into());
        self
    }

    /// Check if a parameter name should be considered at all.
    pub fn should_include(&self, name: &str) -> bool {
        !self.exclude_patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Parameters copied into the model
    pub num_loaded: usize,
    /// Entries ignored because of an exclude pattern
    pub num_skipped: usize,
    /// Expected parameters absent from the state (non-strict only)
    pub missing: Vec<String>,
    /// Entries in scope that no layer asked for (non-strict only)
    pub unexpected: Vec<String>,
    /// Entries whose shape disagreed with the layer (non-strict only)
    pub mismatched: Vec<String>,
}

impl LoadSummary {
    /// Whether every expected parameter was loaded.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }

    pub(crate) fn merge(&mut self, other: LoadSummary) {
        self.num_loaded += other.num_loaded;
        self.num_skipped += other.num_skipped;
        self.missing.extend(other.missing);
        self.unexpected.extend(other.unexpected);
        self.mismatched.extend(other.mismatched);
    }
}

/// `<prefix>.<index>.<param>`, or `<index>.<param>` without a prefix.
pub fn parameter_name(prefix: &str, index: usize, param: &str) -> String {
    if prefix.is_empty() {
        format!("{index}.{param}")
    } else {
        format!("{prefix}.{index}.{param}")
    }
}

/// Whether `name` lives under `prefix`.
pub(crate) fn in_scope(prefix: &str, name: &str) -> bool {
    prefix.is_empty()
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

struct Loader<'a, T> {
    dict: &'a StateDict<T>,
    config: &'a LoadConfig,
    seen: HashSet<&'a str>,
    summary: LoadSummary,
}

impl<'a, T: TensorElement> Loader<'a, T> {
    fn new(dict: &'a StateDict<T>, config: &'a LoadConfig) -> Self {
        Self {
            dict,
            config,
            seen: HashSet::new(),
            summary: LoadSummary::default(),
        }
    }

    /// Value for `name`, or `current` when it is excluded or unusable.
    fn take(&mut self, name: String, current: &Tensor<T>) -> Result<Tensor<T>> {
        if !self.config.should_include(&name) {
            return Ok(current.clone());
        }
        let dict = self.dict;
        let Some((key, stored)) = dict.iter().find(|(n, _)| *n == name) else {
            if self.config.strict {
                return Err(TensorError::serialization_error(
                    "load_state_dict",
                    &format!("missing parameter '{name}'"),
                ));
            }
            log::warn!("parameter '{name}' not found, keeping current value");
            self.summary.missing.push(name);
            return Ok(current.clone());
        };
        self.seen.insert(key);

        if !stored.same_shape(current) {
            if self.config.strict {
                return Err(TensorError::shape_mismatch(
                    "load_state_dict",
                    &format!("{name} {}", current.shape()),
                    &format!("{name} {}", stored.shape()),
                ));
            }
            log::warn!(
                "parameter '{name}' has shape {}, layer expects {}; keeping current value",
                stored.shape(),
                current.shape()
            );
            self.summary.mismatched.push(name);
            return Ok(current.clone());
        }

        self.summary.num_loaded += 1;
        Ok(stored.clone())
    }

    fn load_layer(&mut self, prefix: &str, index: usize, layer: &Layer<T>) -> Result<Layer<T>> {
        let name = |param: &str| parameter_name(prefix, index, param);
        let loaded = match layer {
            Layer::Convolution(conv) => {
                let params = conv.params();
                let weight = self.take(name("weight"), params.weight())?;
                let bias = match params.bias() {
                    Some(bias) => Some(self.take(name("bias"), bias)?),
                    None => None,
                };
                Layer::Convolution(Conv2D::new(
                    params.clone().with_weight(weight)?.with_bias(bias)?,
                ))
            }
            Layer::BatchNorm(bn) => {
                let params = bn.params();
                let gamma = self.take(name("weight"), params.scale())?;
                let beta = self.take(name("bias"), params.shift())?;
                let mean = self.take(name("running_mean"), params.running_mean())?;
                let var = self.take(name("running_var"), params.running_var())?;
                Layer::BatchNorm(BatchNorm::new(
                    params.clone().with_state(gamma, beta, mean, var)?,
                ))
            }
            other => other.clone(),
        };
        Ok(loaded)
    }

    /// Account for every in-scope entry that no layer consumed.
    fn finish(mut self, prefix: &str) -> Result<LoadSummary> {
        for name in self.dict.names() {
            if !in_scope(prefix, name) || self.seen.contains(name) {
                continue;
            }
            if !self.config.should_include(name) {
                self.summary.num_skipped += 1;
            } else {
                self.summary.unexpected.push(name.to_string());
            }
        }
        if self.config.strict && !self.summary.unexpected.is_empty() {
            return Err(TensorError::serialization_error(
                "load_state_dict",
                &format!("unexpected parameters: {}", self.summary.unexpected.join(", ")),
            ));
        }
        Ok(self.summary)
    }
}

impl<T: TensorElement> Sequential<T> {
    /// Collect the learned state of every layer under `prefix`.
    pub fn state_dict(&self, prefix: &str) -> StateDict<T> {
        let mut dict = StateDict::new();
        for (index, layer) in self.layers().iter().enumerate() {
            for (param, tensor) in layer.parameters() {
                dict.insert(parameter_name(prefix, index, param), tensor.clone());
            }
        }
        dict
    }

    /// Replace the learned state of every layer with the entries of `dict`
    /// found under `prefix`.
    ///
    /// The model is only updated when the whole load succeeds.
    pub fn load_state_dict(
        &mut self,
        prefix: &str,
        dict: &StateDict<T>,
        config: &LoadConfig,
    ) -> Result<LoadSummary> {
        let mut loader = Loader::new(dict, config);
        let layers = self
            .layers()
            .iter()
            .enumerate()
            .map(|(index, layer)| loader.load_layer(prefix, index, layer))
            .collect::<Result<Vec<_>>>()?;
        let summary = loader.finish(prefix)?;

        log::debug!(
            "loaded {} parameters under '{prefix}' ({} skipped)",
            summary.num_loaded,
            summary.num_skipped
        );
        *self = Sequential::new(layers);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Activation;

    fn model() -> Sequential<f32> {
        Sequential::default()
            .add(Conv2D::zeros(2, 3, (1, 1), (1, 1), (0, 0), 1, false).unwrap())
            .add(BatchNorm::identity(3).unwrap())
            .add(Activation::ReLU)
    }

    #[test]
    fn test_state_dict_names() {
        let names: Vec<String> = model().state_dict("features").names().map(String::from).collect();
        assert_eq!(
            names,
            vec![
                "features.0.weight",
                "features.1.weight",
                "features.1.bias",
                "features.1.running_mean",
                "features.1.running_var",
            ]
        );
        assert!(model().state_dict("").contains("0.weight"));
    }

    #[test]
    fn test_load_replaces_state() {
        let mut dict = model().state_dict("m");
        dict.insert("m.0.weight", Tensor::ones(&[3, 2, 1, 1]));
        dict.insert("m.1.running_var", Tensor::full(&[3], 4.0));

        let mut target = model();
        let summary = target.load_state_dict("m", &dict, &LoadConfig::new()).unwrap();
        assert_eq!(summary.num_loaded, 5);
        assert!(summary.is_complete());
        assert_eq!(target.state_dict("m"), dict);
    }

    #[test]
    fn test_excluded_counter_is_skipped() {
        let mut dict = model().state_dict("m");
        dict.insert("m.1.num_batches_tracked", Tensor::from_scalar(3560.0));

        let mut target = model();
        assert!(target.load_state_dict("m", &dict, &LoadConfig::new()).is_err());

        let config = LoadConfig::new().with_exclude("num_batches_tracked");
        let summary = target.load_state_dict("m", &dict, &config).unwrap();
        assert_eq!(summary.num_skipped, 1);
        assert!(summary.unexpected.is_empty());
    }

    #[test]
    fn test_strict_load_leaves_model_untouched() {
        let mut dict = model().state_dict("m");
        dict.insert("m.0.weight", Tensor::ones(&[3, 2, 1, 1]));
        dict.remove("m.1.running_mean");

        let mut target = model();
        let err = target.load_state_dict("m", &dict, &LoadConfig::new()).unwrap_err();
        assert!(matches!(err, TensorError::SerializationError { .. }));
        assert_eq!(target, model());
    }

    #[test]
    fn test_lenient_load_reports_problems() {
        let mut dict = model().state_dict("m");
        dict.insert("m.0.weight", Tensor::ones(&[3, 2, 3, 3]));
        dict.remove("m.1.running_mean");
        dict.insert("m.7.weight", Tensor::ones(&[1]));
        dict.insert("other.0.weight", Tensor::ones(&[1]));

        let mut target = model();
        let config = LoadConfig::new().with_strict(false);
        let summary = target.load_state_dict("m", &dict, &config).unwrap();
        assert_eq!(summary.mismatched, vec!["m.0.weight".to_string()]);
        assert_eq!(summary.missing, vec!["m.1.running_mean".to_string()]);
        assert_eq!(summary.unexpected, vec!["m.7.weight".to_string()]);
        assert_eq!(summary.num_loaded, 3);
        assert!(!summary.is_complete());
    }

    #[test]
    fn test_scope_requires_separator() {
        assert!(in_scope("model_p1", "model_p1.0.weight"));
        assert!(!in_scope("model_p1", "model_p10.0.weight"));
        assert!(in_scope("", "anything"));
    }
}
