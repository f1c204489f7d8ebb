//! Batch Normalization layer (inference only)
//!
//! Normalizes each channel with the running statistics collected during
//! training, then applies the learned scale and shift. There is no training
//! mode: statistics are frozen.

use convfuse_core::{ops, Result, Tensor, TensorElement, TensorError};

/// Default numerical-stability constant.
pub const DEFAULT_EPSILON: f64 = 1e-5;

/// Immutable batch-normalization descriptor.
///
/// Lengths of all four vectors are validated against `num_features`.
/// Non-positive variances are accepted here and rejected by the fusion
/// engine, which names the offending channel.
#[derive(Debug, Clone, PartialEq)]
pub struct BNParams<T> {
    num_features: usize,
    gamma: Tensor<T>,
    beta: Tensor<T>,
    running_mean: Tensor<T>,
    running_var: Tensor<T>,
    eps: T,
}

impl<T: TensorElement> BNParams<T> {
    /// Create batch-norm parameters, checking that all statistics have the
    /// same length and that `eps` is positive.
    pub fn new(
        gamma: Tensor<T>,
        beta: Tensor<T>,
        running_mean: Tensor<T>,
        running_var: Tensor<T>,
        eps: T,
    ) -> Result<Self> {
        let num_features = gamma.size();
        let params = Self {
            num_features,
            gamma,
            beta,
            running_mean,
            running_var,
            eps,
        };
        params.validate()?;
        Ok(params)
    }

    /// Freshly initialized statistics: `gamma = 1, beta = 0, mean = 0, var = 1`.
    pub fn identity(num_features: usize) -> Result<Self> {
        let eps = T::from_f64(DEFAULT_EPSILON).ok_or_else(|| {
            TensorError::numerical_error("BNParams::identity", "epsilon not representable")
        })?;
        Self::new(
            Tensor::ones(&[num_features]),
            Tensor::zeros(&[num_features]),
            Tensor::zeros(&[num_features]),
            Tensor::ones(&[num_features]),
            eps,
        )
    }

    fn validate(&self) -> Result<()> {
        const OP: &str = "BNParams";
        if self.num_features == 0 {
            return Err(TensorError::invalid_argument_op(OP, "num_features must be positive"));
        }
        for (name, t) in [
            ("gamma", &self.gamma),
            ("beta", &self.beta),
            ("running_mean", &self.running_mean),
            ("running_var", &self.running_var),
        ] {
            if t.shape().dims() != [self.num_features] {
                return Err(TensorError::shape_mismatch(
                    OP,
                    &format!("{name} [{}]", self.num_features),
                    &format!("{name} {}", t.shape()),
                ));
            }
        }
        if !(self.eps > T::zero()) {
            return Err(TensorError::invalid_argument_op(OP, "eps must be positive"));
        }
        Ok(())
    }

    /// Replace the learned parameters and statistics, keeping `eps`.
    pub fn with_state(
        self,
        gamma: Tensor<T>,
        beta: Tensor<T>,
        running_mean: Tensor<T>,
        running_var: Tensor<T>,
    ) -> Result<Self> {
        let params = Self {
            gamma,
            beta,
            running_mean,
            running_var,
            ..self
        };
        params.validate()?;
        Ok(params)
    }

    /// Replace `eps`, keeping the statistics.
    pub fn with_eps(mut self, eps: T) -> Result<Self> {
        self.eps = eps;
        self.validate()?;
        Ok(self)
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Learned scale (gamma).
    pub fn scale(&self) -> &Tensor<T> {
        &self.gamma
    }

    /// Learned shift (beta).
    pub fn shift(&self) -> &Tensor<T> {
        &self.beta
    }

    pub fn running_mean(&self) -> &Tensor<T> {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor<T> {
        &self.running_var
    }

    pub fn eps(&self) -> T {
        self.eps
    }

    pub fn num_parameters(&self) -> usize {
        4 * self.num_features
    }
}

/// Inference-mode batch normalization over the channel axis.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm<T> {
    params: BNParams<T>,
}

impl<T: TensorElement> BatchNorm<T> {
    /// Wrap validated parameters as a layer.
    pub fn new(params: BNParams<T>) -> Self {
        Self { params }
    }

    /// Batch norm with freshly initialized statistics.
    pub fn identity(num_features: usize) -> Result<Self> {
        BNParams::identity(num_features).map(Self::new)
    }

    pub fn params(&self) -> &BNParams<T> {
        &self.params
    }

    pub fn into_params(self) -> BNParams<T> {
        self.params
    }

    /// Normalize an NCHW input with the running statistics.
    pub fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        let p = &self.params;
        ops::batch_norm_inference(
            input,
            &p.gamma,
            &p.beta,
            &p.running_mean,
            &p.running_var,
            p.eps,
        )
    }
}

impl<T: TensorElement> From<BNParams<T>> for BatchNorm<T> {
    fn from(params: BNParams<T>) -> Self {
        Self::new(params)
    }
}
