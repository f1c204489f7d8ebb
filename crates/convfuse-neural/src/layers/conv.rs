//! 2D Convolution Layer
//!
//! `ConvParams` is the immutable descriptor of a convolution (hyper-parameters
//! plus weight and optional bias); `Conv2D` is the layer that owns one and
//! runs it.

use convfuse_core::{ops, Result, Tensor, TensorElement, TensorError};

/// Immutable convolution descriptor.
///
/// Weight shape is `[out_channels, in_channels / groups, kernel_h, kernel_w]`.
/// `groups == 1` is a standard convolution, `groups == in_channels` a depthwise
/// one. An absent bias behaves as a zero vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams<T> {
    in_channels: usize,
    out_channels: usize,
    kernel_size: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
    groups: usize,
    weight: Tensor<T>,
    bias: Option<Tensor<T>>,
}

impl<T: TensorElement> ConvParams<T> {
    /// Creates a validated convolution descriptor
    ///
    /// # Arguments
    ///
    /// * `in_channels` - Number of input channels
    /// * `out_channels` - Number of output channels (filters)
    /// * `kernel_size` - Size of the convolution kernel (height, width)
    /// * `stride` - Stride for the convolution (height, width)
    /// * `padding` - Zero padding added to each side (height, width)
    /// * `groups` - Number of channel groups; must divide both channel counts
    /// * `weight` - `[out_channels, in_channels / groups, kernel_h, kernel_w]`
    /// * `bias` - Optional `[out_channels]`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        groups: usize,
        weight: Tensor<T>,
        bias: Option<Tensor<T>>,
    ) -> Result<Self> {
        let params = Self {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            groups,
            weight,
            bias,
        };
        params.validate()?;
        Ok(params)
    }

    /// Zero-initialized descriptor with the given hyper-parameters.
    pub fn zeros(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        groups: usize,
        use_bias: bool,
    ) -> Result<Self> {
        if groups == 0 || in_channels % groups != 0 {
            return Err(TensorError::invalid_argument_op(
                "ConvParams::zeros",
                &format!("groups={groups} must divide in_channels={in_channels}"),
            ));
        }
        let weight = Tensor::zeros(&[
            out_channels,
            in_channels / groups,
            kernel_size.0,
            kernel_size.1,
        ]);
        let bias = use_bias.then(|| Tensor::zeros(&[out_channels]));
        Self::new(
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            groups,
            weight,
            bias,
        )
    }

    fn validate(&self) -> Result<()> {
        const OP: &str = "ConvParams";
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(TensorError::invalid_argument_op(
                OP,
                "channel counts must be positive",
            ));
        }
        if self.kernel_size.0 == 0 || self.kernel_size.1 == 0 {
            return Err(TensorError::invalid_argument_op(OP, "kernel size must be positive"));
        }
        if self.stride.0 == 0 || self.stride.1 == 0 {
            return Err(TensorError::invalid_argument_op(OP, "stride must be positive"));
        }
        if self.groups == 0
            || self.in_channels % self.groups != 0
            || self.out_channels % self.groups != 0
        {
            return Err(TensorError::invalid_argument_op(
                OP,
                &format!(
                    "groups={} must divide in_channels={} and out_channels={}",
                    self.groups, self.in_channels, self.out_channels
                ),
            ));
        }

        let expected = self.weight_shape();
        if self.weight.shape().dims() != expected {
            return Err(TensorError::shape_mismatch(
                OP,
                &format!("weight {expected:?}"),
                &format!("weight {}", self.weight.shape()),
            ));
        }
        if let Some(bias) = &self.bias {
            if bias.shape().dims() != [self.out_channels] {
                return Err(TensorError::shape_mismatch(
                    OP,
                    &format!("bias [{}]", self.out_channels),
                    &format!("bias {}", bias.shape()),
                ));
            }
        }
        Ok(())
    }

    /// Expected weight shape for these hyper-parameters.
    pub fn weight_shape(&self) -> [usize; 4] {
        [
            self.out_channels,
            self.in_channels / self.groups,
            self.kernel_size.0,
            self.kernel_size.1,
        ]
    }

    /// Replace the weight, keeping every hyper-parameter.
    pub fn with_weight(mut self, weight: Tensor<T>) -> Result<Self> {
        self.weight = weight;
        self.validate()?;
        Ok(self)
    }

    /// Replace the bias, keeping every hyper-parameter.
    pub fn with_bias(mut self, bias: Option<Tensor<T>>) -> Result<Self> {
        self.bias = bias;
        self.validate()?;
        Ok(self)
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        self.kernel_size
    }

    pub fn stride(&self) -> (usize, usize) {
        self.stride
    }

    pub fn padding(&self) -> (usize, usize) {
        self.padding
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    /// One input channel per group.
    pub fn is_depthwise(&self) -> bool {
        self.groups > 1 && self.groups == self.in_channels
    }

    pub fn weight(&self) -> &Tensor<T> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor<T>> {
        self.bias.as_ref()
    }

    /// Bias values, with an absent bias read as zeros.
    pub fn bias_or_zeros(&self) -> Vec<T> {
        match &self.bias {
            Some(bias) => bias.to_vec(),
            None => vec![T::zero(); self.out_channels],
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.size() + self.bias.as_ref().map_or(0, |b| b.size())
    }
}

/// 2D convolutional layer (NCHW).
#[derive(Debug, Clone, PartialEq)]
pub struct Conv2D<T> {
    params: ConvParams<T>,
}

impl<T: TensorElement> Conv2D<T> {
    /// Wrap validated parameters as a layer.
    pub fn new(params: ConvParams<T>) -> Self {
        Self { params }
    }

    /// Zero-initialized convolution, mirroring the usual framework constructor.
    pub fn zeros(
        in_channels: usize,
        out_channels: usize,
        kernel_size: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        groups: usize,
        use_bias: bool,
    ) -> Result<Self> {
        ConvParams::zeros(
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
            groups,
            use_bias,
        )
        .map(Self::new)
    }

    pub fn params(&self) -> &ConvParams<T> {
        &self.params
    }

    pub fn into_params(self) -> ConvParams<T> {
        self.params
    }

    /// Convolve an NCHW input.
    pub fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        let p = &self.params;
        ops::conv2d(input, &p.weight, p.bias.as_ref(), p.stride, p.padding, p.groups)
    }
}

impl<T: TensorElement> From<ConvParams<T>> for Conv2D<T> {
    fn from(params: ConvParams<T>) -> Self {
        Self::new(params)
    }
}
