use crate::deployment::{FusionError, LayerFusion};
use crate::layers::Layer;
use convfuse_core::{Result, Tensor, TensorElement};

/// Sequential model that applies layers in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequential<T> {
    layers: Vec<Layer<T>>,
}

impl<T: TensorElement> Sequential<T> {
    /// Create a new sequential model with the given layers.
    pub fn new(layers: Vec<Layer<T>>) -> Self {
        Self { layers }
    }

    /// Get the number of layers in the model.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Check if the model is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Add a layer to the end of the sequence.
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, layer: impl Into<Layer<T>>) -> Self {
        self.layers.push(layer.into());
        self
    }

    /// Append a layer in place.
    pub fn push(&mut self, layer: impl Into<Layer<T>>) {
        self.layers.push(layer.into());
    }

    /// Get a reference to the layer at the given index.
    pub fn get_layer(&self, index: usize) -> Option<&Layer<T>> {
        self.layers.get(index)
    }

    /// The layers in execution order.
    pub fn layers(&self) -> &[Layer<T>] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<Layer<T>> {
        self.layers
    }

    /// Run every layer in order.
    ///
    /// Fails on a `Concat` layer, whose inputs only the enclosing network knows.
    pub fn forward(&self, input: &Tensor<T>) -> Result<Tensor<T>> {
        let mut output = input.clone();
        for layer in &self.layers {
            output = layer.forward(&output)?;
        }
        Ok(output)
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(Layer::num_parameters).sum()
    }

    /// Fold every batch norm into its convolution.
    pub fn fuse(&self, fusion: &LayerFusion) -> std::result::Result<Self, FusionError> {
        fusion.fuse_sequential(self).map(|(model, _)| model)
    }
}

impl<T: TensorElement> Default for Sequential<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: TensorElement> FromIterator<Layer<T>> for Sequential<T> {
    fn from_iter<I: IntoIterator<Item = Layer<T>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
