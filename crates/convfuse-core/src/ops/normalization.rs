//! Inference-mode batch normalization
//!
//! Uses running statistics only. The channel axis is axis 1, so `[N, C]`,
//! `[N, C, L]` and `[N, C, H, W]` inputs are all accepted.

use crate::tensor::TensorElement;
use crate::{Result, Tensor, TensorError};
use ndarray::{ArrayView1, Axis, Ix1};

/// `y = (x - mean[c]) / sqrt(var[c] + eps) * gamma[c] + beta[c]`
pub fn batch_norm_inference<T: TensorElement>(
    input: &Tensor<T>,
    gamma: &Tensor<T>,
    beta: &Tensor<T>,
    running_mean: &Tensor<T>,
    running_var: &Tensor<T>,
    eps: T,
) -> Result<Tensor<T>> {
    let shape = input.shape();
    if shape.rank() < 2 {
        return Err(TensorError::invalid_shape(
            "batch_norm_inference",
            &format!("expects at least 2D input, got {}D", shape.rank()),
            shape.dims(),
        ));
    }
    let channels = shape[1];

    let gamma = channel_vector(gamma, "gamma", channels)?;
    let beta = channel_vector(beta, "beta", channels)?;
    let mean = channel_vector(running_mean, "running_mean", channels)?;
    let var = channel_vector(running_var, "running_var", channels)?;

    let mut output = input.array().clone();
    for (c, mut lane) in output.axis_iter_mut(Axis(1)).enumerate() {
        let denom = var[c] + eps;
        if !(denom > T::zero()) {
            return Err(TensorError::numerical_error(
                "batch_norm_inference",
                &format!("running_var + eps is not positive for channel {c}"),
            ));
        }
        let std = denom.sqrt();
        let (m, g, b) = (mean[c], gamma[c], beta[c]);
        lane.mapv_inplace(|x| (x - m) / std * g + b);
    }

    Ok(Tensor::from_array(output))
}

fn channel_vector<'a, T: TensorElement>(
    t: &'a Tensor<T>,
    name: &str,
    channels: usize,
) -> Result<ArrayView1<'a, T>> {
    let v = t.view().into_dimensionality::<Ix1>().map_err(|_| {
        TensorError::invalid_shape(
            "batch_norm_inference",
            &format!("{name} must be 1D"),
            t.shape().dims(),
        )
    })?;
    if v.len() != channels {
        return Err(TensorError::shape_mismatch(
            "batch_norm_inference",
            &format!("{name} of length {channels}"),
            &format!("{name} of length {}", v.len()),
        ));
    }
    Ok(v)
}
