//! Module containing implementations of loss functions in graph paradigm.
//!
//! Loss functions here are regular Rust functions that take symbolic
//! `Tensor` descriptors and add nodes to the graph necessary for computing
//! the error value. Each returns a per-sample cost of shape (batch, 1);
//! call [`Tensor::mean`] on the result for a scalar training objective.
//!
//! # Available Loss Functions
//!
//! - **Binary Cross-Entropy**: `binary_crossentropy`
//! - **Categorical Cross-Entropy**: `categorical_crossentropy`
//! - **Squared Error**: `squared_error`
//! - **Absolute Error**: `absolute_error`
//! - **Gaussian KL Divergence**: `gaussian_kl`, `gaussian_log_kl`

use crate::tensor::{GraphError, Tensor};

/// Stabilization epsilon keeping the logarithms of predicted
/// probabilities finite.
const EPS: f32 = 1e-8;

/// Binary cross-entropy between predicted probabilities and 0/1 targets,
/// summed over the feature axis.
///
/// `-(t * log(p) + (1 - t) * log(1 - p))`
pub fn binary_crossentropy(predicted: &Tensor, target: &Tensor) -> Result<Tensor, GraphError> {
    let eps = predicted.scalar_like(EPS);
    let one = predicted.ones_like();
    let positive = target * &(predicted + &eps).log();
    let negative = &(&one - target) * &(&(&one - predicted) + &eps).log();
    let last = predicted.expected_dims()?.len() - 1;
    Ok((-&(&positive + &negative)).sum_axis(last))
}

/// Categorical cross-entropy between predicted class probabilities and
/// one-hot targets, summed over the class axis.
pub fn categorical_crossentropy(predicted: &Tensor, target: &Tensor) -> Result<Tensor, GraphError> {
    let eps = predicted.scalar_like(EPS);
    let last = predicted.expected_dims()?.len() - 1;
    Ok((-&(target * &(predicted + &eps).log())).sum_axis(last))
}

/// Squared error summed over the feature axis.
pub fn squared_error(predicted: &Tensor, target: &Tensor) -> Result<Tensor, GraphError> {
    let diff = predicted - target;
    let last = predicted.expected_dims()?.len() - 1;
    Ok(diff.pow_scalar(2.0).sum_axis(last))
}

/// Absolute error summed over the feature axis.
///
/// `|x|` is expressed through the graph primitives as `relu(x) + relu(-x)`.
pub fn absolute_error(predicted: &Tensor, target: &Tensor) -> Result<Tensor, GraphError> {
    let diff = predicted - target;
    let magnitude = &diff.relu() + &(-&diff).relu();
    let last = predicted.expected_dims()?.len() - 1;
    Ok(magnitude.sum_axis(last))
}

/// KL divergence from N(mu, sigma^2) to the standard normal prior, with the
/// scale given directly as a standard deviation.
///
/// `-0.5 * sum(1 + log(sigma^2) - mu^2 - sigma^2)`
pub fn gaussian_kl(mus: &[&Tensor], sigmas: &[&Tensor]) -> Result<Tensor, GraphError> {
    let conc_mu = crate::nn::projection::concat_inputs(mus)?;
    let conc_sigma = crate::nn::projection::concat_inputs(sigmas)?;
    let one = conc_mu.ones_like();
    let sigma_sq = &conc_sigma * &conc_sigma;
    let log_sigma_sq = &conc_sigma.scalar_like(2.0) * &conc_sigma.log();
    let inner = &(&(&one + &log_sigma_sq) - &(&conc_mu * &conc_mu)) - &sigma_sq;
    let last = conc_mu.expected_dims()?.len() - 1;
    Ok(&inner.scalar_like(-0.5) * &inner.sum_axis(last))
}

/// KL divergence from N(mu, exp(log_sigma)) to the standard normal prior,
/// log-variance form matching [`crate::nn::gaussian_log_sample`].
///
/// `-0.5 * sum(1 + log_sigma - mu^2 - exp(log_sigma))`
pub fn gaussian_log_kl(mus: &[&Tensor], log_sigmas: &[&Tensor]) -> Result<Tensor, GraphError> {
    let conc_mu = crate::nn::projection::concat_inputs(mus)?;
    let conc_log_sigma = crate::nn::projection::concat_inputs(log_sigmas)?;
    let one = conc_mu.ones_like();
    let inner =
        &(&(&one + &conc_log_sigma) - &(&conc_mu * &conc_mu)) - &conc_log_sigma.exp();
    let last = conc_mu.expected_dims()?.len() - 1;
    Ok(&inner.scalar_like(-0.5) * &inner.sum_axis(last))
}
