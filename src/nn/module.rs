//! Module defining the core `Module` trait for all neural network layers.

use crate::tensor::{GraphError, Tensor};

/// Trait defining the common interface for feed-forward layers/modules.
///
/// In the graph-based architecture, a `Module` is a small stateful object
/// that owns its parameter handles: it is constructed once (registering the
/// parameters) and may be invoked many times, each invocation adding a new
/// pattern of operation nodes to the graph over the same parameters.
pub trait Module {
    /// Performs a "symbolic" forward pass, building the corresponding part
    /// of the graph over the given input expressions.
    fn apply(&self, inputs: &[&Tensor]) -> Result<Tensor, GraphError>;

    /// Returns a list of all parameters (as symbolic tensors)
    /// that belong to this module.
    fn parameters(&self) -> Vec<Tensor>;
}
