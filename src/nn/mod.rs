//! # Neural Network Layers Module
//!
//! This module contains building blocks for constructing neural networks.
//!
//! In the graph-based architecture, each "layer" is a constructor that adds
//! a specific pattern of nodes (operations and parameters) to the ASG. A
//! layer object registers its parameters once, under names derived from its
//! base name, and may be applied to compatible inputs any number of times;
//! explicit re-binding to already registered parameters is the supported
//! way to share weights.
//!
//! ## Available Layers
//!
//! ### Feed-forward
//! - [`Projection`]: affine projection of concatenated inputs with a
//!   pointwise nonlinearity ([`Activation`]), plus the
//!   `linear/sigmoid/tanh/softplus/relu/exp/softmax_layer` shorthands
//! - [`FixedProjection`]: constant transform with learned additive offsets
//! - [`Embedding`]: index-vector lookup table
//! - [`Dropout`]: unit dropout gated by a train/inference switch input
//!
//! ### Stochastic
//! - [`softmax_sample`]: categorical draw from averaged probabilities
//! - [`gaussian_sample`], [`gaussian_log_sample`]: reparameterized
//!   Gaussian draws (linear and log-variance forms)
//!
//! ### Recurrent
//! - [`TanhRecurrent`]: vanilla tanh cell
//! - [`GruRecurrent`], [`bidirectional_gru`]: gated recurrent units
//! - [`LstmRecurrent`]: long short-term memory cell
//! - [`ConditionalGru`]: decoder conditioned on a fixed encoder context
//! - [`AttentionGru`]: decoder with additive attention over encoder states
//! - [`shift_layer`]: teacher-forcing time shift
//!
//! ### Initializers
//! - [`init`]: uniform, scaled-normal, fan-based and orthogonal weight
//!   initializers
//!
//! ## Example
//!
//! ```ignore
//! use dagnet::nn::{tanh_layer, Module};
//! use dagnet::random::SeedStream;
//! use dagnet::tensor::shared_graph;
//!
//! let ctx = shared_graph();
//! let mut seeds = SeedStream::new(1999);
//! // x is a registered dataset input of shape (batch, features)
//! let h = tanh_layer(&ctx, &[&x], "l1", 128, &mut seeds)?;
//! ```

pub mod attention;
pub mod dropout;
pub mod embedding;
pub mod init;
pub mod module;
pub mod projection;
pub mod recurrent;
pub mod sample;

// Re-export structures for convenience

pub use attention::{AttentionGru, ConditionalGru};
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use module::Module;
pub use projection::{
    exp_layer, linear_layer, relu_layer, sigmoid_layer, softmax, softmax_layer, softplus_layer,
    tanh_layer, Activation, FixedProjection, Projection,
};
pub use recurrent::{
    bidirectional_gru, shift_layer, GruRecurrent, LstmRecurrent, TanhRecurrent,
};
pub use sample::{gaussian_log_sample, gaussian_sample, softmax_sample};
