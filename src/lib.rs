//! # dagnet: Graph-building Neural Network Toolkit in Rust
//!
//! **dagnet** constructs neural networks as symbolic computation graphs.
//! Its key feature is a parameter registry built into the graph context:
//! every layer registers its named parameter tensors (with shapes, kinds
//! and initial values) while adding operation nodes to an
//! **Abstract Semantic Graph (ASG)**, and the whole network can then be
//! executed by a backend, inspected, or handed to an external optimizer.
//!
//! ## Usage Example
//!
//! ```no_run
//! use dagnet::asg::DType;
//! use dagnet::nn::{softplus_layer, softmax_layer};
//! use dagnet::random::SeedStream;
//! use dagnet::tensor::{add_datasets_to_graph, shared_graph};
//! use ndarray::ArrayD;
//!
//! // 1. Create graph context and a deterministic seed stream
//! let context = shared_graph();
//! let mut seeds = SeedStream::new(1999);
//!
//! // 2. Register dataset inputs
//! let x_data = ArrayD::<f32>::zeros(ndarray::IxDyn(&[100, 784]));
//! let x = add_datasets_to_graph(&context, &[("X", &x_data, DType::F32)])
//!     .unwrap()
//!     .remove(0);
//!
//! // 3. Build the network graph, registering parameters along the way
//! let hidden = softplus_layer(&context, &[&x], "l1", 200, &mut seeds).unwrap();
//! let class_probs = softmax_layer(&context, &[&hidden], "y", 10, &mut seeds).unwrap();
//!
//! // Graph is ready for execution on a backend or for an optimizer to
//! // pick up `context.borrow().learned_parameters()`.
//! ```

// Declare public modules that constitute the core library API.
pub mod analysis;
pub mod asg;
pub mod losses;
pub mod nn;
pub mod random;
pub mod runtime;
pub mod tensor;
