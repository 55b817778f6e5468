//! Conditional VAE Example - building the full graph of a conditional
//! variational autoencoder over a synthetic binarized dataset.
//!
//! This example demonstrates:
//! - Registering dataset inputs in the graph context
//! - Stacking softplus encoder layers into a latent code
//! - Reparameterized sampling with the log-variance Gaussian layer
//! - Combining the KL term, reconstruction likelihood and an auxiliary
//!   classification cost into one objective
//! - Evaluating a forward pass through the reference interpreter
//!
//! Run with: `cargo run --example conditional_vae`

use dagnet::asg::{DType, Value};
use dagnet::losses::{binary_crossentropy, categorical_crossentropy, gaussian_log_kl};
use dagnet::nn::{
    gaussian_log_sample, linear_layer, sigmoid_layer, softmax_layer, softplus_layer,
};
use dagnet::random::SeedStream;
use dagnet::runtime::interpreter::Interpreter;
use dagnet::tensor::{add_datasets_to_graph, shared_graph};

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== dagnet Conditional VAE Example ===\n");

    let minibatch_size = 20;
    let n_input = 64;
    let n_targets = 10;
    let n_code = 16;
    let n_enc_layer = [64, 64, 64];
    let n_dec_layer = [48, 48];

    // Synthetic stand-in for a binarized image dataset with one-hot labels
    let mut data_rng = StdRng::seed_from_u64(2177);
    let mut x_data = ArrayD::<f32>::zeros(IxDyn(&[minibatch_size, n_input]));
    x_data.mapv_inplace(|_| if data_rng.gen::<f32>() > 0.5 { 1.0 } else { 0.0 });
    let mut y_data = ArrayD::<f32>::zeros(IxDyn(&[minibatch_size, n_targets]));
    for sample in 0..minibatch_size {
        y_data[[sample, sample % n_targets]] = 1.0;
    }

    // graph context holds the parameter registry used by every layer
    let context = shared_graph();
    let mut datasets = add_datasets_to_graph(
        &context,
        &[("X", &x_data, DType::F32), ("y", &y_data, DType::F32)],
    )?;
    let y_sym = datasets.remove(1);
    let x_sym = datasets.remove(0);
    // seed stream so the script is deterministic
    let mut seeds = SeedStream::new(1999);

    // q(y_pred | x)
    let y_l1_enc = softplus_layer(&context, &[&x_sym], "y_l1_enc", n_enc_layer[0], &mut seeds)?;
    let y_pred = softmax_layer(&context, &[&y_l1_enc], "y_pred", n_targets, &mut seeds)?;

    // partial q(z | x, y_pred)
    let x_l1_enc =
        softplus_layer(&context, &[&x_sym, &y_pred], "X_l1_enc", n_enc_layer[1], &mut seeds)?;
    let l2_enc = softplus_layer(&context, &[&x_l1_enc], "l2_enc", n_enc_layer[2], &mut seeds)?;

    // code layer
    let code_mu = linear_layer(&context, &[&l2_enc], "code_mu", n_code, &mut seeds)?;
    let code_log_sigma = linear_layer(&context, &[&l2_enc], "code_log_sigma", n_code, &mut seeds)?;
    let kl = gaussian_log_kl(&[&code_mu], &[&code_log_sigma])?.mean();
    let samp = gaussian_log_sample(&context, &[&code_mu], &[&code_log_sigma], "samp", &mut seeds)?;

    // decode path aka p(x | z, y) for labeled data
    let l1_dec = softplus_layer(&context, &[&samp, &y_sym], "l1_dec", n_dec_layer[0], &mut seeds)?;
    let l2_dec = softplus_layer(&context, &[&l1_dec], "l2_dec", n_dec_layer[1], &mut seeds)?;
    let out = sigmoid_layer(&context, &[&l2_dec], "out", n_input, &mut seeds)?;

    let nll = binary_crossentropy(&out, &x_sym)?.mean();
    // lower bound = -nll - kl; minimize its negation
    let base_cost = -&(&(-&nll) - &kl);

    let alpha = 0.1;
    let err = categorical_crossentropy(&y_pred, &y_sym)?.mean();
    let cost = &base_cost + &(&err.scalar_like(alpha) * &err);

    println!(
        "Registered learned parameters: {:?}\n",
        context.borrow().learned_parameters()
    );

    // One interpreted forward pass over the minibatch
    let mut feed = HashMap::new();
    feed.insert("X".to_string(), Value::Tensor(x_data));
    feed.insert("y".to_string(), Value::Tensor(y_data));
    let results = Interpreter::new().run(
        &context.borrow(),
        &[&nll, &kl, &err, &cost],
        &feed,
    )?;

    let scalar = |value: &Value| -> f32 {
        match value {
            Value::Tensor(a) => *a.first().unwrap_or(&f32::NAN),
            Value::ScalarF32(v) => *v,
        }
    };
    println!("reconstruction nll : {:.4}", scalar(&results[0]));
    println!("kl divergence      : {:.4}", scalar(&results[1]));
    println!("classification err : {:.4}", scalar(&results[2]));
    println!("total cost         : {:.4}", scalar(&results[3]));
    println!("\nGraph construction and forward evaluation finished.");
    Ok(())
}
