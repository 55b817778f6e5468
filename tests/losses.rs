//! Интеграционные тесты функций потерь и гауссовских выборок с линейной
//! параметризацией масштаба.

use dagnet::asg::{DType, Value};
use dagnet::losses::{
    absolute_error, binary_crossentropy, gaussian_kl, gaussian_log_kl, squared_error,
};
use dagnet::nn::{exp_layer, gaussian_sample, relu_layer};
use dagnet::random::SeedStream;
use dagnet::runtime::interpreter::Interpreter;
use dagnet::tensor::{add_datasets_to_graph, shared_graph, SharedGraph, Tensor};

use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;

const TOLERANCE: f32 = 1e-4;

fn tensor_of(value: &Value) -> &ArrayD<f32> {
    match value {
        Value::Tensor(a) => a,
        other => panic!("expected a tensor output, got {:?}", other),
    }
}

fn array_from(shape: &[usize], values: Vec<f32>) -> ArrayD<f32> {
    ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
}

fn dataset(ctx: &SharedGraph, name: &str, data: &ArrayD<f32>) -> Tensor {
    add_datasets_to_graph(ctx, &[(name, data, DType::F32)]).unwrap().remove(0)
}

fn run_single(ctx: &SharedGraph, output: &Tensor, feed: &[(&str, ArrayD<f32>)]) -> ArrayD<f32> {
    let mut inputs = HashMap::new();
    for (name, value) in feed {
        inputs.insert(name.to_string(), Value::Tensor(value.clone()));
    }
    let result = Interpreter::new().run(&ctx.borrow(), &[output], &inputs).unwrap();
    tensor_of(&result[0]).clone()
}

#[test]
fn squared_and_absolute_errors_match_hand_computation() {
    let ctx = shared_graph();
    let predicted_data = array_from(&[2, 2], vec![1.0, 2.0, -1.0, 0.5]);
    let target_data = array_from(&[2, 2], vec![0.0, 4.0, 1.0, 0.5]);
    let predicted = dataset(&ctx, "predicted", &predicted_data);
    let target = dataset(&ctx, "target", &target_data);

    let sq = squared_error(&predicted, &target).unwrap();
    let abs = absolute_error(&predicted, &target).unwrap();

    let feed = [("predicted", predicted_data), ("target", target_data)];
    let sq_value = run_single(&ctx, &sq, &feed);
    let abs_value = run_single(&ctx, &abs, &feed);

    // (1-0)^2 + (2-4)^2 = 5; (-1-1)^2 + 0 = 4
    assert_eq!(sq_value.shape(), &[2, 1]);
    assert!((sq_value[[0, 0]] - 5.0).abs() < TOLERANCE);
    assert!((sq_value[[1, 0]] - 4.0).abs() < TOLERANCE);
    // |1| + |-2| = 3; |-2| + 0 = 2
    assert!((abs_value[[0, 0]] - 3.0).abs() < TOLERANCE);
    assert!((abs_value[[1, 0]] - 2.0).abs() < TOLERANCE);
}

#[test]
fn binary_crossentropy_of_perfect_prediction_is_small() {
    let ctx = shared_graph();
    let predicted_data = array_from(&[1, 3], vec![1.0, 0.0, 1.0]);
    let target_data = array_from(&[1, 3], vec![1.0, 0.0, 1.0]);
    let predicted = dataset(&ctx, "predicted", &predicted_data);
    let target = dataset(&ctx, "target", &target_data);

    let nll = binary_crossentropy(&predicted, &target).unwrap().mean();
    let value = run_single(
        &ctx,
        &nll,
        &[("predicted", predicted_data), ("target", target_data)],
    );
    assert_eq!(value.ndim(), 0);
    assert!(value.first().unwrap().abs() < 1e-3);
}

#[test]
fn gaussian_kl_vanishes_for_the_standard_normal() {
    let ctx = shared_graph();
    let mu_data = array_from(&[2, 3], vec![0.0; 6]);
    let sigma_data = array_from(&[2, 3], vec![1.0; 6]);
    let log_sigma_data = array_from(&[2, 3], vec![0.0; 6]);
    let mu = dataset(&ctx, "mu", &mu_data);
    let sigma = dataset(&ctx, "sigma", &sigma_data);
    let log_sigma = dataset(&ctx, "log_sigma", &log_sigma_data);

    let kl = gaussian_kl(&[&mu], &[&sigma]).unwrap();
    let log_kl = gaussian_log_kl(&[&mu], &[&log_sigma]).unwrap();

    let feed = [
        ("mu", mu_data),
        ("sigma", sigma_data),
        ("log_sigma", log_sigma_data),
    ];
    let kl_value = run_single(&ctx, &kl, &feed);
    let log_kl_value = run_single(&ctx, &log_kl, &feed);
    for v in kl_value.iter().chain(log_kl_value.iter()) {
        assert!(v.abs() < TOLERANCE);
    }
}

#[test]
fn gaussian_sample_with_zero_scale_returns_the_mean() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let mu_data = array_from(&[2, 4], (0..8).map(|i| i as f32 * 0.3).collect());
    let sigma_data = array_from(&[2, 4], vec![0.0; 8]);
    let mu = dataset(&ctx, "mu", &mu_data);
    let sigma = dataset(&ctx, "sigma", &sigma_data);

    let sample = gaussian_sample(&ctx, &[&mu], &[&sigma], "draw", &mut seeds).unwrap();
    assert!(ctx.borrow().names_in_graph(&["draw_random"]));

    let value = run_single(
        &ctx,
        &sample,
        &[("mu", mu_data.clone()), ("sigma", sigma_data)],
    );
    // При нулевом масштабе шум гасится: остаётся чистое среднее
    assert_eq!(value, mu_data);
}

#[test]
fn relu_and_exp_layer_ranges() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = array_from(&[3, 4], (0..12).map(|i| i as f32 * 0.37 - 2.0).collect());
    let x = dataset(&ctx, "x", &x_data);

    let rectified = relu_layer(&ctx, &[&x], "rect", 5, &mut seeds).unwrap();
    let positive = exp_layer(&ctx, &[&x], "pos", 5, &mut seeds).unwrap();

    let feed = [("x", x_data)];
    let rect_value = run_single(&ctx, &rectified, &feed);
    let pos_value = run_single(&ctx, &positive, &feed);
    assert!(rect_value.iter().all(|&v| v >= 0.0));
    assert!(pos_value.iter().all(|&v| v > 0.0));
}
