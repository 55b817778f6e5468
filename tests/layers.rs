//! Интеграционные тесты слоёв прямого распространения: построение графа,
//! регистрация параметров и численное выполнение через интерпретатор.

use dagnet::asg::{DType, Value};
use dagnet::nn::{
    gaussian_log_sample, softmax, softmax_layer, softmax_sample, Activation, Dropout, Embedding,
    FixedProjection, Module, Projection,
};
use dagnet::nn::init;
use dagnet::random::SeedStream;
use dagnet::runtime::interpreter::Interpreter;
use dagnet::tensor::{
    add_datasets_to_graph, names_in_graph, shared_graph, GraphError, SharedGraph, Tensor,
};

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

/// Детеминированный "датасет" с неповторяющимися значениями.
fn ramp(shape: &[usize], scale: f32) -> ArrayD<f32> {
    let count: usize = shape.iter().product();
    array_from(shape, (0..count).map(|i| (i as f32 * 0.17 - 1.0) * scale).collect())
}

fn dataset(ctx: &SharedGraph, name: &str, data: &ArrayD<f32>) -> Tensor {
    add_datasets_to_graph(ctx, &[(name, data, DType::F32)]).unwrap().remove(0)
}

#[test]
fn two_input_tanh_projection_end_to_end() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let a_data = ramp(&[2, 3], 0.5);
    let b_data = ramp(&[2, 5], 0.3);
    let a = dataset(&ctx, "a", &a_data);
    let b = dataset(&ctx, "b", &b_data);

    let layer = Projection::new(
        &ctx,
        &[&a, &b],
        "proj",
        4,
        &mut seeds,
        true,
        init::tanh_fan,
        Activation::Tanh,
    )
    .unwrap();
    let out = layer.apply(&[&a, &b]).unwrap();

    // Вес собирается по суммарной ширине входов: (3 + 5, 4)
    let borrowed = ctx.borrow();
    assert_eq!(borrowed.entry("proj_W").unwrap().shape, vec![8, 4]);
    assert_eq!(borrowed.entry("proj_b").unwrap().shape, vec![4]);
    assert_eq!(out.expected_dims().unwrap(), vec![2, 4]);
    drop(borrowed);

    let mut feed = HashMap::new();
    feed.insert("a".to_string(), Value::Tensor(a_data));
    feed.insert("b".to_string(), Value::Tensor(b_data));
    let result = Interpreter::new().run(&ctx.borrow(), &[&out], &feed).unwrap();
    let out_value = tensor_of(&result[0]);
    assert_eq!(out_value.shape(), &[2, 4]);
    assert!(out_value.iter().all(|v| v.abs() <= 1.0));
}

#[test]
fn softmax_rows_sum_to_one_for_rank_2_and_3() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ramp(&[3, 5], 1.0);
    let x = dataset(&ctx, "x", &x_data);
    let probs_2d = softmax_layer(&ctx, &[&x], "y", 7, &mut seeds).unwrap();

    let seq_data = ramp(&[4, 3, 5], 1.0);
    let seq = dataset(&ctx, "seq", &seq_data);
    let probs_3d = softmax(&seq).unwrap();

    let mut feed = HashMap::new();
    feed.insert("x".to_string(), Value::Tensor(x_data));
    feed.insert("seq".to_string(), Value::Tensor(seq_data));
    let result = Interpreter::new()
        .run(&ctx.borrow(), &[&probs_2d, &probs_3d], &feed)
        .unwrap();

    let p2 = tensor_of(&result[0]);
    assert_eq!(p2.shape(), &[3, 7]);
    for row in p2.rows() {
        assert!((row.sum() - 1.0).abs() < TOLERANCE);
    }

    let p3 = tensor_of(&result[1]);
    assert_eq!(p3.shape(), &[4, 3, 5]);
    for row in p3.rows() {
        assert!((row.sum() - 1.0).abs() < TOLERANCE);
    }
}

#[test]
fn dropout_with_zero_probability_is_identity() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ramp(&[4, 6], 1.0);
    let x = dataset(&ctx, "x", &x_data);
    let switch_data = ArrayD::from_elem(IxDyn(&[]), 1.0f32);
    let switch = dataset(&ctx, "switch", &switch_data);

    let dropped = Dropout::new(0.0).apply(&[&x], &switch, &mut seeds).unwrap();

    let mut feed = HashMap::new();
    feed.insert("x".to_string(), Value::Tensor(x_data.clone()));
    feed.insert("switch".to_string(), Value::Tensor(switch_data));
    let result = Interpreter::new().run(&ctx.borrow(), &[&dropped], &feed).unwrap();
    assert_eq!(tensor_of(&result[0]), &x_data);
}

#[test]
fn dropout_rejects_unsupported_rank() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let flat = ramp(&[8], 1.0);
    let x = dataset(&ctx, "x", &flat);
    let switch = dataset(&ctx, "switch", &ArrayD::from_elem(IxDyn(&[]), 1.0f32));
    let err = Dropout::new(0.3).apply(&[&x], &switch, &mut seeds).unwrap_err();
    assert!(matches!(err, GraphError::InvalidRank { actual: 1, .. }));
}

#[test]
fn dropout_masks_whole_features_across_time_for_sequences() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ArrayD::from_elem(IxDyn(&[5, 2, 8]), 1.0f32);
    let x = dataset(&ctx, "x", &x_data);
    let switch_data = ArrayD::from_elem(IxDyn(&[]), 1.0f32);
    let switch = dataset(&ctx, "switch", &switch_data);

    let dropped = Dropout::new(0.5).apply(&[&x], &switch, &mut seeds).unwrap();

    let mut feed = HashMap::new();
    feed.insert("x".to_string(), Value::Tensor(x_data));
    feed.insert("switch".to_string(), Value::Tensor(switch_data));
    let result = Interpreter::new().run(&ctx.borrow(), &[&dropped], &feed).unwrap();
    let out = tensor_of(&result[0]);
    // Маска не зависит от времени: столбец (batch, feature) либо весь
    // нулевой, либо весь масштабированный
    for b in 0..2 {
        for f in 0..8 {
            let first = out[[0, b, f]];
            for t in 1..5 {
                assert_eq!(out[[t, b, f]], first);
            }
            assert!(first == 0.0 || (first - 2.0).abs() < TOLERANCE);
        }
    }
}

#[test]
fn fixed_projection_applies_constant_transform() {
    let ctx = shared_graph();
    let x_data = array_from(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let x = dataset(&ctx, "x", &x_data);
    let transform = array_from(&[3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);

    let layer =
        FixedProjection::new(&ctx, &[&x], transform, "pca", None, None, true).unwrap();
    let out = layer.apply(&[&x]).unwrap();

    // Матрица преобразования фиксирована, обучаемы только поправки
    assert_eq!(ctx.borrow().learned_parameters(), vec!["pca_pre", "pca_post"]);

    let mut feed = HashMap::new();
    feed.insert("x".to_string(), Value::Tensor(x_data));
    let result = Interpreter::new().run(&ctx.borrow(), &[&out], &feed).unwrap();
    let expected = array_from(&[2, 2], vec![4.0, 5.0, 10.0, 11.0]);
    let got = tensor_of(&result[0]);
    for (g, e) in got.iter().zip(expected.iter()) {
        assert!((g - e).abs() < TOLERANCE);
    }
}

#[test]
fn embedding_requires_integer_index_vectors() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let float_data = ramp(&[4], 1.0);
    let float_input = dataset(&ctx, "floats", &float_data);
    let err = Embedding::new(&ctx, &[&float_input], 10, 6, "emb", &mut seeds, true, init::uniform)
        .unwrap_err();
    assert!(matches!(err, GraphError::InvalidIndexInput { .. }));
}

#[test]
fn embedding_gathers_and_reshapes() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let idx_a = array_from(&[4], vec![0.0, 2.0, 1.0, 2.0]);
    let idx_b = array_from(&[4], vec![1.0, 1.0, 0.0, 2.0]);
    let a = add_datasets_to_graph(&ctx, &[("idx_a", &idx_a, DType::I32)]).unwrap().remove(0);
    let b = add_datasets_to_graph(&ctx, &[("idx_b", &idx_b, DType::I32)]).unwrap().remove(0);

    let layer = Embedding::new(&ctx, &[&a, &b], 3, 5, "emb", &mut seeds, true, init::uniform)
        .unwrap();
    let out = layer.apply(&[&a, &b]).unwrap();
    assert_eq!(out.expected_dims().unwrap(), vec![4, 2, 5]);

    let mut feed = HashMap::new();
    feed.insert("idx_a".to_string(), Value::Tensor(idx_a));
    feed.insert("idx_b".to_string(), Value::Tensor(idx_b));
    let result = Interpreter::new().run(&ctx.borrow(), &[&out], &feed).unwrap();
    assert_eq!(tensor_of(&result[0]).shape(), &[4, 2, 5]);
}

#[test]
fn gaussian_log_sample_is_reproducible_and_registered() {
    let sample_for_master_seed = |master: u64| -> ArrayD<f32> {
        let ctx = shared_graph();
        let mut seeds = SeedStream::new(master);
        let mu_data = ramp(&[3, 4], 0.2);
        let log_sigma_data = ramp(&[3, 4], 0.1);
        let mu = dataset(&ctx, "mu", &mu_data);
        let log_sigma = dataset(&ctx, "log_sigma", &log_sigma_data);
        let sample = gaussian_log_sample(&ctx, &[&mu], &[&log_sigma], "code", &mut seeds).unwrap();
        assert!(names_in_graph(&ctx, &["code_random"]));

        let mut feed = HashMap::new();
        feed.insert("mu".to_string(), Value::Tensor(mu_data));
        feed.insert("log_sigma".to_string(), Value::Tensor(log_sigma_data));
        let result = Interpreter::new().run(&ctx.borrow(), &[&sample], &feed).unwrap();
        tensor_of(&result[0]).clone()
    };

    let first = sample_for_master_seed(1999);
    let second = sample_for_master_seed(1999);
    let different = sample_for_master_seed(2000);
    assert_eq!(first, second);
    assert_ne!(first, different);
    assert_eq!(first.shape(), &[3, 4]);
}

#[test]
fn softmax_sample_draws_one_hot_rows() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    // Вырожденные вероятности: выбор предрешён
    let probs = array_from(
        &[3, 3],
        vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    );
    let p = dataset(&ctx, "p", &probs);
    let sample = softmax_sample(&ctx, &[&p], "draw", &mut seeds).unwrap();

    let mut feed = HashMap::new();
    feed.insert("p".to_string(), Value::Tensor(probs));
    let result = Interpreter::new().run(&ctx.borrow(), &[&sample], &feed).unwrap();
    let drawn = tensor_of(&result[0]);
    for (row_index, row) in drawn.rows().into_iter().enumerate() {
        assert!((row.sum() - 1.0).abs() < TOLERANCE);
        assert!((row[row_index] - 1.0).abs() < TOLERANCE);
    }
}

#[test]
fn shared_weights_via_explicit_bind() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ramp(&[2, 6], 0.4);
    let y_data = ramp(&[2, 6], 0.9);
    let x = dataset(&ctx, "x", &x_data);
    let y = dataset(&ctx, "y", &y_data);

    let original = Projection::new(
        &ctx,
        &[&x],
        "tied",
        4,
        &mut seeds,
        true,
        init::tanh_fan,
        Activation::Linear,
    )
    .unwrap();
    let out_x = original.apply(&[&x]).unwrap();

    let bound = Projection::bind(&ctx, "tied", Activation::Linear).unwrap();
    let out_y = bound.apply(&[&y]).unwrap();

    // Повторная привязка не создаёт новых параметров
    assert_eq!(ctx.borrow().learned_parameters(), vec!["tied_W", "tied_b"]);

    let mut feed = HashMap::new();
    feed.insert("x".to_string(), Value::Tensor(x_data.clone()));
    feed.insert("y".to_string(), Value::Tensor(x_data));
    let result = Interpreter::new().run(&ctx.borrow(), &[&out_x, &out_y], &feed).unwrap();
    // На одинаковых данных связанные слои дают одинаковый результат
    assert_eq!(tensor_of(&result[0]), tensor_of(&result[1]));

    let missing = Projection::bind(&ctx, "never_built", Activation::Linear).unwrap_err();
    assert!(matches!(missing, GraphError::MissingName(_)));
}
