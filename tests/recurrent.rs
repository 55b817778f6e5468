//! Интеграционные тесты рекуррентных ячеек: формы, продвижение состояния
//! и точное протягивание состояния сквозь замаскированные шаги.

use dagnet::asg::{DType, Value};
use dagnet::nn::{
    bidirectional_gru, shift_layer, AttentionGru, ConditionalGru, GruRecurrent, LstmRecurrent,
    TanhRecurrent,
};
use dagnet::random::SeedStream;
use dagnet::runtime::interpreter::Interpreter;
use dagnet::tensor::{add_datasets_to_graph, shared_graph, GraphError, SharedGraph, Tensor};

use ndarray::{ArrayD, IxDyn};
use std::collections::HashMap;

const TOLERANCE: f32 = 1e-4;

fn tensor_of(value: &Value) -> &ArrayD<f32> {
    match value {
        Value::Tensor(a) => a,
        other => panic!("expected a tensor output, got {:?}", other),
    }
}

fn ramp(shape: &[usize], scale: f32) -> ArrayD<f32> {
    let count: usize = shape.iter().product();
    ArrayD::from_shape_vec(
        IxDyn(shape),
        (0..count).map(|i| ((i % 17) as f32 * 0.21 - 1.5) * scale).collect(),
    )
    .unwrap()
}

fn dataset(ctx: &SharedGraph, name: &str, data: &ArrayD<f32>) -> Tensor {
    add_datasets_to_graph(ctx, &[(name, data, DType::F32)]).unwrap().remove(0)
}

/// Маска (time, batch), у которой для примера 0 шаги с `cut` и дальше
/// обнулены, остальные примеры валидны целиком.
fn mask_with_cut(steps: usize, batch: usize, cut: usize) -> ArrayD<f32> {
    let mut mask = ArrayD::from_elem(IxDyn(&[steps, batch]), 1.0f32);
    for t in cut..steps {
        mask[[t, 0]] = 0.0;
    }
    mask
}

fn run(ctx: &SharedGraph, outputs: &[&Tensor], feed: &[(&str, ArrayD<f32>)]) -> Vec<Value> {
    let mut inputs = HashMap::new();
    for (name, value) in feed {
        inputs.insert(name.to_string(), Value::Tensor(value.clone()));
    }
    Interpreter::new().run(&ctx.borrow(), outputs, &inputs).unwrap()
}

#[test]
fn gru_with_full_mask_updates_state() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ramp(&[5, 2, 3], 1.0);
    let mask_data = ArrayD::from_elem(IxDyn(&[5, 2]), 1.0f32);
    let x = dataset(&ctx, "x", &x_data);
    let mask = dataset(&ctx, "mask", &mask_data);

    let cell = GruRecurrent::new(&ctx, &[&x], 6, "enc", &mut seeds, true).unwrap();
    let h = cell.apply(&[&x], &mask).unwrap();
    assert_eq!(h.expected_dims().unwrap(), vec![5, 2, 6]);

    let result = run(&ctx, &[&h], &[("x", x_data), ("mask", mask_data)]);
    let states = tensor_of(&result[0]);
    assert_eq!(states.shape(), &[5, 2, 6]);
    // Рекуррентность действительно продвигает состояние от нулевого
    let last = states.index_axis(ndarray::Axis(0), 4);
    assert!(last.iter().any(|v| v.abs() > 1e-3));
}

#[test]
fn gru_frozen_sample_keeps_state_through_masked_steps() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ramp(&[5, 2, 3], 1.0);
    let mask_data = mask_with_cut(5, 2, 3);
    let x = dataset(&ctx, "x", &x_data);
    let mask = dataset(&ctx, "mask", &mask_data);

    let cell = GruRecurrent::new(&ctx, &[&x], 6, "enc", &mut seeds, true).unwrap();
    let h = cell.apply(&[&x], &mask).unwrap();

    let result = run(&ctx, &[&h], &[("x", x_data), ("mask", mask_data)]);
    let states = tensor_of(&result[0]);
    for unit in 0..6 {
        // Пример 0 заморожен с шага 3: состояние равно состоянию шага 2 бит в бит
        assert_eq!(states[[4, 0, unit]], states[[2, 0, unit]]);
        assert_eq!(states[[3, 0, unit]], states[[2, 0, unit]]);
    }
    // Пример 1 валиден целиком и продолжает обновляться
    let moved = (0..6).any(|u| states[[4, 1, u]] != states[[2, 1, u]]);
    assert!(moved);
}

#[test]
fn tanh_cell_respects_mask_exactly() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ramp(&[4, 3, 5], 1.0);
    let mask_data = mask_with_cut(4, 3, 2);
    let x = dataset(&ctx, "x", &x_data);
    let mask = dataset(&ctx, "mask", &mask_data);

    let cell = TanhRecurrent::new(&ctx, &[&x], 4, "rnn", &mut seeds, true).unwrap();
    let h = cell.apply(&[&x], &mask).unwrap();
    assert_eq!(h.expected_dims().unwrap(), vec![4, 3, 4]);

    let result = run(&ctx, &[&h], &[("x", x_data), ("mask", mask_data)]);
    let states = tensor_of(&result[0]);
    for unit in 0..4 {
        assert_eq!(states[[3, 0, unit]], states[[1, 0, unit]]);
    }
}

#[test]
fn lstm_respects_mask_exactly_and_returns_hidden_stack() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ramp(&[6, 2, 3], 1.0);
    let mask_data = mask_with_cut(6, 2, 4);
    let x = dataset(&ctx, "x", &x_data);
    let mask = dataset(&ctx, "mask", &mask_data);

    let cell = LstmRecurrent::new(&ctx, &[&x], 5, "lstm", &mut seeds, true).unwrap();
    let h = cell.apply(&[&x], &mask).unwrap();
    assert_eq!(h.expected_dims().unwrap(), vec![6, 2, 5]);

    let result = run(&ctx, &[&h], &[("x", x_data), ("mask", mask_data)]);
    let states = tensor_of(&result[0]);
    for unit in 0..5 {
        assert_eq!(states[[5, 0, unit]], states[[3, 0, unit]]);
        assert_eq!(states[[4, 0, unit]], states[[3, 0, unit]]);
    }
}

#[test]
fn bidirectional_gru_concatenates_directions() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let x_data = ramp(&[4, 2, 3], 1.0);
    let mask_data = ArrayD::from_elem(IxDyn(&[4, 2]), 1.0f32);
    let x = dataset(&ctx, "x", &x_data);
    let mask = dataset(&ctx, "mask", &mask_data);

    let h = bidirectional_gru(&ctx, &[&x], &mask, 5, "bi", &mut seeds, true).unwrap();
    assert_eq!(h.expected_dims().unwrap(), vec![4, 2, 10]);

    let result = run(&ctx, &[&h], &[("x", x_data), ("mask", mask_data)]);
    assert_eq!(tensor_of(&result[0]).shape(), &[4, 2, 10]);
}

#[test]
fn shift_layer_zero_fills_the_first_step() {
    let ctx = shared_graph();
    let x_data = ramp(&[3, 2, 4], 1.0);
    let x = dataset(&ctx, "x", &x_data);
    let shifted = shift_layer(&[&x]).unwrap();

    let result = run(&ctx, &[&shifted], &[("x", x_data.clone())]);
    let out = tensor_of(&result[0]);
    assert!(out.index_axis(ndarray::Axis(0), 0).iter().all(|&v| v == 0.0));
    for t in 1..3 {
        assert_eq!(
            out.index_axis(ndarray::Axis(0), t),
            x_data.index_axis(ndarray::Axis(0), t - 1)
        );
    }
}

#[test]
fn conditional_gru_returns_hidden_and_broadcast_context() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let outputs_data = ramp(&[4, 2, 3], 1.0);
    let hiddens_data = ramp(&[5, 2, 6], 0.7);
    let mask_data = ArrayD::from_elem(IxDyn(&[4, 2]), 1.0f32);
    let outputs = dataset(&ctx, "outputs", &outputs_data);
    let hiddens = dataset(&ctx, "hiddens", &hiddens_data);
    let mask = dataset(&ctx, "mask", &mask_data);

    let cell = ConditionalGru::new(&ctx, &[&outputs], &[&hiddens], 6, "dec", &mut seeds, true)
        .unwrap();
    let (h, context) = cell.apply(&[&outputs], &[&hiddens], &mask).unwrap();
    assert_eq!(h.expected_dims().unwrap(), vec![4, 2, 6]);
    assert_eq!(context.expected_dims().unwrap(), vec![4, 2, 6]);

    let result = run(
        &ctx,
        &[&h, &context],
        &[("outputs", outputs_data), ("hiddens", hiddens_data.clone()), ("mask", mask_data)],
    );
    let contexts = tensor_of(&result[1]);
    // Контекст - последнее состояние кодировщика, растянутое по времени
    let last_hidden = hiddens_data.index_axis(ndarray::Axis(0), 4);
    for t in 0..4 {
        let frame = contexts.index_axis(ndarray::Axis(0), t);
        for (a, b) in frame.iter().zip(last_hidden.iter()) {
            assert!((a - b).abs() < TOLERANCE);
        }
    }
}

#[test]
fn conditional_gru_rejects_mismatched_hidden_width() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let outputs_data = ramp(&[4, 2, 3], 1.0);
    let hiddens_data = ramp(&[5, 2, 6], 0.7);
    let outputs = dataset(&ctx, "outputs", &outputs_data);
    let hiddens = dataset(&ctx, "hiddens", &hiddens_data);

    let err = ConditionalGru::new(&ctx, &[&outputs], &[&hiddens], 4, "dec", &mut seeds, true)
        .unwrap_err();
    assert!(matches!(err, GraphError::ContextWidthMismatch { expected: 6, actual: 4 }));
}

#[test]
fn attention_weights_are_normalized_over_valid_encoder_steps() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let outputs_data = ramp(&[6, 2, 3], 1.0);
    let hiddens_data = ramp(&[4, 2, 5], 0.8);
    let output_mask_data = ArrayD::from_elem(IxDyn(&[6, 2]), 1.0f32);
    // Кодировщик: у примера 0 валидны только первые два шага
    let hidden_mask_data = mask_with_cut(4, 2, 2);

    let outputs = dataset(&ctx, "outputs", &outputs_data);
    let hiddens = dataset(&ctx, "hiddens", &hiddens_data);
    let output_mask = dataset(&ctx, "output_mask", &output_mask_data);
    let hidden_mask = dataset(&ctx, "hidden_mask", &hidden_mask_data);

    let cell = AttentionGru::new(&ctx, &[&outputs], &[&hiddens], "att", &mut seeds, true).unwrap();
    let (h, contexts, attention) = cell
        .apply(&[&outputs], &[&hiddens], &output_mask, &hidden_mask)
        .unwrap();
    assert_eq!(h.expected_dims().unwrap(), vec![6, 2, 5]);
    assert_eq!(contexts.expected_dims().unwrap(), vec![6, 2, 5]);
    assert_eq!(attention.expected_dims().unwrap(), vec![6, 2, 4]);

    let result = run(
        &ctx,
        &[&h, &contexts, &attention],
        &[
            ("outputs", outputs_data),
            ("hiddens", hiddens_data),
            ("output_mask", output_mask_data),
            ("hidden_mask", hidden_mask_data.clone()),
        ],
    );
    let weights = tensor_of(&result[2]);
    for t in 0..6 {
        for sample in 0..2 {
            let mut total = 0.0;
            for enc_t in 0..4 {
                let w = weights[[t, sample, enc_t]];
                if hidden_mask_data[[enc_t, sample]] == 0.0 {
                    // Невалидные позиции кодировщика не получают веса
                    assert_eq!(w, 0.0);
                } else {
                    assert!(w >= 0.0);
                    total += w;
                }
            }
            assert!((total - 1.0).abs() < TOLERANCE, "step {} sample {}: {}", t, sample, total);
        }
    }
}

#[test]
fn attention_gru_respects_decoder_mask_exactly() {
    let ctx = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let outputs_data = ramp(&[5, 2, 3], 1.0);
    let hiddens_data = ramp(&[3, 2, 4], 0.8);
    let output_mask_data = mask_with_cut(5, 2, 3);
    let hidden_mask_data = ArrayD::from_elem(IxDyn(&[3, 2]), 1.0f32);

    let outputs = dataset(&ctx, "outputs", &outputs_data);
    let hiddens = dataset(&ctx, "hiddens", &hiddens_data);
    let output_mask = dataset(&ctx, "output_mask", &output_mask_data);
    let hidden_mask = dataset(&ctx, "hidden_mask", &hidden_mask_data);

    let cell = AttentionGru::new(&ctx, &[&outputs], &[&hiddens], "att", &mut seeds, true).unwrap();
    let (h, _contexts, _attention) = cell
        .apply(&[&outputs], &[&hiddens], &output_mask, &hidden_mask)
        .unwrap();

    let result = run(
        &ctx,
        &[&h],
        &[
            ("outputs", outputs_data),
            ("hiddens", hiddens_data),
            ("output_mask", output_mask_data),
            ("hidden_mask", hidden_mask_data),
        ],
    );
    let states = tensor_of(&result[0]);
    for unit in 0..4 {
        assert_eq!(states[[4, 0, unit]], states[[2, 0, unit]]);
        assert_eq!(states[[3, 0, unit]], states[[2, 0, unit]]);
    }
}
