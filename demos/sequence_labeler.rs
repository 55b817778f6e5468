//! Sequence-to-Sequence Example - encoder/decoder with additive attention
//! over a synthetic batch of variable-length sequences.
//!
//! This example demonstrates:
//! - Driving a bidirectional GRU encoder over masked sequences
//! - Decoding with the attention GRU (teacher forcing handled inside)
//! - Inspecting the per-step attention weights the decoder exposes
//! - Dropout gated by a train/inference switch input
//!
//! Run with: `cargo run --example sequence_labeler`

use dagnet::asg::{DType, Value};
use dagnet::nn::{bidirectional_gru, softmax, AttentionGru, Dropout};
use dagnet::random::SeedStream;
use dagnet::runtime::interpreter::Interpreter;
use dagnet::tensor::{add_datasets_to_graph, shared_graph};

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== dagnet Attention Seq2Seq Example ===\n");

    let enc_steps = 7;
    let dec_steps = 5;
    let batch = 4;
    let vocab = 12;
    let hidden = 6;

    let mut data_rng = StdRng::seed_from_u64(515);
    let mut one_hot = |steps: usize, classes: usize| -> ArrayD<f32> {
        let mut seq = ArrayD::<f32>::zeros(IxDyn(&[steps, batch, classes]));
        for t in 0..steps {
            for b in 0..batch {
                seq[[t, b, data_rng.gen_range(0..classes)]] = 1.0;
            }
        }
        seq
    };
    let source_data = one_hot(enc_steps, vocab);
    let target_data = one_hot(dec_steps, vocab);

    // Две последние позиции у половины примеров - выравнивающий паддинг
    let mut source_mask_data = ArrayD::from_elem(IxDyn(&[enc_steps, batch]), 1.0f32);
    for b in 0..batch / 2 {
        source_mask_data[[enc_steps - 1, b]] = 0.0;
        source_mask_data[[enc_steps - 2, b]] = 0.0;
    }
    let target_mask_data = ArrayD::from_elem(IxDyn(&[dec_steps, batch]), 1.0f32);
    let switch_data = ArrayD::from_elem(IxDyn(&[]), 1.0f32);

    let context = shared_graph();
    let mut seeds = SeedStream::new(1999);
    let mut datasets = add_datasets_to_graph(
        &context,
        &[
            ("source", &source_data, DType::F32),
            ("target", &target_data, DType::F32),
            ("source_mask", &source_mask_data, DType::F32),
            ("target_mask", &target_mask_data, DType::F32),
            ("train_switch", &switch_data, DType::F32),
        ],
    )?;
    let switch = datasets.remove(4);
    let target_mask = datasets.remove(3);
    let source_mask = datasets.remove(2);
    let target = datasets.remove(1);
    let source = datasets.remove(0);

    // Кодировщик: двунаправленный GRU с dropout по признакам
    let encoded = bidirectional_gru(&context, &[&source], &source_mask, hidden, "enc", &mut seeds, true)?;
    let regularized = Dropout::new(0.2).apply(&[&encoded], &switch, &mut seeds)?;

    // Декодер с аддитивным вниманием по всем состояниям кодировщика
    let decoder = AttentionGru::new(&context, &[&target], &[&regularized], "dec", &mut seeds, true)?;
    let (hidden_seq, _contexts, attention) =
        decoder.apply(&[&target], &[&regularized], &target_mask, &source_mask)?;
    let step_probs = softmax(&hidden_seq)?;

    let mut feed = HashMap::new();
    feed.insert("source".to_string(), Value::Tensor(source_data));
    feed.insert("target".to_string(), Value::Tensor(target_data));
    feed.insert("source_mask".to_string(), Value::Tensor(source_mask_data));
    feed.insert("target_mask".to_string(), Value::Tensor(target_mask_data));
    feed.insert("train_switch".to_string(), Value::Tensor(switch_data));

    let results = Interpreter::new().run(
        &context.borrow(),
        &[&step_probs, &attention],
        &feed,
    )?;

    let probs = match &results[0] {
        Value::Tensor(a) => a.clone(),
        other => panic!("expected tensor, got {:?}", other),
    };
    let attention_weights = match &results[1] {
        Value::Tensor(a) => a.clone(),
        other => panic!("expected tensor, got {:?}", other),
    };

    println!("decoder output shape   : {:?}", probs.shape());
    println!("attention stack shape  : {:?}", attention_weights.shape());
    println!("\nAttention of sample 0 over encoder steps, per decoder step:");
    for t in 0..dec_steps {
        let row: Vec<String> = (0..enc_steps)
            .map(|enc_t| format!("{:.3}", attention_weights[[t, 0, enc_t]]))
            .collect();
        println!("  step {}: [{}]", t, row.join(", "));
    }
    println!("\nGraph construction and forward evaluation finished.");
    Ok(())
}
