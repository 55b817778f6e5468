//! Рекуррентные ячейки: tanh-RNN, GRU, двунаправленный GRU и LSTM.
//!
//! Общая схема для всех семейств:
//! 1. Проверка рангов: каждый вход обязан быть (time, batch, features) -
//!    проверяется до того, как будет создан хоть один параметр.
//! 2. Конкатенация входов по оси признаков и одноразовая регистрация
//!    нулевого начального состояния `{name}_h0` (и `{name}_c0` для LSTM).
//! 3. Входная проекция применяется ко всей последовательности целиком,
//!    до цикла по времени.
//! 4. Переход шага - чистая функция от (состояния, входа шага, весов),
//!    собранная в отдельный подграф-тело и прокрученная по оси времени
//!    узлом Scan.
//!
//! Маска валидности (time, batch) смешивает свежее состояние с предыдущим
//! для каждого примера: `m * new + (1 - m) * old`. Позиции за пределами
//! настоящей длины последовательности просто протягивают последнее
//! валидное состояние - так пакетирование последовательностей разной
//! длины остаётся корректным.

use crate::asg::{AsgId, DType};
use crate::nn::init;
use crate::nn::projection::concat_inputs;
use crate::random::SeedStream;
use crate::tensor::{add_learned_to_graph, GraphError, SharedGraph, Tensor};

/// Проверка "каждый вход имеет ранг 3" - дешёвое предусловие перед
/// какой-либо регистрацией параметров.
pub(crate) fn validate_rank3(inputs: &[&Tensor], name: &str) -> Result<(), GraphError> {
    for input in inputs {
        let rank = input.expected_dims()?.len();
        if rank != 3 {
            return Err(GraphError::InvalidRank {
                name: name.to_string(),
                expected: 3,
                actual: rank,
            });
        }
    }
    Ok(())
}

/// Смешивание по маске: `m * fresh + (1 - m) * prev`, m формы (batch,).
pub(crate) fn masked_blend(m_t: &Tensor, fresh: &Tensor, prev: &Tensor) -> Tensor {
    let m = m_t.expand_dims(1);
    let inverse = &m.ones_like() - &m;
    &(&m * fresh) + &(&inverse * prev)
}

/// Срез n-го гейтового блока ширины `dim` по оси признаков.
pub(crate) fn slice_units(x: &Tensor, n: usize, dim: usize) -> Tensor {
    x.slice_axis(1, n * dim, dim)
}

/// Сдвиг конкатенированных выходов на один шаг по времени с нулевым
/// первым шагом - подготовка входа декодера для teacher forcing.
pub fn shift_layer(inputs: &[&Tensor]) -> Result<Tensor, GraphError> {
    Ok(concat_inputs(inputs)?.time_shift())
}

// --- Ванильная tanh-ячейка ---

/// Рекуррентная ячейка `h_t = tanh(x_t + h_{t-1} . U)`.
pub struct TanhRecurrent {
    pub hidden_dim: usize,
    h0: Tensor,
    weights: Tensor,
    bias: Tensor,
    recurrent: Tensor,
    body: AsgId,
}

impl TanhRecurrent {
    pub fn new(
        context: &SharedGraph,
        inputs: &[&Tensor],
        hidden_dim: usize,
        name: &str,
        seeds: &mut SeedStream,
        strict: bool,
    ) -> Result<Self, GraphError> {
        validate_rank3(inputs, name)?;
        let conc = concat_inputs(inputs)?;
        let dims = conc.expected_dims()?;
        let (batch, input_dim) = (dims[1], dims[2]);

        let h0_name = format!("{}_h0", name);
        let h0 = add_learned_to_graph(
            context,
            vec![init::zeros(&[batch, hidden_dim])],
            &[&h0_name],
            true,
        )?
        .remove(0);

        let w_name = format!("{}_tanh_rec_step_W", name);
        let b_name = format!("{}_tanh_rec_step_b", name);
        let u_name = format!("{}_tanh_rec_step_U", name);
        let np_w = init::uniform(&[input_dim, hidden_dim], &mut seeds.init_rng());
        let np_b = init::zeros(&[hidden_dim]);
        let np_u = init::ortho(&[hidden_dim, hidden_dim], &mut seeds.init_rng());
        let mut handles = add_learned_to_graph(
            context,
            vec![np_w, np_b, np_u],
            &[&w_name, &b_name, &u_name],
            strict,
        )?;
        let recurrent = handles.remove(2);
        let bias = handles.remove(1);
        let weights = handles.remove(0);

        let body = build_tanh_body(context, batch, hidden_dim);
        Ok(Self { hidden_dim, h0, weights, bias, recurrent, body })
    }

    /// Прокручивает ячейку по последовательности; возвращает стек скрытых
    /// состояний (time, batch, hidden).
    pub fn apply(&self, inputs: &[&Tensor], mask: &Tensor) -> Result<Tensor, GraphError> {
        validate_rank3(inputs, "tanh_recurrent")?;
        let conc = concat_inputs(inputs)?;
        let projected = &conc.dot(&self.weights) + &self.bias;
        let scan = Tensor::scan(
            &self.h0.context,
            self.body,
            &[&projected, mask],
            &[&self.h0],
            &[&self.recurrent],
        );
        Ok(scan.scan_output(0))
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![self.h0.clone(), self.weights.clone(), self.bias.clone(), self.recurrent.clone()]
    }
}

fn build_tanh_body(context: &SharedGraph, batch: usize, hidden: usize) -> AsgId {
    let body = context.borrow_mut().new_subgraph();
    let x_t = Tensor::subgraph_input(context, body, "x_t", vec![batch, hidden], DType::F32);
    let m_t = Tensor::subgraph_input(context, body, "m_t", vec![batch], DType::F32);
    let h_tm1 = Tensor::subgraph_input(context, body, "h_tm1", vec![batch, hidden], DType::F32);
    let u = Tensor::subgraph_input(context, body, "U", vec![hidden, hidden], DType::F32);

    let fresh = (&x_t + &h_tm1.dot(&u)).tanh();
    let h_t = masked_blend(&m_t, &fresh, &h_tm1);
    context.borrow_mut().set_subgraph_outputs(body, &[&h_t]);
    body
}

// --- GRU ---

/// GRU-ячейка с упаковкой reset/update/candidate гейтов в одну входную
/// проекцию (features, 3 * hidden), рекуррентной парой reset/update
/// (hidden, 2 * hidden) и отдельной рекуррентной матрицей кандидата.
#[derive(Debug)]
pub struct GruRecurrent {
    pub hidden_dim: usize,
    h0: Tensor,
    weights: Tensor,
    bias: Tensor,
    gates: Tensor,
    candidate: Tensor,
    body: AsgId,
}

impl GruRecurrent {
    pub fn new(
        context: &SharedGraph,
        inputs: &[&Tensor],
        hidden_dim: usize,
        name: &str,
        seeds: &mut SeedStream,
        strict: bool,
    ) -> Result<Self, GraphError> {
        validate_rank3(inputs, name)?;
        let conc = concat_inputs(inputs)?;
        let dims = conc.expected_dims()?;
        let (batch, input_dim) = (dims[1], dims[2]);

        let h0_name = format!("{}_h0", name);
        let h0 = add_learned_to_graph(
            context,
            vec![init::zeros(&[batch, hidden_dim])],
            &[&h0_name],
            true,
        )?
        .remove(0);

        let w_name = format!("{}_gru_rec_step_W", name);
        let b_name = format!("{}_gru_rec_step_b", name);
        let urz_name = format!("{}_gru_rec_step_Urz", name);
        let u_name = format!("{}_gru_rec_step_U", name);
        let mut rng = seeds.init_rng();
        let np_w = init::hstack(&[
            init::uniform(&[input_dim, hidden_dim], &mut rng),
            init::uniform(&[input_dim, hidden_dim], &mut rng),
            init::uniform(&[input_dim, hidden_dim], &mut rng),
        ]);
        let np_b = init::zeros(&[3 * hidden_dim]);
        let np_urz = init::hstack(&[
            init::ortho(&[hidden_dim, hidden_dim], &mut rng),
            init::ortho(&[hidden_dim, hidden_dim], &mut rng),
        ]);
        let np_u = init::ortho(&[hidden_dim, hidden_dim], &mut rng);
        let mut handles = add_learned_to_graph(
            context,
            vec![np_w, np_b, np_urz, np_u],
            &[&w_name, &b_name, &urz_name, &u_name],
            strict,
        )?;
        let candidate = handles.remove(3);
        let gates = handles.remove(2);
        let bias = handles.remove(1);
        let weights = handles.remove(0);

        let body = build_gru_body(context, batch, hidden_dim);
        Ok(Self { hidden_dim, h0, weights, bias, gates, candidate, body })
    }

    pub fn apply(&self, inputs: &[&Tensor], mask: &Tensor) -> Result<Tensor, GraphError> {
        validate_rank3(inputs, "gru_recurrent")?;
        let conc = concat_inputs(inputs)?;
        let projected = &conc.dot(&self.weights) + &self.bias;
        let scan = Tensor::scan(
            &self.h0.context,
            self.body,
            &[&projected, mask],
            &[&self.h0],
            &[&self.gates, &self.candidate],
        );
        Ok(scan.scan_output(0))
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![
            self.h0.clone(),
            self.weights.clone(),
            self.bias.clone(),
            self.gates.clone(),
            self.candidate.clone(),
        ]
    }
}

fn build_gru_body(context: &SharedGraph, batch: usize, hidden: usize) -> AsgId {
    let body = context.borrow_mut().new_subgraph();
    let x_t = Tensor::subgraph_input(context, body, "x_t", vec![batch, 3 * hidden], DType::F32);
    let m_t = Tensor::subgraph_input(context, body, "m_t", vec![batch], DType::F32);
    let h_tm1 = Tensor::subgraph_input(context, body, "h_tm1", vec![batch, hidden], DType::F32);
    let urz = Tensor::subgraph_input(context, body, "Urz", vec![hidden, 2 * hidden], DType::F32);
    let u = Tensor::subgraph_input(context, body, "U", vec![hidden, hidden], DType::F32);

    let projected_gates = h_tm1.dot(&urz);
    let r = (&slice_units(&x_t, 0, hidden) + &slice_units(&projected_gates, 0, hidden)).sigmoid();
    let z = (&slice_units(&x_t, 1, hidden) + &slice_units(&projected_gates, 1, hidden)).sigmoid();
    let candidate = (&slice_units(&x_t, 2, hidden) + &(&r * &h_tm1).dot(&u)).tanh();
    let fresh = &(&z * &h_tm1) + &(&(&z.ones_like() - &z) * &candidate);
    let h_t = masked_blend(&m_t, &fresh, &h_tm1);
    context.borrow_mut().set_subgraph_outputs(body, &[&h_t]);
    body
}

/// Двунаправленный GRU: прямой проход плюс обратный по перевёрнутым во
/// времени входам и маске; скрытые последовательности конкатенируются
/// по оси признаков (обратная - после обратного переворота).
pub fn bidirectional_gru(
    context: &SharedGraph,
    inputs: &[&Tensor],
    mask: &Tensor,
    hidden_dim: usize,
    name: &str,
    seeds: &mut SeedStream,
    strict: bool,
) -> Result<Tensor, GraphError> {
    let forward = GruRecurrent::new(context, inputs, hidden_dim, &format!("{}_f", name), seeds, strict)?;
    let h_f = forward.apply(inputs, mask)?;

    let reversed: Vec<Tensor> = inputs.iter().map(|i| i.reverse(0)).collect();
    let reversed_refs: Vec<&Tensor> = reversed.iter().collect();
    let backward =
        GruRecurrent::new(context, &reversed_refs, hidden_dim, &format!("{}_r", name), seeds, strict)?;
    let h_r = backward.apply(&reversed_refs, &mask.reverse(0))?;

    Ok(Tensor::concat(&[&h_f, &h_r.reverse(0)], 2))
}

// --- LSTM ---

/// LSTM-ячейка: одна рекуррентная матрица (hidden, 4 * hidden) проецирует
/// состояние сразу в четыре гейтовых среза (input, output, forget,
/// candidate); входной вклад предвычисляется на всю последовательность.
pub struct LstmRecurrent {
    pub hidden_dim: usize,
    h0: Tensor,
    c0: Tensor,
    weights: Tensor,
    bias: Tensor,
    recurrent: Tensor,
    body: AsgId,
}

impl LstmRecurrent {
    pub fn new(
        context: &SharedGraph,
        inputs: &[&Tensor],
        hidden_dim: usize,
        name: &str,
        seeds: &mut SeedStream,
        strict: bool,
    ) -> Result<Self, GraphError> {
        validate_rank3(inputs, name)?;
        let conc = concat_inputs(inputs)?;
        let dims = conc.expected_dims()?;
        let (batch, input_dim) = (dims[1], dims[2]);

        let h0_name = format!("{}_h0", name);
        let c0_name = format!("{}_c0", name);
        let mut states = add_learned_to_graph(
            context,
            vec![init::zeros(&[batch, hidden_dim]), init::zeros(&[batch, hidden_dim])],
            &[&h0_name, &c0_name],
            true,
        )?;
        let c0 = states.remove(1);
        let h0 = states.remove(0);

        let w_name = format!("{}_lstm_rec_step_W", name);
        let b_name = format!("{}_lstm_rec_step_b", name);
        let u_name = format!("{}_lstm_rec_step_U", name);
        let mut rng = seeds.init_rng();
        let np_w = init::hstack(&[
            init::uniform(&[input_dim, hidden_dim], &mut rng),
            init::uniform(&[input_dim, hidden_dim], &mut rng),
            init::uniform(&[input_dim, hidden_dim], &mut rng),
            init::uniform(&[input_dim, hidden_dim], &mut rng),
        ]);
        let np_b = init::zeros(&[4 * hidden_dim]);
        let np_u = init::hstack(&[
            init::ortho(&[hidden_dim, hidden_dim], &mut rng),
            init::ortho(&[hidden_dim, hidden_dim], &mut rng),
            init::ortho(&[hidden_dim, hidden_dim], &mut rng),
            init::ortho(&[hidden_dim, hidden_dim], &mut rng),
        ]);
        let mut handles = add_learned_to_graph(
            context,
            vec![np_w, np_b, np_u],
            &[&w_name, &b_name, &u_name],
            strict,
        )?;
        let recurrent = handles.remove(2);
        let bias = handles.remove(1);
        let weights = handles.remove(0);

        let body = build_lstm_body(context, batch, hidden_dim);
        Ok(Self { hidden_dim, h0, c0, weights, bias, recurrent, body })
    }

    /// Возвращает стек скрытых состояний; клеточное состояние протягивается
    /// внутри рекуррентности и наружу не отдаётся.
    pub fn apply(&self, inputs: &[&Tensor], mask: &Tensor) -> Result<Tensor, GraphError> {
        validate_rank3(inputs, "lstm_recurrent")?;
        let conc = concat_inputs(inputs)?;
        let projected = &conc.dot(&self.weights) + &self.bias;
        let scan = Tensor::scan(
            &self.h0.context,
            self.body,
            &[&projected, mask],
            &[&self.h0, &self.c0],
            &[&self.recurrent],
        );
        Ok(scan.scan_output(0))
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![
            self.h0.clone(),
            self.c0.clone(),
            self.weights.clone(),
            self.bias.clone(),
            self.recurrent.clone(),
        ]
    }
}

fn build_lstm_body(context: &SharedGraph, batch: usize, hidden: usize) -> AsgId {
    let body = context.borrow_mut().new_subgraph();
    let x_t = Tensor::subgraph_input(context, body, "x_t", vec![batch, 4 * hidden], DType::F32);
    let m_t = Tensor::subgraph_input(context, body, "m_t", vec![batch], DType::F32);
    let h_tm1 = Tensor::subgraph_input(context, body, "h_tm1", vec![batch, hidden], DType::F32);
    let c_tm1 = Tensor::subgraph_input(context, body, "c_tm1", vec![batch, hidden], DType::F32);
    let u = Tensor::subgraph_input(context, body, "U", vec![hidden, 4 * hidden], DType::F32);

    let projected_gates = &h_tm1.dot(&u) + &x_t;
    let input_gate = slice_units(&projected_gates, 0, hidden).sigmoid();
    let output_gate = slice_units(&projected_gates, 1, hidden).sigmoid();
    let forget_gate = slice_units(&projected_gates, 2, hidden).sigmoid();
    let candidate = slice_units(&projected_gates, 3, hidden).tanh();

    let fresh_c = &(&forget_gate * &c_tm1) + &(&input_gate * &candidate);
    let c_t = masked_blend(&m_t, &fresh_c, &c_tm1);
    let fresh_h = &output_gate * &c_t.tanh();
    let h_t = masked_blend(&m_t, &fresh_h, &h_tm1);
    context.borrow_mut().set_subgraph_outputs(body, &[&h_t, &c_t]);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asg::DType;
    use crate::tensor::{add_datasets_to_graph, shared_graph};
    use ndarray::ArrayD;

    #[test]
    fn rank_mismatch_fails_before_any_registration() {
        let ctx = shared_graph();
        let flat = ArrayD::<f32>::zeros(ndarray::IxDyn(&[4, 3]));
        let x = add_datasets_to_graph(&ctx, &[("x", &flat, DType::F32)]).unwrap().remove(0);
        let mut seeds = SeedStream::new(1999);
        let err = GruRecurrent::new(&ctx, &[&x], 6, "enc", &mut seeds, true).unwrap_err();
        assert!(matches!(err, GraphError::InvalidRank { expected: 3, actual: 2, .. }));
        assert!(!ctx.borrow().names_in_graph(&["enc_h0"]));
    }
}
