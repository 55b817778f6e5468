//! Условные GRU-декодеры: с фиксированным контекстом кодировщика и с
//! аддитивным вниманием по всем его состояниям.
//!
//! Оба декодера получают список желаемых выходов БЕЗ сдвига: сдвиг на один
//! шаг по времени (teacher forcing) выполняется внутри. Начальное скрытое
//! состояние - tanh-проекция контекста кодировщика.
//!
//! Вариант с вниманием пересчитывает контекст на каждом шаге декодера:
//! оценка внимания `tanh(Wc . h_enc + b + Ws . h_{t-1} + Wi . x_t)`
//! проецируется в скаляр на позицию кодировщика, маскируется маской
//! валидности кодировщика, стабилизируется вычитанием максимума и
//! нормируется софтмаксом по оси ВРЕМЕНИ. Веса внимания отдаются наружу
//! на каждом шаге - для инспекции и визуализации.

use crate::asg::{AsgId, DType};
use crate::nn::init;
use crate::nn::module::Module;
use crate::nn::projection::{concat_inputs, Activation, Projection};
use crate::nn::recurrent::{masked_blend, slice_units, validate_rank3};
use crate::random::SeedStream;
use crate::tensor::{add_learned_to_graph, GraphError, SharedGraph, Tensor};

/// GRU-декодер, обусловленный фиксированным контекстом - последним скрытым
/// состоянием кодировщика. Проекции контекста входят в предактивации
/// гейтов и кандидата на каждом шаге.
#[derive(Debug)]
pub struct ConditionalGru {
    pub hidden_dim: usize,
    h0_proj: Projection,
    weights: Tensor,
    bias: Tensor,
    gates: Tensor,
    candidate: Tensor,
    context_to_gates: Tensor,
    context_to_gates_bias: Tensor,
    context_to_hidden: Tensor,
    context_to_hidden_bias: Tensor,
    body: AsgId,
}

impl ConditionalGru {
    pub fn new(
        context: &SharedGraph,
        outputs: &[&Tensor],
        hiddens: &[&Tensor],
        hidden_dim: usize,
        name: &str,
        seeds: &mut SeedStream,
        strict: bool,
    ) -> Result<Self, GraphError> {
        validate_rank3(outputs, name)?;
        validate_rank3(hiddens, name)?;
        let conc_output = concat_inputs(outputs)?;
        let conc_hidden = concat_inputs(hiddens)?;
        let out_dims = conc_output.expected_dims()?;
        let hid_dims = conc_hidden.expected_dims()?;
        let (batch, input_dim) = (out_dims[1], out_dims[2]);
        let context_dim = hid_dims[2];
        // h0 проецируется в ширину контекста; рекуррентные веса - в
        // hidden_dim. Расхождение этих ширин ломает рекуррентность.
        if hidden_dim != context_dim {
            return Err(GraphError::ContextWidthMismatch {
                expected: context_dim,
                actual: hidden_dim,
            });
        }

        let context_vec = conc_hidden.index_axis(0, -1);
        let h0_proj = Projection::new(
            context,
            &[&context_vec],
            &format!("{}_h0_proj", name),
            context_dim,
            seeds,
            strict,
            init::tanh_fan,
            Activation::Tanh,
        )?;

        let w_name = format!("{}_cond_gru_rec_step_W", name);
        let b_name = format!("{}_cond_gru_rec_step_b", name);
        let urz_name = format!("{}_cond_gru_rec_step_Urz", name);
        let u_name = format!("{}_cond_gru_rec_step_U", name);
        let wg_name = format!("{}_cond_gru_rec_step_Wg", name);
        let bg_name = format!("{}_cond_gru_rec_step_bg", name);
        let wh_name = format!("{}_cond_gru_rec_step_Wh", name);
        let bh_name = format!("{}_cond_gru_rec_step_bh", name);
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
        let np_wg = init::uniform(&[context_dim, 2 * hidden_dim], &mut rng);
        let np_bg = init::zeros(&[2 * hidden_dim]);
        let np_wh = init::uniform(&[context_dim, hidden_dim], &mut rng);
        let np_bh = init::zeros(&[hidden_dim]);
        let mut handles = add_learned_to_graph(
            context,
            vec![np_w, np_b, np_urz, np_u, np_wg, np_bg, np_wh, np_bh],
            &[&w_name, &b_name, &urz_name, &u_name, &wg_name, &bg_name, &wh_name, &bh_name],
            strict,
        )?;
        let context_to_hidden_bias = handles.remove(7);
        let context_to_hidden = handles.remove(6);
        let context_to_gates_bias = handles.remove(5);
        let context_to_gates = handles.remove(4);
        let candidate = handles.remove(3);
        let gates = handles.remove(2);
        let bias = handles.remove(1);
        let weights = handles.remove(0);

        let body = build_conditional_body(context, batch, hidden_dim);
        Ok(Self {
            hidden_dim,
            h0_proj,
            weights,
            bias,
            gates,
            candidate,
            context_to_gates,
            context_to_gates_bias,
            context_to_hidden,
            context_to_hidden_bias,
            body,
        })
    }

    /// Возвращает стек скрытых состояний декодера и контекст, растянутый
    /// по оси времени до той же формы.
    pub fn apply(
        &self,
        outputs: &[&Tensor],
        hiddens: &[&Tensor],
        output_mask: &Tensor,
    ) -> Result<(Tensor, Tensor), GraphError> {
        validate_rank3(outputs, "conditional_gru")?;
        validate_rank3(hiddens, "conditional_gru")?;
        let conc_output = concat_inputs(outputs)?;
        let conc_hidden = concat_inputs(hiddens)?;
        let context_vec = conc_hidden.index_axis(0, -1);

        let h0 = self.h0_proj.apply(&[&context_vec])?;
        let shifted = conc_output.time_shift();
        let projected_input = &shifted.dot(&self.weights) + &self.bias;
        let context_to_gates =
            &context_vec.dot(&self.context_to_gates) + &self.context_to_gates_bias;
        let context_to_hidden =
            &context_vec.dot(&self.context_to_hidden) + &self.context_to_hidden_bias;

        let scan = Tensor::scan(
            &self.weights.context,
            self.body,
            &[&projected_input, output_mask],
            &[&h0],
            &[&self.candidate, &context_to_gates, &context_to_hidden, &self.gates],
        );
        let h = scan.scan_output(0);
        let final_context = &context_vec.expand_dims(0) * &h.ones_like();
        Ok((h, final_context))
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.h0_proj.parameters();
        params.extend([
            self.weights.clone(),
            self.bias.clone(),
            self.gates.clone(),
            self.candidate.clone(),
            self.context_to_gates.clone(),
            self.context_to_gates_bias.clone(),
            self.context_to_hidden.clone(),
            self.context_to_hidden_bias.clone(),
        ]);
        params
    }
}

fn build_conditional_body(context: &SharedGraph, batch: usize, hidden: usize) -> AsgId {
    let body = context.borrow_mut().new_subgraph();
    let x_t = Tensor::subgraph_input(context, body, "x_t", vec![batch, 3 * hidden], DType::F32);
    let m_t = Tensor::subgraph_input(context, body, "m_t", vec![batch], DType::F32);
    let h_tm1 = Tensor::subgraph_input(context, body, "h_tm1", vec![batch, hidden], DType::F32);
    let u = Tensor::subgraph_input(context, body, "U", vec![hidden, hidden], DType::F32);
    let pcg = Tensor::subgraph_input(context, body, "pcg", vec![batch, 2 * hidden], DType::F32);
    let pch = Tensor::subgraph_input(context, body, "pch", vec![batch, hidden], DType::F32);
    let urz = Tensor::subgraph_input(context, body, "Urz", vec![hidden, 2 * hidden], DType::F32);

    let projected_gates = &h_tm1.dot(&urz) + &pcg;
    let r = (&slice_units(&x_t, 0, hidden) + &slice_units(&projected_gates, 0, hidden)).sigmoid();
    let z = (&slice_units(&x_t, 1, hidden) + &slice_units(&projected_gates, 1, hidden)).sigmoid();
    let candidate =
        (&(&slice_units(&x_t, 2, hidden) + &(&r * &h_tm1.dot(&u))) + &pch).tanh();
    let fresh = &(&z * &h_tm1) + &(&(&z.ones_like() - &z) * &candidate);
    let h_t = masked_blend(&m_t, &fresh, &h_tm1);
    context.borrow_mut().set_subgraph_outputs(body, &[&h_t]);
    body
}

/// GRU-декодер с аддитивным вниманием по всем состояниям кодировщика.
///
/// Ширина скрытого состояния декодера равна ширине признаков кодировщика:
/// все матрицы внимания и гейтов строятся от неё. Начальный контекст для
/// tanh-проекции h0 - среднее скрытых состояний кодировщика по времени.
pub struct AttentionGru {
    pub hidden_dim: usize,
    h0_proj: Projection,
    weights: Tensor,
    bias: Tensor,
    gates: Tensor,
    candidate: Tensor,
    context_to_gates: Tensor,
    context_to_candidate: Tensor,
    input_attention: Tensor,
    hidden_attention: Tensor,
    attention_bias: Tensor,
    state_attention: Tensor,
    score_weights: Tensor,
    score_bias: Tensor,
    body: AsgId,
}

impl AttentionGru {
    pub fn new(
        context: &SharedGraph,
        outputs: &[&Tensor],
        hiddens: &[&Tensor],
        name: &str,
        seeds: &mut SeedStream,
        strict: bool,
    ) -> Result<Self, GraphError> {
        validate_rank3(outputs, name)?;
        validate_rank3(hiddens, name)?;
        let conc_output = concat_inputs(outputs)?;
        let conc_hidden = concat_inputs(hiddens)?;
        let out_dims = conc_output.expected_dims()?;
        let hid_dims = conc_hidden.expected_dims()?;
        let (batch, input_dim) = (out_dims[1], out_dims[2]);
        let (enc_steps, hidden_dim) = (hid_dims[0], hid_dims[2]);

        let mean_context = conc_hidden.mean_axis(0).index_axis(0, 0);
        let h0_proj = Projection::new(
            context,
            &[&mean_context],
            &format!("{}_h0_proj", name),
            hidden_dim,
            seeds,
            strict,
            init::tanh_fan,
            Activation::Tanh,
        )?;

        // Веса GRU
        let w_name = format!("{}_cond_gru_rec_step_W", name);
        let b_name = format!("{}_cond_gru_rec_step_b", name);
        let urz_name = format!("{}_cond_gru_rec_step_Urz", name);
        let u_name = format!("{}_cond_gru_rec_step_U", name);
        let cth_name = format!("{}_cond_gru_rec_step_W_cth", name);
        let ctc_name = format!("{}_cond_gru_rec_step_W_ctc", name);
        // Веса внимания: по сдвинутому входу, по состояниям кодировщика
        // (с общим смещением), по состоянию декодера и скалярная проекция.
        let wi_name = format!("{}_cond_gru_step_Wi_att", name);
        let wc_name = format!("{}_cond_gru_step_Wc_att", name);
        let ba_name = format!("{}_cond_gru_step_b_att", name);
        let ws_name = format!("{}_cond_gru_step_Ws_att", name);
        let wp_name = format!("{}_cond_gru_step_Wp_att", name);
        let bp_name = format!("{}_cond_gru_step_bp_att", name);

        let mut rng = seeds.init_rng();
        let np_w = init::uniform(&[input_dim, 3 * hidden_dim], &mut rng);
        let np_b = init::zeros(&[3 * hidden_dim]);
        let np_urz = init::hstack(&[
            init::ortho(&[hidden_dim, hidden_dim], &mut rng),
            init::ortho(&[hidden_dim, hidden_dim], &mut rng),
        ]);
        let np_u = init::ortho(&[hidden_dim, hidden_dim], &mut rng);
        let np_cth = init::uniform(&[hidden_dim, 2 * hidden_dim], &mut rng);
        let np_ctc = init::uniform(&[hidden_dim, hidden_dim], &mut rng);
        let np_wi = init::uniform(&[input_dim, hidden_dim], &mut rng);
        let np_wc = init::ortho(&[hidden_dim, hidden_dim], &mut rng);
        let np_ba = init::zeros(&[hidden_dim]);
        let np_ws = init::ortho(&[hidden_dim, hidden_dim], &mut rng);
        let np_wp = init::uniform(&[hidden_dim, 1], &mut rng);
        let np_bp = init::zeros(&[1]);
        let mut handles = add_learned_to_graph(
            context,
            vec![np_w, np_b, np_urz, np_u, np_cth, np_ctc, np_wi, np_wc, np_ba, np_ws, np_wp, np_bp],
            &[
                &w_name, &b_name, &urz_name, &u_name, &cth_name, &ctc_name, &wi_name, &wc_name,
                &ba_name, &ws_name, &wp_name, &bp_name,
            ],
            strict,
        )?;
        let score_bias = handles.remove(11);
        let score_weights = handles.remove(10);
        let state_attention = handles.remove(9);
        let attention_bias = handles.remove(8);
        let hidden_attention = handles.remove(7);
        let input_attention = handles.remove(6);
        let context_to_candidate = handles.remove(5);
        let context_to_gates = handles.remove(4);
        let candidate = handles.remove(3);
        let gates = handles.remove(2);
        let bias = handles.remove(1);
        let weights = handles.remove(0);

        let body = build_attention_body(context, enc_steps, batch, hidden_dim);
        Ok(Self {
            hidden_dim,
            h0_proj,
            weights,
            bias,
            gates,
            candidate,
            context_to_gates,
            context_to_candidate,
            input_attention,
            hidden_attention,
            attention_bias,
            state_attention,
            score_weights,
            score_bias,
            body,
        })
    }

    /// Возвращает тройку (стек скрытых состояний, стек контекстов, стек
    /// весов внимания (time_dec, batch, time_enc)).
    pub fn apply(
        &self,
        outputs: &[&Tensor],
        hiddens: &[&Tensor],
        output_mask: &Tensor,
        hidden_mask: &Tensor,
    ) -> Result<(Tensor, Tensor, Tensor), GraphError> {
        validate_rank3(outputs, "attention_gru")?;
        validate_rank3(hiddens, "attention_gru")?;
        let conc_output = concat_inputs(outputs)?;
        let conc_hidden = concat_inputs(hiddens)?;

        let mean_context = conc_hidden.mean_axis(0).index_axis(0, 0);
        let h0 = self.h0_proj.apply(&[&mean_context])?;
        let shifted = conc_output.time_shift();

        let projected_hidden_attention =
            &conc_hidden.dot(&self.hidden_attention) + &self.attention_bias;
        let projected_input_attention = shifted.dot(&self.input_attention);
        let projected_input = &shifted.dot(&self.weights) + &self.bias;

        let context0 = mean_context.zeros_like();
        let attention0 = hidden_mask.transpose(0, 1).zeros_like();

        let scan = Tensor::scan(
            &self.weights.context,
            self.body,
            &[&projected_input, output_mask, &projected_input_attention],
            &[&h0, &context0, &attention0],
            &[
                &projected_hidden_attention,
                &conc_hidden,
                &self.candidate,
                &self.context_to_gates,
                &self.context_to_candidate,
                &self.state_attention,
                &self.score_weights,
                &self.score_bias,
                &self.gates,
                hidden_mask,
            ],
        );
        Ok((scan.scan_output(0), scan.scan_output(1), scan.scan_output(2)))
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = self.h0_proj.parameters();
        params.extend([
            self.weights.clone(),
            self.bias.clone(),
            self.gates.clone(),
            self.candidate.clone(),
            self.context_to_gates.clone(),
            self.context_to_candidate.clone(),
            self.input_attention.clone(),
            self.hidden_attention.clone(),
            self.attention_bias.clone(),
            self.state_attention.clone(),
            self.score_weights.clone(),
            self.score_bias.clone(),
        ]);
        params
    }
}

fn build_attention_body(
    context: &SharedGraph,
    enc_steps: usize,
    batch: usize,
    hidden: usize,
) -> AsgId {
    let body = context.borrow_mut().new_subgraph();
    let x_t = Tensor::subgraph_input(context, body, "x_t", vec![batch, 3 * hidden], DType::F32);
    let m_t = Tensor::subgraph_input(context, body, "m_t", vec![batch], DType::F32);
    let att_i_t =
        Tensor::subgraph_input(context, body, "att_i_t", vec![batch, hidden], DType::F32);
    let h_tm1 = Tensor::subgraph_input(context, body, "h_tm1", vec![batch, hidden], DType::F32);
    // Предыдущие контекст и веса внимания протягиваются как состояния,
    // но в переходе не участвуют.
    let _ctx_tm1 =
        Tensor::subgraph_input(context, body, "ctx_tm1", vec![batch, hidden], DType::F32);
    let _att_w_tm1 =
        Tensor::subgraph_input(context, body, "att_w_tm1", vec![batch, enc_steps], DType::F32);
    let proj_hid_att = Tensor::subgraph_input(
        context,
        body,
        "proj_hid_att",
        vec![enc_steps, batch, hidden],
        DType::F32,
    );
    let conc_hidden = Tensor::subgraph_input(
        context,
        body,
        "conc_hidden",
        vec![enc_steps, batch, hidden],
        DType::F32,
    );
    let u = Tensor::subgraph_input(context, body, "U", vec![hidden, hidden], DType::F32);
    let w_cth =
        Tensor::subgraph_input(context, body, "W_cth", vec![hidden, 2 * hidden], DType::F32);
    let w_ctc = Tensor::subgraph_input(context, body, "W_ctc", vec![hidden, hidden], DType::F32);
    let ws_att = Tensor::subgraph_input(context, body, "Ws_att", vec![hidden, hidden], DType::F32);
    let wp_att = Tensor::subgraph_input(context, body, "Wp_att", vec![hidden, 1], DType::F32);
    let bp_att = Tensor::subgraph_input(context, body, "bp_att", vec![1], DType::F32);
    let urz = Tensor::subgraph_input(context, body, "Urz", vec![hidden, 2 * hidden], DType::F32);
    let hidden_mask =
        Tensor::subgraph_input(context, body, "hidden_mask", vec![enc_steps, batch], DType::F32);

    // Оценки внимания по всем позициям кодировщика сразу
    let state_scores = h_tm1.dot(&ws_att);
    let att = (&(&proj_hid_att + &state_scores.expand_dims(0)) + &att_i_t).tanh();
    let scores = &att.dot(&wp_att) + &bp_att;
    let scores = scores.reshape(vec![enc_steps as i64, batch as i64]);
    // Максимум берётся по валидным позициям, затем экспонента, маска и
    // нормировка по оси времени кодировщика
    let score_max = (&scores * &hidden_mask).max_axis(0);
    let exp_scores = (&scores - &score_max).exp();
    let masked_scores = &hidden_mask * &exp_scores;
    let att_w_t = &masked_scores / &masked_scores.sum_axis(0);
    let ctx_t = (&conc_hidden * &att_w_t.expand_dims(2))
        .sum_axis(0)
        .index_axis(0, 0);

    let projected_gates = &h_tm1.dot(&urz) + &ctx_t.dot(&w_cth);
    let r = (&slice_units(&x_t, 0, hidden) + &slice_units(&projected_gates, 0, hidden)).sigmoid();
    let z = (&slice_units(&x_t, 1, hidden) + &slice_units(&projected_gates, 1, hidden)).sigmoid();
    let candidate = (&(&slice_units(&x_t, 2, hidden) + &(&r * &h_tm1.dot(&u)))
        + &ctx_t.dot(&w_ctc))
        .tanh();
    let fresh = &(&z * &h_tm1) + &(&(&z.ones_like() - &z) * &candidate);
    let h_t = masked_blend(&m_t, &fresh, &h_tm1);
    let att_w_out = att_w_t.transpose(0, 1);
    context.borrow_mut().set_subgraph_outputs(body, &[&h_t, &ctx_t, &att_w_out]);
    body
}
