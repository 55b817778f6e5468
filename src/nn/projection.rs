//! Проекционные (полносвязные) слои в графовой парадигме.
//!
//! Слой не хранит реальных данных: он владеет символьными дескрипторами
//! своих весов и смещений, зарегистрированными в реестре контекста, а
//! `apply` добавляет в граф операции `activation(concat(inputs) . W + b)`.
//!
//! Ширина входа выводится из объявленных форм входных выражений в момент
//! создания слоя: слои регистрируют пару весов при первом обращении к
//! имени, а разделение весов делается явной операцией [`Projection::bind`].

use crate::nn::init::{self, Init};
use crate::nn::module::Module;
use crate::random::SeedStream;
use crate::tensor::{
    add_fixed_to_graph, add_learned_to_graph, fetch_from_graph, GraphError, SharedGraph, Tensor,
};
use ndarray::ArrayD;

/// Поточечная нелинейность, завершающая проекцию.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Тождественная: вернуть предактивацию без изменений.
    Linear,
    Sigmoid,
    Tanh,
    /// `log(1 + e^x) + 1e-4`; эпсилон уводит градиент от точного нуля.
    Softplus,
    ReLU,
    Exp,
    /// Софтмакс по последней оси со сдвигом на максимум, для рангов 2 и 3.
    Softmax,
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> Result<Tensor, GraphError> {
        Ok(match self {
            Activation::Linear => x.clone(),
            Activation::Sigmoid => x.sigmoid(),
            Activation::Tanh => x.tanh(),
            Activation::Softplus => &x.softplus() + &x.scalar_like(1e-4),
            Activation::ReLU => x.relu(),
            Activation::Exp => x.exp(),
            Activation::Softmax => softmax(x)?,
        })
    }
}

/// Численно устойчивый софтмакс по последней оси.
///
/// Работает и для матриц (batch, units), и для последовательностей
/// (time, batch, units): ось распределения всегда последняя.
pub fn softmax(x: &Tensor) -> Result<Tensor, GraphError> {
    let last = x.expected_dims()?.len() - 1;
    let shifted = x - &x.max_axis(last);
    let e = shifted.exp();
    Ok(&e / &e.sum_axis(last))
}

/// Суммарная ширина последней оси по списку входов.
pub(crate) fn concat_width(inputs: &[&Tensor]) -> Result<usize, GraphError> {
    let mut width = 0;
    for input in inputs {
        let dims = input.expected_dims()?;
        width += *dims.last().unwrap_or(&0);
    }
    Ok(width)
}

/// Конкатенация входов по их последней оси.
pub(crate) fn concat_inputs(inputs: &[&Tensor]) -> Result<Tensor, GraphError> {
    let rank = inputs[0].expected_dims()?.len();
    Ok(Tensor::concat(inputs, rank - 1))
}

/// Полносвязный слой с обучаемой матрицей весов и смещением.
#[derive(Debug)]
pub struct Projection {
    pub weights: Tensor,
    pub bias: Tensor,
    pub activation: Activation,
}

impl Projection {
    /// Создает слой, регистрируя `{name}_W` и `{name}_b` в реестре.
    ///
    /// Ширина матрицы весов - сумма последних измерений объявленных форм
    /// входов; столкновение имён - ошибка (повторная привязка к уже
    /// созданным весам делается через [`Projection::bind`]).
    pub fn new(
        context: &SharedGraph,
        inputs: &[&Tensor],
        name: &str,
        proj_dim: usize,
        seeds: &mut SeedStream,
        strict: bool,
        init_func: Init,
        activation: Activation,
    ) -> Result<Self, GraphError> {
        let w_name = format!("{}_W", name);
        let b_name = format!("{}_b", name);
        let input_dim = concat_width(inputs)?;
        let np_w = init_func(&[input_dim, proj_dim], &mut seeds.init_rng());
        let np_b = init::zeros(&[proj_dim]);
        let mut handles =
            add_learned_to_graph(context, vec![np_w, np_b], &[&w_name, &b_name], strict)?;
        let bias = handles.remove(1);
        let weights = handles.remove(0);
        Ok(Self { weights, bias, activation })
    }

    /// Явная привязка к уже зарегистрированной паре весов - всегда
    /// корректный путь разделения весов между участками графа.
    pub fn bind(context: &SharedGraph, name: &str, activation: Activation) -> Result<Self, GraphError> {
        let w_name = format!("{}_W", name);
        let b_name = format!("{}_b", name);
        let mut handles = fetch_from_graph(context, &[&w_name, &b_name])?;
        let bias = handles.remove(1);
        let weights = handles.remove(0);
        Ok(Self { weights, bias, activation })
    }
}

impl Module for Projection {
    fn apply(&self, inputs: &[&Tensor]) -> Result<Tensor, GraphError> {
        let conc = concat_inputs(inputs)?;
        let output = &conc.dot(&self.weights) + &self.bias;
        self.activation.apply(&output)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone(), self.bias.clone()]
    }
}

// Удобные обёртки "создать и применить" с активацией и инициализатором
// по умолчанию - основной словарь при описании сети сверху вниз.

fn projection_layer(
    context: &SharedGraph,
    inputs: &[&Tensor],
    name: &str,
    proj_dim: usize,
    seeds: &mut SeedStream,
    init_func: Init,
    activation: Activation,
) -> Result<Tensor, GraphError> {
    Projection::new(context, inputs, name, proj_dim, seeds, true, init_func, activation)?
        .apply(inputs)
}

pub fn linear_layer(
    context: &SharedGraph,
    inputs: &[&Tensor],
    name: &str,
    proj_dim: usize,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    projection_layer(context, inputs, name, proj_dim, seeds, init::tanh_fan, Activation::Linear)
}

pub fn sigmoid_layer(
    context: &SharedGraph,
    inputs: &[&Tensor],
    name: &str,
    proj_dim: usize,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    projection_layer(context, inputs, name, proj_dim, seeds, init::sigmoid_fan, Activation::Sigmoid)
}

pub fn tanh_layer(
    context: &SharedGraph,
    inputs: &[&Tensor],
    name: &str,
    proj_dim: usize,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    projection_layer(context, inputs, name, proj_dim, seeds, init::tanh_fan, Activation::Tanh)
}

pub fn softplus_layer(
    context: &SharedGraph,
    inputs: &[&Tensor],
    name: &str,
    proj_dim: usize,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    projection_layer(context, inputs, name, proj_dim, seeds, init::tanh_fan, Activation::Softplus)
}

pub fn relu_layer(
    context: &SharedGraph,
    inputs: &[&Tensor],
    name: &str,
    proj_dim: usize,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    projection_layer(context, inputs, name, proj_dim, seeds, init::tanh_fan, Activation::ReLU)
}

pub fn exp_layer(
    context: &SharedGraph,
    inputs: &[&Tensor],
    name: &str,
    proj_dim: usize,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    projection_layer(context, inputs, name, proj_dim, seeds, init::tanh_fan, Activation::Exp)
}

pub fn softmax_layer(
    context: &SharedGraph,
    inputs: &[&Tensor],
    name: &str,
    proj_dim: usize,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    projection_layer(context, inputs, name, proj_dim, seeds, init::tanh_fan, Activation::Softmax)
}

/// Проекция с фиксированной (необучаемой) матрицей преобразования и
/// обучаемыми аддитивными поправками до и после неё.
///
/// Применяется для статических проекций вроде предвычисленной PCA:
/// `(concat(inputs) + pre) . W + post`.
pub struct FixedProjection {
    pub weights: Tensor,
    pub pre: Tensor,
    pub post: Tensor,
}

impl FixedProjection {
    pub fn new(
        context: &SharedGraph,
        inputs: &[&Tensor],
        transform: ArrayD<f32>,
        name: &str,
        pre: Option<ArrayD<f32>>,
        post: Option<ArrayD<f32>>,
        strict: bool,
    ) -> Result<Self, GraphError> {
        let w_name = format!("{}_W", name);
        let pre_name = format!("{}_pre", name);
        let post_name = format!("{}_post", name);

        let input_dim = concat_width(inputs)?;
        let out_dim = transform.shape().last().copied().unwrap_or(0);
        let np_pre = pre.unwrap_or_else(|| init::zeros(&[input_dim]));
        let np_post = post.unwrap_or_else(|| init::zeros(&[out_dim]));

        let weights = add_fixed_to_graph(context, vec![transform], &[&w_name], strict)?.remove(0);
        let mut offsets = add_learned_to_graph(
            context,
            vec![np_pre, np_post],
            &[&pre_name, &post_name],
            strict,
        )?;
        let post = offsets.remove(1);
        let pre = offsets.remove(0);
        Ok(Self { weights, pre, post })
    }
}

impl Module for FixedProjection {
    fn apply(&self, inputs: &[&Tensor]) -> Result<Tensor, GraphError> {
        let conc = concat_inputs(inputs)?;
        Ok(&(&conc + &self.pre).dot(&self.weights) + &self.post)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.pre.clone(), self.post.clone()]
    }
}
