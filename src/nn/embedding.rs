//! Модуль с реализацией слоя Embedding.
//!
//! Embedding слой преобразует целочисленные индексы в плотные векторы
//! фиксированной размерности: по одному вектору-строке таблицы на индекс.

use crate::nn::init::Init;
use crate::nn::module::Module;
use crate::random::SeedStream;
use crate::tensor::{add_learned_to_graph, GraphError, SharedGraph, Tensor};
use crate::asg::DType;

/// Слой Embedding с таблицей формы (max_index, proj_dim).
///
/// Каждый входной тензор обязан быть одномерным целочисленным вектором
/// индексов; выход собирается конкатенацией выборок по оси признаков и
/// приводится к форме (batch, n_inputs, proj_dim).
#[derive(Debug)]
pub struct Embedding {
    /// Количество уникальных индексов (размер словаря).
    pub max_index: usize,
    /// Размерность embedding-вектора.
    pub proj_dim: usize,
    /// Таблица embedding'ов формы (max_index, proj_dim).
    pub weights: Tensor,
}

impl Embedding {
    /// Создает слой, регистрируя `{name}_embedding_W` в реестре.
    ///
    /// Проверка входов выполняется до регистрации: любой вход, не
    /// являющийся одномерным целочисленным вектором, - ошибка вызова.
    pub fn new(
        context: &SharedGraph,
        index_inputs: &[&Tensor],
        max_index: usize,
        proj_dim: usize,
        name: &str,
        seeds: &mut SeedStream,
        strict: bool,
        init_func: Init,
    ) -> Result<Self, GraphError> {
        validate_index_inputs(index_inputs, name)?;
        let w_name = format!("{}_embedding_W", name);
        let np_w = init_func(&[max_index, proj_dim], &mut seeds.init_rng());
        let weights = add_learned_to_graph(context, vec![np_w], &[&w_name], strict)?.remove(0);
        Ok(Self { max_index, proj_dim, weights })
    }
}

fn validate_index_inputs(index_inputs: &[&Tensor], name: &str) -> Result<(), GraphError> {
    for input in index_inputs {
        let rank = input.expected_dims()?.len();
        let dtype = input.dtype()?;
        if rank != 1 || dtype != DType::I32 {
            return Err(GraphError::InvalidIndexInput { name: name.to_string() });
        }
    }
    Ok(())
}

impl Module for Embedding {
    /// Выборка строк таблицы по каждому вектору индексов с последующей
    /// конкатенацией и приведением к (batch, n_inputs, proj_dim).
    fn apply(&self, index_inputs: &[&Tensor]) -> Result<Tensor, GraphError> {
        validate_index_inputs(index_inputs, "embedding")?;
        let looked_up: Vec<Tensor> =
            index_inputs.iter().map(|idx| self.weights.gather(idx)).collect();
        let refs: Vec<&Tensor> = looked_up.iter().collect();
        let conc = Tensor::concat(&refs, 1);
        let n_inputs = index_inputs.len() as i64;
        Ok(conc.reshape(vec![-1, n_inputs, self.proj_dim as i64]))
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.weights.clone()]
    }
}
