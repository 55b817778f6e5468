//! Стохастические узлы: выборки из категориальных и нормальных
//! распределений как часть графа.
//!
//! Каждый строитель выводит собственный seed из потока seed-ов и
//! регистрирует шумовой узел в реестре под именем `{name}_random` - шум
//! становится видимым при интроспекции графа, а выборки воспроизводимы
//! при фиксированном мастер-seed.

use crate::nn::projection::concat_inputs;
use crate::random::SeedStream;
use crate::tensor::{add_random_to_graph, GraphError, SharedGraph, Tensor};

/// Категориальная выборка: по одной one-hot строке на каждую строку
/// усреднённых по списку входов вероятностей.
pub fn softmax_sample(
    context: &SharedGraph,
    multinomial_inputs: &[&Tensor],
    name: &str,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    let seed = seeds.next_seed();
    let conc = concat_inputs(multinomial_inputs)?;
    let averaged = &conc / &conc.scalar_like(multinomial_inputs.len() as f32);
    let random_name = format!("{}_random", name);
    let sample = averaged.categorical_sample(&random_name, seed);
    add_random_to_graph(context, &[&sample], &[&random_name])?;
    Ok(sample)
}

/// Гауссовская выборка с репараметризацией: `mu + sigma * e`,
/// где `e` - стандартный нормальный шум формы (batch, dim).
pub fn gaussian_sample(
    context: &SharedGraph,
    mu_inputs: &[&Tensor],
    sigma_inputs: &[&Tensor],
    name: &str,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    let seed = seeds.next_seed();
    let conc_mu = concat_inputs(mu_inputs)?;
    let conc_sigma = concat_inputs(sigma_inputs)?;
    // Форма mu == форме sigma == форме шума
    let shape = conc_mu.expected_dims()?;
    let random_name = format!("{}_random", name);
    let noise = Tensor::normal_noise(context, &random_name, shape, seed);
    add_random_to_graph(context, &[&noise], &[&random_name])?;
    Ok(&conc_mu + &(&conc_sigma * &noise))
}

/// Логарифмическая форма гауссовской выборки: `mu + exp(0.5 * log_sigma) * e`.
///
/// Вход log_sigma - лог-дисперсия из линейного слоя: параметр масштаба
/// оптимизируется без ограничений и без потери численной устойчивости.
pub fn gaussian_log_sample(
    context: &SharedGraph,
    mu_inputs: &[&Tensor],
    log_sigma_inputs: &[&Tensor],
    name: &str,
    seeds: &mut SeedStream,
) -> Result<Tensor, GraphError> {
    let seed = seeds.next_seed();
    let conc_mu = concat_inputs(mu_inputs)?;
    let conc_log_sigma = concat_inputs(log_sigma_inputs)?;
    let shape = conc_mu.expected_dims()?;
    let random_name = format!("{}_random", name);
    let noise = Tensor::normal_noise(context, &random_name, shape, seed);
    add_random_to_graph(context, &[&noise], &[&random_name])?;
    let sigma = (&conc_log_sigma * &conc_log_sigma.scalar_like(0.5)).exp();
    Ok(&conc_mu + &(&sigma * &noise))
}
