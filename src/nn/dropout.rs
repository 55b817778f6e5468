//! Dropout слой для регуляризации.
//!
//! Обнуляет элементы конкатенированного входа с вероятностью `prob`,
//! масштабируя оставшиеся на 1/(1-prob) для сохранения математического
//! ожидания. Для входа ранга 3 маска общая по оси времени: временная
//! структура последовательности не разрушается.
//!
//! Режимом управляет внешний скалярный переключатель-вход графа: маска
//! возводится в степень switch, поэтому один и тот же скомпилированный
//! граф работает и в обучении (switch = 1), и в инференсе (switch = 0).

use crate::nn::projection::concat_inputs;
use crate::random::SeedStream;
use crate::tensor::{GraphError, Tensor};

/// Слой Dropout.
pub struct Dropout {
    /// Вероятность обнуления (0.0 - 1.0)
    pub prob: f32,
}

impl Dropout {
    /// # Panics
    /// Паникует если `prob` не в диапазоне [0, 1)
    pub fn new(prob: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&prob),
            "Dropout probability must be in [0, 1), got {}",
            prob
        );
        Self { prob }
    }

    /// Конкатенирует входы и, при `prob > 0`, добавляет узел Dropout.
    ///
    /// Ранг конкатенированного входа обязан быть 2 или 3. Seed выводится
    /// из потока seed-ов независимо от `prob`, чтобы структура сети не
    /// влияла на последующие выборки.
    pub fn apply(
        &self,
        inputs: &[&Tensor],
        switch: &Tensor,
        seeds: &mut SeedStream,
    ) -> Result<Tensor, GraphError> {
        let seed = seeds.next_seed();
        let conc = concat_inputs(inputs)?;
        let rank = conc.expected_dims()?.len();
        if rank != 2 && rank != 3 {
            return Err(GraphError::InvalidRank {
                name: "dropout".to_string(),
                expected: 2,
                actual: rank,
            });
        }
        if self.prob > 0.0 {
            Ok(conc.dropout(switch, self.prob, seed))
        } else {
            Ok(conc)
        }
    }
}

impl Default for Dropout {
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropout_creation() {
        let dropout = Dropout::new(0.5);
        assert_eq!(dropout.prob, 0.5);
    }

    #[test]
    #[should_panic(expected = "Dropout probability must be in [0, 1)")]
    fn dropout_invalid_probability() {
        Dropout::new(1.5);
    }
}
