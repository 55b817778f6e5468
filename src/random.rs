//! Явный источник seed-ов для стохастических узлов графа.
//!
//! Каждый стохастический слой получает собственный целочисленный seed из
//! одного мастер-источника, поэтому воспроизводимость не зависит от того,
//! в каком порядке слои обращаются к общему генератору: источник передаётся
//! явно и продвигается явными вызовами.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Диапазон, из которого выводятся seed-ы шумовых узлов.
pub const SEED_LOW: i64 = -2_147_462_579;
pub const SEED_HIGH: i64 = 2_147_462_579;

/// Последовательность seed-ов, выводимая из одного мастер-seed.
///
/// Тот же мастер-seed и тот же порядок вызовов дают ту же последовательность;
/// это обязательное условие воспроизводимости выборок между перезапусками.
#[derive(Debug)]
pub struct SeedStream {
    rng: StdRng,
}

impl SeedStream {
    pub fn new(master_seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(master_seed) }
    }

    /// Выводит seed очередного шумового узла.
    ///
    /// Нулевой seed вырождает нижележащий генератор шума, поэтому ноль
    /// перевыбирается из полного 32-битного диапазона с диагностическим
    /// предупреждением.
    pub fn next_seed(&mut self) -> i64 {
        let seed = self.rng.gen_range(SEED_LOW..=SEED_HIGH);
        if seed == 0 {
            log::warn!("drew a zero noise seed, redrawing from the full 32-bit range");
            return self.rng.gen_range(-(1i64 << 32)..=(1i64 << 32));
        }
        seed
    }

    /// Отдельный генератор для инициализации массива весов.
    ///
    /// Инициализаторы - чистые функции от (формы, генератора); продвижение
    /// мастер-источника на один шаг на каждый массив сохраняет детерминизм
    /// при любом числе обращений внутри инициализатора.
    pub fn init_rng(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.gen())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_master_seed_gives_same_sequence() {
        let mut a = SeedStream::new(1999);
        let mut b = SeedStream::new(1999);
        for _ in 0..16 {
            assert_eq!(a.next_seed(), b.next_seed());
        }
    }

    #[test]
    fn seeds_stay_in_declared_range() {
        let mut s = SeedStream::new(7);
        for _ in 0..256 {
            let seed = s.next_seed();
            assert!(seed != 0);
            assert!((-(1i64 << 32)..=(1i64 << 32)).contains(&seed));
        }
    }
}
