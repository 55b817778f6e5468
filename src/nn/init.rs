//! Инициализаторы весов.
//!
//! Чистые функции (форма, генератор) -> массив. При одинаковом состоянии
//! генератора результат одинаков - это условие воспроизводимости
//! checkpoint/resume.

use ndarray::{concatenate, ArrayD, Axis, Ix2, IxDyn};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;

/// Единая сигнатура инициализатора, чтобы слои принимали его параметром.
pub type Init = fn(&[usize], &mut StdRng) -> ArrayD<f32>;

/// Массив нулей заданной формы.
pub fn zeros(shape: &[usize]) -> ArrayD<f32> {
    ArrayD::zeros(IxDyn(shape))
}

/// Равномерная инициализация U(-0.08, 0.08) общего назначения.
pub fn uniform(shape: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
    ArrayD::random_using(IxDyn(shape), Uniform::new(-0.08f32, 0.08f32), rng)
}

/// Стандартный нормальный шум, масштабированный на 0.01.
pub fn scaled_normal(shape: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
    let normal: ArrayD<f32> = ArrayD::random_using(IxDyn(shape), StandardNormal, rng);
    normal * 0.01
}

/// Равномерная инициализация в пределах +-sqrt(6 / sum(shape)) для tanh.
///
/// Граница строится по СУММЕ измерений формы - осознанный выбор исходной
/// схемы, сохранённый как есть.
pub fn tanh_fan(shape: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
    let bound = (6.0 / shape.iter().sum::<usize>() as f32).sqrt();
    ArrayD::random_using(IxDyn(shape), Uniform::new(-bound, bound), rng)
}

/// Граница tanh_fan, умноженная на 4 - для сигмоидных активаций.
pub fn sigmoid_fan(shape: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
    tanh_fan(shape, rng) * 4.0
}

/// Ортонормальная инициализация: ортонормальный фактор стандартной
/// нормальной матрицы через односторонний метод Якоби для SVD.
///
/// Для формы (m, n) с m >= n столбцы результата ортонормальны; при m < n
/// ортонормальны строки.
pub fn ortho(shape: &[usize], rng: &mut StdRng) -> ArrayD<f32> {
    assert_eq!(shape.len(), 2, "ortho initializer expects a 2-D shape, got {:?}", shape);
    let gaussian: ArrayD<f32> = ArrayD::random_using(IxDyn(shape), StandardNormal, rng);
    let matrix = gaussian.into_dimensionality::<Ix2>().unwrap();
    if shape[0] >= shape[1] {
        orthonormal_columns(matrix).into_dyn()
    } else {
        orthonormal_columns(matrix.reversed_axes().to_owned())
            .reversed_axes()
            .into_dyn()
    }
}

/// Односторонний Якоби: вращает пары столбцов, пока они не станут взаимно
/// ортогональными, затем нормирует. Возвращает левый сингулярный фактор.
fn orthonormal_columns(mut a: ndarray::Array2<f32>) -> ndarray::Array2<f32> {
    let (m, n) = a.dim();
    let eps = 1e-7f32;
    let max_sweeps = 32;

    for _ in 0..max_sweeps {
        let mut off_diagonal = false;
        for p in 0..n {
            for q in (p + 1)..n {
                let mut alpha = 0.0f32;
                let mut beta = 0.0f32;
                let mut gamma = 0.0f32;
                for i in 0..m {
                    let ap = a[[i, p]];
                    let aq = a[[i, q]];
                    alpha += ap * ap;
                    beta += aq * aq;
                    gamma += ap * aq;
                }
                if gamma.abs() <= eps * (alpha * beta).sqrt() {
                    continue;
                }
                off_diagonal = true;
                let zeta = (beta - alpha) / (2.0 * gamma);
                let t = zeta.signum() / (zeta.abs() + (1.0 + zeta * zeta).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = c * t;
                for i in 0..m {
                    let ap = a[[i, p]];
                    let aq = a[[i, q]];
                    a[[i, p]] = c * ap - s * aq;
                    a[[i, q]] = s * ap + c * aq;
                }
            }
        }
        if !off_diagonal {
            break;
        }
    }

    for j in 0..n {
        let norm = a.column(j).dot(&a.column(j)).sqrt();
        if norm > 0.0 {
            a.column_mut(j).mapv_inplace(|v| v / norm);
        }
    }
    a
}

/// Горизонтальная склейка матриц (упаковка гейтовых весов в один блок).
pub fn hstack(parts: &[ArrayD<f32>]) -> ArrayD<f32> {
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(1), &views).expect("hstack: incompatible shapes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn zeros_has_requested_shape_and_is_zero() {
        let z = zeros(&[3, 5]);
        assert_eq!(z.shape(), &[3, 5]);
        assert!(z.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn tanh_fan_respects_its_bound() {
        let mut rng = StdRng::seed_from_u64(1999);
        let shape = [12, 20];
        let bound = (6.0f32 / 32.0).sqrt();
        let w = tanh_fan(&shape, &mut rng);
        assert_eq!(w.shape(), &shape);
        assert!(w.iter().all(|v| v.abs() <= bound));
    }

    #[test]
    fn ortho_columns_are_orthonormal() {
        let mut rng = StdRng::seed_from_u64(42);
        let w = ortho(&[6, 6], &mut rng).into_dimensionality::<Ix2>().unwrap();
        for i in 0..6 {
            for j in 0..6 {
                let dot = w.column(i).dot(&w.column(j));
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (dot - expected).abs() < 1e-3,
                    "columns {} and {}: dot = {}",
                    i,
                    j,
                    dot
                );
            }
        }
    }

    #[test]
    fn ortho_wide_matrix_has_orthonormal_rows() {
        let mut rng = StdRng::seed_from_u64(7);
        let w = ortho(&[3, 8], &mut rng).into_dimensionality::<Ix2>().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let dot = w.row(i).dot(&w.row(j));
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn initializers_are_deterministic_for_equal_rng_state() {
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        assert_eq!(uniform(&[4, 4], &mut a), uniform(&[4, 4], &mut b));
        assert_eq!(scaled_normal(&[4], &mut a), scaled_normal(&[4], &mut b));
    }
}
