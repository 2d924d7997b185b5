use ndarray::{Array1, ArrayView2};

use crate::utils::improvement_floor;

/// First-improvement local search over an explicit direction `D = Xᵀ·Z`.
///
/// Flipping row `r` changes the score to `‖D‖² − 4·z_r·(x_r·D) + 4·‖x_r‖²`, so
/// each candidate costs one pass over that row only. Sweeps repeat until a
/// whole sweep commits nothing. Returns the number of sweeps.
pub(super) fn refine(
    residual: ArrayView2<f64>,
    sign: &mut Array1<f64>,
    direction: &mut Array1<f64>,
    epsilon: f64,
) -> u64 {
    let mut score = direction.dot(&*direction);
    let mut sweeps = 0;

    loop {
        let mut flipped = false;

        for (r, row) in residual.outer_iter().enumerate() {
            let z = sign[r];
            let candidate = score - 4.0 * z * row.dot(&*direction) + 4.0 * row.dot(&row);

            if candidate > score + improvement_floor(epsilon, score) {
                direction.scaled_add(-2.0 * z, &row);
                sign[r] = -z;
                score = direction.dot(&*direction);
                flipped = true;
            }
        }

        sweeps += 1;
        if !flipped {
            return sweeps;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{assert_locally_optimal, objective, random_matrix};
    use crate::utils::DEFAULT_EPSILON;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_flips_opposed_row() {
        let x = array![[1.0, 1.0], [-1.0, -1.0], [2.0, 0.5]];
        let mut z = Array1::<f64>::ones(3);
        let mut d = x.t().dot(&z);

        refine(x.view(), &mut z, &mut d, DEFAULT_EPSILON);

        assert_eq!(z, array![1.0, -1.0, 1.0]);
        assert_eq!(d, array![4.0, 2.5]);
    }

    #[test]
    fn test_converged_start_takes_one_sweep() {
        let x = array![[1.0, 2.0], [3.0, 1.0]];
        let mut z = Array1::<f64>::ones(2);
        let mut d = x.t().dot(&z);

        assert_eq!(refine(x.view(), &mut z, &mut d, DEFAULT_EPSILON), 1);
        assert_eq!(z, Array1::<f64>::ones(2));
    }

    #[test]
    fn test_score_never_decreases() {
        let x = random_matrix(60, 5, 3);
        let mut z = Array1::<f64>::ones(60);
        let before = objective(x.view(), &z);
        let mut d = x.t().dot(&z);

        refine(x.view(), &mut z, &mut d, DEFAULT_EPSILON);

        assert!(objective(x.view(), &z) >= before);
        assert_locally_optimal(x.view(), &z);
        let expected = x.t().dot(&z);
        for (a, b) in d.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_zero_residual_keeps_signs() {
        let x = ndarray::Array2::<f64>::zeros((4, 3));
        let mut z = array![1.0, -1.0, 1.0, -1.0];
        let mut d = x.t().dot(&z);

        refine(x.view(), &mut z, &mut d, DEFAULT_EPSILON);
        assert_eq!(z, array![1.0, -1.0, 1.0, -1.0]);
    }
}
