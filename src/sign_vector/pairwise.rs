use ndarray::{Array1, ArrayView2, Axis};

use crate::utils::improvement_floor;

/// How flip scores are consumed between committed flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreUpdate {
    /// Commit only the best flip, then rescan every score.
    Rescan,
    /// Commit flips as soon as they beat the best gain seen so far in the
    /// current sweep.
    Eager,
}

/// Flip scores over the residual rows.
///
/// `scores[r] = x_r·D − z_r·‖x_r‖²` is the dot product of row `r` with the
/// direction built from every other row. Flipping `r` changes `‖D‖²` by
/// `−4·z_r·scores[r]`, so it pays off exactly when `z_r·scores[r] < 0`.
///
/// Row dot products are computed per committed flip, so memory stays `O(m)`.
struct FlipScores<'a> {
    residual: ArrayView2<'a, f64>,
    scores: Array1<f64>,
}

impl<'a> FlipScores<'a> {
    fn new(residual: ArrayView2<'a, f64>, sign: &Array1<f64>, direction: &Array1<f64>) -> Self {
        let norms = residual.map_axis(Axis(1), |row| row.dot(&row));
        let scores = residual.dot(direction) - &(sign * &norms);
        FlipScores { residual, scores }
    }

    fn gain(&self, sign: &Array1<f64>, r: usize) -> f64 {
        if sign[r] * self.scores[r] < 0.0 {
            4.0 * self.scores[r].abs()
        } else {
            0.0
        }
    }

    fn best(&self, sign: &Array1<f64>, floor: f64) -> Option<usize> {
        let mut best = None;
        let mut best_gain = floor;
        for r in 0..self.scores.len() {
            let gain = self.gain(sign, r);
            if gain > best_gain {
                best_gain = gain;
                best = Some(r);
            }
        }
        best
    }

    /// Flips row `p` and updates every other score with one `O(m·n)` pass of
    /// row dot products against `x_p`; the score of `p` itself is unchanged
    /// by its own flip.
    fn flip(&mut self, sign: &mut Array1<f64>, direction: &mut Array1<f64>, p: usize) {
        sign[p] = -sign[p];
        let step = 2.0 * sign[p];

        let own = self.scores[p];
        let against_p = self.residual.dot(&self.residual.row(p));
        self.scores.scaled_add(step, &against_p);
        self.scores[p] = own;

        direction.scaled_add(step, &self.residual.row(p));
    }
}

/// Local search driven by pairwise row scores.
///
/// With [`ScoreUpdate::Rescan`] each committed flip counts as one iteration,
/// with [`ScoreUpdate::Eager`] each sweep does.
pub(super) fn refine(
    residual: ArrayView2<f64>,
    sign: &mut Array1<f64>,
    direction: &mut Array1<f64>,
    epsilon: f64,
    update: ScoreUpdate,
) -> u64 {
    let mut scores = FlipScores::new(residual, sign, direction);
    let mut iterations = 0;

    match update {
        ScoreUpdate::Rescan => loop {
            let floor = improvement_floor(epsilon, direction.dot(&*direction));
            match scores.best(sign, floor) {
                Some(p) => {
                    scores.flip(sign, direction, p);
                    iterations += 1;
                }
                None => return iterations,
            }
        },
        ScoreUpdate::Eager => loop {
            let mut best_gain = improvement_floor(epsilon, direction.dot(&*direction));
            let mut flipped = false;

            for r in 0..residual.nrows() {
                let gain = scores.gain(sign, r);
                if gain > best_gain {
                    best_gain = gain;
                    scores.flip(sign, direction, r);
                    flipped = true;
                }
            }

            iterations += 1;
            if !flipped {
                return iterations;
            }
        },
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
    fn test_scores_match_flip_gain() {
        let x = random_matrix(10, 4, 21);
        let z = array![1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0];
        let d = x.t().dot(&z);
        let scores = FlipScores::new(x.view(), &z, &d);
        let base = objective(x.view(), &z);

        for r in 0..10 {
            let mut flipped = z.clone();
            flipped[r] = -flipped[r];
            let delta = objective(x.view(), &flipped) - base;
            assert_abs_diff_eq!(delta, -4.0 * z[r] * scores.scores[r], epsilon = 1e-8);
        }
    }

    #[test]
    fn test_flip_keeps_scores_consistent() {
        let x = random_matrix(9, 3, 4);
        let mut z = Array1::<f64>::ones(9);
        let mut d = x.t().dot(&z);
        let mut scores = FlipScores::new(x.view(), &z, &d);

        scores.flip(&mut z, &mut d, 2);
        scores.flip(&mut z, &mut d, 7);

        let fresh = FlipScores::new(x.view(), &z, &d);
        for r in 0..9 {
            assert_abs_diff_eq!(scores.scores[r], fresh.scores[r], epsilon = 1e-9);
        }
        let expected = x.t().dot(&z);
        for (a, b) in d.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rescan_reaches_local_optimum() {
        let x = random_matrix(50, 4, 8);
        let mut z = Array1::<f64>::ones(50);
        let mut d = x.t().dot(&z);
        let before = objective(x.view(), &z);

        refine(x.view(), &mut z, &mut d, DEFAULT_EPSILON, ScoreUpdate::Rescan);

        assert!(objective(x.view(), &z) >= before);
        assert_locally_optimal(x.view(), &z);
    }

    #[test]
    fn test_eager_reaches_local_optimum() {
        let x = random_matrix(50, 4, 8);
        let mut z = Array1::<f64>::ones(50);
        let mut d = x.t().dot(&z);

        let sweeps = refine(x.view(), &mut z, &mut d, DEFAULT_EPSILON, ScoreUpdate::Eager);

        assert!(sweeps >= 1);
        assert_locally_optimal(x.view(), &z);
    }

    #[test]
    fn test_rescan_counts_flips() {
        let x = array![[1.0, 1.0], [-1.0, -1.0], [2.0, 0.5]];
        let mut z = Array1::<f64>::ones(3);
        let mut d = x.t().dot(&z);

        let flips = refine(x.view(), &mut z, &mut d, DEFAULT_EPSILON, ScoreUpdate::Rescan);

        assert_eq!(flips, 1);
        assert_eq!(z, array![1.0, -1.0, 1.0]);
    }
}
