use ndarray::{s, Array1, ArrayView1};

/// Strict-improvement bias for sign flips and the threshold below which a
/// centroid value counts as zero.
pub const DEFAULT_EPSILON: f64 = 1e-10;

pub trait SignVectorOps {
    fn fill_positive(&mut self);
    fn extend_positive(&mut self, count: usize);
    fn is_sign_vector(&self) -> bool;
}

impl SignVectorOps for Array1<f64> {
    fn fill_positive(&mut self) {
        self.fill(1.0);
    }

    fn extend_positive(&mut self, count: usize) {
        let len = self.len();
        let mut grown = Array1::<f64>::ones(len + count);
        grown.slice_mut(s![..len]).assign(self);
        *self = grown;
    }

    fn is_sign_vector(&self) -> bool {
        self.iter().all(|&z| z == 1.0 || z == -1.0)
    }
}

pub fn l2_norm(v: ArrayView1<f64>) -> f64 {
    v.dot(&v).sqrt()
}

// Rounding slack on a freshly computed score, a few ulps of its magnitude.
const SCORE_ULPS: f64 = 16.0 * f64::EPSILON;

// A flip has to beat the current score by more than this: the epsilon bias,
// or the rounding slack of `score` when that is larger.
pub(crate) fn improvement_floor(epsilon: f64, score: f64) -> f64 {
    epsilon.max(SCORE_ULPS * score.abs())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use ndarray::{Array1, Array2, ArrayView2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    pub fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    pub fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Array2::from_shape_fn((rows, cols), |_| rng.random_range(-10.0..10.0))
    }

    pub fn objective(x: ArrayView2<f64>, z: &Array1<f64>) -> f64 {
        let d = x.t().dot(z);
        d.dot(&d)
    }

    /// Largest gain any single flip of `z` would still achieve.
    pub fn best_single_flip_gain(x: ArrayView2<f64>, z: &Array1<f64>) -> f64 {
        let base = objective(x, z);
        let mut flipped = z.clone();
        let mut best = f64::NEG_INFINITY;
        for r in 0..z.len() {
            flipped[r] = -flipped[r];
            best = best.max(objective(x, &flipped) - base);
            flipped[r] = -flipped[r];
        }
        best
    }

    pub fn assert_locally_optimal(x: ArrayView2<f64>, z: &Array1<f64>) {
        let base = objective(x, z);
        let gain = best_single_flip_gain(x, z);
        assert!(
            gain <= 1e-8_f64.max(1e-13 * base),
            "improving flip left behind: gain {} over score {}",
            gain,
            base
        );
    }
}
