//! # Centroid Decomposition
//!
//! Truncated, sequentially extracted factorization `X ≈ L·Rᵀ` of a dense
//! matrix. For every rank `i` a sign vector `Z_i` is searched on the current
//! residual, the direction `Xᵀ·Z_i` is normalized into relevance column `R_i`,
//! the load column is `L_i = X·R_i`, and `L_i·R_iᵀ` is deflated from the
//! residual before the next rank.
//!
//! The engine owns its source matrix and keeps one sign vector and one
//! direction per rank between calls. After rows are appended with
//! [`CentroidDecomposition::increment`] the next decomposition starts every
//! search from the previous solution and only folds in the new rows. Edits
//! through [`CentroidDecomposition::source_mut`] keep the sign vectors as warm
//! starts but rebuild every direction.

use anyhow::{bail, ensure};
use log::{debug, trace, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2};

use crate::dense::MatrixGrowth;
use crate::sign_vector::{DirectionCache, SearchContext, SignVectorStrategy};
use crate::utils::{l2_norm, SignVectorOps, DEFAULT_EPSILON};

pub struct CentroidDecomposition {
    source: Array2<f64>,
    load: Array2<f64>,
    relevance: Array2<f64>,
    sign_vectors: Vec<Array1<f64>>,
    directions: Vec<DirectionCache>,
    truncation: usize,
    strategy: SignVectorStrategy,
    epsilon: f64,
    added_rows: usize,
    decomposed: bool,
    sign_vector_iterations: u64,
}

impl CentroidDecomposition {
    /// Creates an engine over `source` computing `truncation` ranks with the
    /// default strategy. Both factors start out as zeros and every cached sign
    /// vector as all `+1`.
    ///
    /// # Panics
    /// If `truncation` exceeds the column count of `source`.
    pub fn new(source: Array2<f64>, truncation: usize) -> Self {
        let (rows, cols) = source.dim();
        assert!(
            truncation <= cols,
            "truncation ({}) exceeds number of columns ({})",
            truncation,
            cols
        );

        CentroidDecomposition {
            load: Array2::zeros((rows, truncation)),
            relevance: Array2::zeros((cols, truncation)),
            sign_vectors: vec![Array1::ones(rows); cols],
            directions: vec![DirectionCache::new(cols); cols],
            truncation,
            strategy: SignVectorStrategy::default(),
            epsilon: DEFAULT_EPSILON,
            added_rows: 0,
            decomposed: false,
            sign_vector_iterations: 0,
            source,
        }
    }

    /// Creates an engine that decomposes every column of `source`.
    pub fn with_full_rank(source: Array2<f64>) -> Self {
        let cols = source.ncols();
        Self::new(source, cols)
    }

    /// Runs a full decomposition of the current source.
    ///
    /// # Parameters
    /// - `centroid_values`: if present, the centroid value `‖Xᵀ·Z_i‖` of every
    ///   consumed rank is appended to it
    /// - `stop_on_incomplete_rank`: with `centroid_values` present, stop at the
    ///   first rank whose centroid value is below epsilon; that rank and all
    ///   later ones are left as zero columns
    /// - `skip_search`: use the cached sign vectors as they are. Only meant
    ///   for warm restarts from trusted sign vectors.
    ///
    /// # Side Effects
    /// - Overwrites the load and relevance factors
    /// - Updates the cached sign vectors and directions
    /// - Clears the appended-row count and marks the engine as decomposed
    pub fn perform_decomposition(
        &mut self,
        mut centroid_values: Option<&mut Vec<f64>>,
        stop_on_incomplete_rank: bool,
        skip_search: bool,
    ) -> anyhow::Result<()> {
        let (rows, cols) = self.source.dim();
        debug!(
            "Centroid decomposition of {} x {} with truncation {} ({}, {} appended rows)",
            rows, cols, self.truncation, self.strategy, self.added_rows
        );

        self.load.fit_shape(rows, self.truncation);
        self.relevance.fit_shape(cols, self.truncation);

        let mut residual = self.source.clone();
        // First rank whose cached direction no longer matches the residual.
        let mut stale_from: Option<usize> = None;

        for i in 0..self.truncation {
            if stale_from.is_some() {
                self.directions[i].invalidate();
            }

            let context = SearchContext {
                residual: residual.view(),
                added_rows: self.added_rows,
                decomposed: self.decomposed,
                epsilon: self.epsilon,
            };
            if skip_search {
                self.directions[i].refresh(&context, self.sign_vectors[i].view());
            } else {
                self.sign_vector_iterations += self.strategy.search(
                    &context,
                    &mut self.sign_vectors[i],
                    &mut self.directions[i],
                );
            }

            let direction = self.directions[i].vector();
            let centroid = l2_norm(direction);
            trace!("Rank {}: centroid value {}", i, centroid);

            if let Some(values) = centroid_values.as_mut() {
                if stop_on_incomplete_rank && centroid < self.epsilon {
                    warn!(
                        "Incomplete rank {} (centroid value {}), stopping early",
                        i, centroid
                    );
                    self.load.slice_mut(s![.., i..]).fill(0.0);
                    self.relevance.slice_mut(s![.., i..]).fill(0.0);
                    stale_from = Some(stale_from.map_or(i + 1, |start| start.min(i + 1)));
                    break;
                }
                values.push(centroid);
            }

            let rel = if centroid == 0.0 {
                Array1::zeros(cols)
            } else {
                &direction / centroid
            };
            if stale_from.is_none() && self.relevance.column(i) != rel {
                stale_from = Some(i + 1);
            }
            self.relevance.insert_column(i, rel.view())?;

            let load = residual.dot(&rel);
            self.load.insert_column(i, load.view())?;

            deflate(&mut residual, load.view(), rel.view());
        }

        if let Some(start) = stale_from {
            for cache in self.directions.iter_mut().skip(start) {
                cache.invalidate();
            }
        }

        self.added_rows = 0;
        self.decomposed = true;
        Ok(())
    }

    /// Resizes both factors to `truncation` columns, keeping the leading
    /// columns. Cached sign vectors and directions are left untouched.
    ///
    /// # Panics
    /// If `truncation` exceeds the column count of the source.
    pub fn change_truncation(&mut self, truncation: usize) {
        assert!(
            truncation <= self.source.ncols(),
            "truncation ({}) exceeds number of columns ({})",
            truncation,
            self.source.ncols()
        );
        self.truncation = truncation;
        self.load.resize_columns(truncation);
        self.relevance.resize_columns(truncation);
    }

    /// Appends one row to the source. The matching load row is a zero
    /// placeholder until the next decomposition and every cached sign vector
    /// gains a `+1` entry.
    pub fn increment(&mut self, row: ArrayView1<f64>) -> anyhow::Result<()> {
        self.source.append_row(row)?;
        self.load.append_zero_rows(1);
        self.extend_sign_vectors(1);
        Ok(())
    }

    /// Appends `count` zero rows to the source and returns them so the caller
    /// can fill them in before the next decomposition.
    pub fn increment_raw(&mut self, count: usize) -> ArrayViewMut2<'_, f64> {
        let rows = self.source.nrows();
        self.source.append_zero_rows(count);
        self.load.append_zero_rows(count);
        self.extend_sign_vectors(count);
        self.source.slice_mut(s![rows.., ..])
    }

    /// Mutable access to the whole source, e.g. to write recovered values
    /// into missing cells. Cached sign vectors are kept as warm starts but
    /// every cached direction is dropped.
    pub fn source_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.invalidate_directions();
        self.source.view_mut()
    }

    /// Swaps in a new dataset with the same column count. The factors are
    /// reshaped and zeroed, sign vectors restart at all `+1` and the next
    /// decomposition runs the greedy initializer again.
    pub fn replace_source(&mut self, source: Array2<f64>) -> anyhow::Result<()> {
        let (rows, cols) = source.dim();
        ensure!(
            cols == self.source.ncols(),
            "Replacement has {} columns, expected {}",
            cols,
            self.source.ncols()
        );

        self.source = source;
        self.load = Array2::zeros((rows, self.truncation));
        self.relevance.fill(0.0);
        for sign in self.sign_vectors.iter_mut() {
            *sign = Array1::ones(rows);
        }
        self.invalidate_directions();
        self.added_rows = 0;
        self.decomposed = false;
        Ok(())
    }

    fn invalidate_directions(&mut self) {
        for cache in self.directions.iter_mut() {
            cache.invalidate();
        }
    }

    fn extend_sign_vectors(&mut self, count: usize) {
        for sign in self.sign_vectors.iter_mut() {
            sign.extend_positive(count);
        }
        self.added_rows += count;
    }

    /// Sets every cached sign vector back to all `+1`, dropping any warm
    /// start.
    pub fn reset_sign_vectors(&mut self) {
        for (sign, cache) in self.sign_vectors.iter_mut().zip(self.directions.iter_mut()) {
            sign.fill_positive();
            cache.invalidate();
        }
    }

    pub fn load(&self) -> &Array2<f64> {
        &self.load
    }

    pub fn relevance(&self) -> &Array2<f64> {
        &self.relevance
    }

    /// Moves the load factor out. The engine keeps an `m × 0` matrix until
    /// the next decomposition or truncation change.
    pub fn steal_load(&mut self) -> Array2<f64> {
        let rows = self.load.nrows();
        std::mem::replace(&mut self.load, Array2::zeros((rows, 0)))
    }

    /// Moves the relevance factor out. The engine keeps an `n × 0` matrix
    /// until the next decomposition or truncation change.
    pub fn steal_relevance(&mut self) -> Array2<f64> {
        let rows = self.relevance.nrows();
        std::mem::replace(&mut self.relevance, Array2::zeros((rows, 0)))
    }

    /// Zeroes both factors so the instance can be reused.
    pub fn destroy_decomposition(&mut self) {
        self.load.fill(0.0);
        self.relevance.fill(0.0);
    }

    /// `L·Rᵀ`, the rank-`k` approximation of the source.
    pub fn reconstruct(&self) -> Array2<f64> {
        self.load.dot(&self.relevance.t())
    }

    pub fn source(&self) -> ArrayView2<'_, f64> {
        self.source.view()
    }

    pub fn truncation(&self) -> usize {
        self.truncation
    }

    pub fn strategy(&self) -> SignVectorStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: SignVectorStrategy) {
        self.strategy = strategy;
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Cached sign vector of rank `rank`.
    pub fn sign_vector(&self, rank: usize) -> ArrayView1<'_, f64> {
        self.sign_vectors[rank].view()
    }

    /// Cached direction of rank `rank`.
    pub fn direction(&self, rank: usize) -> ArrayView1<'_, f64> {
        self.directions[rank].vector()
    }

    pub fn added_rows(&self) -> usize {
        self.added_rows
    }

    pub fn is_decomposed(&self) -> bool {
        self.decomposed
    }

    /// Refinement iterations spent by all searches so far.
    pub fn sign_vector_iterations(&self) -> u64 {
        self.sign_vector_iterations
    }
}

fn deflate(residual: &mut Array2<f64>, load: ArrayView1<f64>, rel: ArrayView1<f64>) {
    for (mut row, &l) in residual.rows_mut().into_iter().zip(load.iter()) {
        row.scaled_add(-l, &rel);
    }
}

/// Decomposes `matrix` once and returns `(load, relevance)`.
///
/// A `truncation` of zero means every column.
pub fn perform_centroid_decomposition(
    matrix: Array2<f64>,
    truncation: usize,
) -> anyhow::Result<(Array2<f64>, Array2<f64>)> {
    let truncation = if truncation == 0 {
        matrix.ncols()
    } else {
        truncation
    };
    let mut cd = CentroidDecompositionBuilder::new()
        .truncation(truncation)
        .build(matrix)?;
    cd.perform_decomposition(None, false, false)?;
    Ok((cd.steal_load(), cd.steal_relevance()))
}

/// Builder for configuring and creating [`CentroidDecomposition`] instances.
///
/// # Example Usage
/// ```ignore
/// let mut cd = CentroidDecompositionBuilder::new()
///     .truncation(3)
///     .strategy(SignVectorStrategy::IssvPlusInit)
///     .build(matrix)?;
/// cd.perform_decomposition(None, false, false)?;
/// ```
pub struct CentroidDecompositionBuilder {
    truncation: Option<usize>,
    strategy: SignVectorStrategy,
    epsilon: f64,
}

impl Default for CentroidDecompositionBuilder {
    fn default() -> Self {
        Self {
            truncation: None,
            strategy: SignVectorStrategy::default(),
            epsilon: DEFAULT_EPSILON,
        }
    }
}

impl CentroidDecompositionBuilder {
    /// Creates a new builder with default parameters.
    ///
    /// Default values:
    /// - `truncation`: every column of the source
    /// - `strategy`: `LsvBase`
    /// - `epsilon`: 1e-10
    pub fn new() -> Self {
        Self::default()
    }

    pub fn truncation(mut self, truncation: usize) -> Self {
        self.truncation = Some(truncation);
        self
    }

    pub fn strategy(mut self, strategy: SignVectorStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Selects the strategy from its numeric code, e.g. as read from an
    /// external configuration.
    pub fn strategy_code(mut self, code: i64) -> anyhow::Result<Self> {
        self.strategy = SignVectorStrategy::try_from(code)?;
        Ok(self)
    }

    /// Sets the improvement bias and zero-centroid threshold.
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn build(self, source: Array2<f64>) -> anyhow::Result<CentroidDecomposition> {
        let cols = source.ncols();
        let truncation = self.truncation.unwrap_or(cols);
        if truncation > cols {
            bail!(
                "Truncation ({}) exceeds number of columns ({})",
                truncation,
                cols
            );
        }
        ensure!(
            self.epsilon.is_finite() && self.epsilon > 0.0,
            "Epsilon must be positive and finite, got {}",
            self.epsilon
        );

        let mut cd = CentroidDecomposition::new(source, truncation);
        cd.strategy = self.strategy;
        cd.epsilon = self.epsilon;
        Ok(cd)
    }
}
