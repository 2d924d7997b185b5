//! # Sign-Vector Search
//!
//! Each rank of a centroid decomposition is driven by a sign vector
//! `Z ∈ {-1, +1}^m` that (approximately) maximizes `‖Xᵀ·Z‖²` for the current
//! residual `X`. Finding the global maximum is NP-hard, so every strategy here
//! stops at a local optimum: no single flip improves the score by more than
//! the epsilon bias.
//!
//! ## Strategies
//! A strategy pairs an initializer with a refinement:
//!
//! | code | strategy        | initializer | refinement                     |
//! |------|-----------------|-------------|--------------------------------|
//! | 0    | `IssvBase`      | cached      | pairwise, rescan per flip      |
//! | 1    | `IssvPlusBase`  | cached      | pairwise, eager in-sweep flips |
//! | 2    | `IssvInit`      | greedy scan | pairwise, rescan per flip      |
//! | 3    | `IssvPlusInit`  | greedy scan | pairwise, eager in-sweep flips |
//! | 4    | `LsvBase`       | greedy scan | direct local search            |
//! | 5    | `LsvNoInit`     | cached      | direct local search            |
//!
//! The greedy scan only runs before the owning engine completes its first
//! decomposition. Afterwards every strategy starts from the cached sign
//! vector, which is what makes streaming re-decomposition cheap.
//!
//! ## Algorithm Selection Guide
//! - Use the **pairwise** refinements when few flips are expected, e.g. warm
//!   restarts after appending rows: candidates are ranked from `O(m)` scores
//!   and each committed flip costs one `O(m·n)` pass.
//! - Use the **direct** refinement from cold starts, where many flips are
//!   committed and each one only touches its own row.
//!
//! Both keep `O(m + n)` working memory per search.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use log::trace;
use ndarray::{Array1, ArrayView1, ArrayView2};

mod local;
mod pairwise;

pub use pairwise::ScoreUpdate;

/// How a search produces its starting sign vector and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initializer {
    /// Single greedy pass over the rows, committing each sign immediately.
    Greedy,
    /// Start from the cached sign vector and its direction.
    Cached,
}

/// How a search improves the starting sign vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refinement {
    /// First-improvement sweeps over an explicit direction vector.
    Direct,
    /// Flip scores maintained from row dot products.
    Pairwise(ScoreUpdate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignVectorStrategy {
    IssvBase,
    IssvPlusBase,
    IssvInit,
    IssvPlusInit,
    #[default]
    LsvBase,
    LsvNoInit,
}

impl SignVectorStrategy {
    pub const ALL: [SignVectorStrategy; 6] = [
        SignVectorStrategy::IssvBase,
        SignVectorStrategy::IssvPlusBase,
        SignVectorStrategy::IssvInit,
        SignVectorStrategy::IssvPlusInit,
        SignVectorStrategy::LsvBase,
        SignVectorStrategy::LsvNoInit,
    ];

    pub fn code(self) -> u8 {
        match self {
            SignVectorStrategy::IssvBase => 0,
            SignVectorStrategy::IssvPlusBase => 1,
            SignVectorStrategy::IssvInit => 2,
            SignVectorStrategy::IssvPlusInit => 3,
            SignVectorStrategy::LsvBase => 4,
            SignVectorStrategy::LsvNoInit => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| i64::from(s.code()) == code)
    }

    /// Accepts a numeric code only if it maps onto a strategy and that
    /// strategy maps back onto the same code.
    pub fn is_valid_code(code: i64) -> bool {
        Self::from_code(code).is_some_and(|s| i64::from(s.code()) == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            SignVectorStrategy::IssvBase => "issv-base",
            SignVectorStrategy::IssvPlusBase => "issv-plus-base",
            SignVectorStrategy::IssvInit => "issv-init",
            SignVectorStrategy::IssvPlusInit => "issv-plus-init",
            SignVectorStrategy::LsvBase => "lsv-base",
            SignVectorStrategy::LsvNoInit => "lsv-no-init",
        }
    }

    pub fn initializer(self) -> Initializer {
        match self {
            SignVectorStrategy::IssvInit
            | SignVectorStrategy::IssvPlusInit
            | SignVectorStrategy::LsvBase => Initializer::Greedy,
            SignVectorStrategy::IssvBase
            | SignVectorStrategy::IssvPlusBase
            | SignVectorStrategy::LsvNoInit => Initializer::Cached,
        }
    }

    pub fn refinement(self) -> Refinement {
        match self {
            SignVectorStrategy::IssvBase | SignVectorStrategy::IssvInit => {
                Refinement::Pairwise(ScoreUpdate::Rescan)
            }
            SignVectorStrategy::IssvPlusBase | SignVectorStrategy::IssvPlusInit => {
                Refinement::Pairwise(ScoreUpdate::Eager)
            }
            SignVectorStrategy::LsvBase | SignVectorStrategy::LsvNoInit => Refinement::Direct,
        }
    }

    /// Searches for a locally optimal sign vector of `context.residual`.
    ///
    /// `sign` is both the warm start and the result. On return `cache` holds
    /// `Xᵀ·sign` for the whole residual. Returns the number of refinement
    /// iterations spent.
    ///
    /// # Panics
    /// If `sign` does not have one entry per residual row.
    pub fn search(
        self,
        context: &SearchContext<'_>,
        sign: &mut Array1<f64>,
        cache: &mut DirectionCache,
    ) -> u64 {
        let residual = context.residual;
        assert_eq!(
            sign.len(),
            residual.nrows(),
            "sign vector length must match the residual row count"
        );

        let mut direction = match self.initializer() {
            Initializer::Greedy if !context.decomposed => greedy_scan(residual, sign),
            _ => cache.seeded_direction(context, sign.view()),
        };

        let iterations = match self.refinement() {
            Refinement::Direct => local::refine(residual, sign, &mut direction, context.epsilon),
            Refinement::Pairwise(update) => {
                pairwise::refine(residual, sign, &mut direction, context.epsilon, update)
            }
        };
        trace!("{} converged after {} iterations", self, iterations);

        cache.commit(direction, residual.nrows());
        iterations
    }
}

impl fmt::Display for SignVectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i64> for SignVectorStrategy {
    type Error = anyhow::Error;

    fn try_from(code: i64) -> anyhow::Result<Self> {
        Self::from_code(code)
            .filter(|_| Self::is_valid_code(code))
            .ok_or_else(|| anyhow!("Invalid sign vector strategy code: {}", code))
    }
}

impl FromStr for SignVectorStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == normalized)
            .ok_or_else(|| anyhow!("Unknown sign vector strategy: {}", s))
    }
}

/// Inputs shared by every strategy for one rank.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    pub residual: ArrayView2<'a, f64>,
    /// Rows appended since the last full decomposition; they sit at the
    /// bottom of `residual`.
    pub added_rows: usize,
    /// Whether the owning engine has completed a decomposition before.
    pub decomposed: bool,
    pub epsilon: f64,
}

/// Cached `Xᵀ·Z` for one rank.
///
/// The cache remembers how many leading residual rows it covers. It is only
/// reused while those rows of the residual are unchanged; the owner calls
/// [`DirectionCache::invalidate`] otherwise.
#[derive(Debug, Clone)]
pub struct DirectionCache {
    vector: Array1<f64>,
    covered_rows: Option<usize>,
}

impl DirectionCache {
    pub fn new(len: usize) -> Self {
        DirectionCache {
            vector: Array1::zeros(len),
            covered_rows: None,
        }
    }

    pub fn vector(&self) -> ArrayView1<'_, f64> {
        self.vector.view()
    }

    /// Number of leading rows the cached direction is exact for, if any.
    pub fn covered_rows(&self) -> Option<usize> {
        self.covered_rows
    }

    pub fn invalidate(&mut self) {
        self.covered_rows = None;
    }

    pub(crate) fn commit(&mut self, direction: Array1<f64>, rows: usize) {
        self.vector = direction;
        self.covered_rows = Some(rows);
    }

    /// Makes the cache current for `context.residual` and `sign` without
    /// searching.
    pub(crate) fn refresh(&mut self, context: &SearchContext<'_>, sign: ArrayView1<f64>) {
        let direction = self.seeded_direction(context, sign);
        self.commit(direction, context.residual.nrows());
    }

    /// `Xᵀ·Z` for the current residual, reusing the cached direction when it
    /// covers every row except the newly appended ones.
    fn seeded_direction(&self, context: &SearchContext<'_>, sign: ArrayView1<f64>) -> Array1<f64> {
        let residual = context.residual;
        let rows = residual.nrows();

        match self.covered_rows {
            Some(covered)
                if covered + context.added_rows == rows
                    && self.vector.len() == residual.ncols() =>
            {
                let mut direction = self.vector.clone();
                for r in covered..rows {
                    direction.scaled_add(sign[r], &residual.row(r));
                }
                direction
            }
            _ => residual.t().dot(&sign),
        }
    }
}

/// Greedy single pass: row 0 keeps its sign, every later row takes the sign
/// that makes the running direction longer (ties go to `-1`).
fn greedy_scan(residual: ArrayView2<f64>, sign: &mut Array1<f64>) -> Array1<f64> {
    let mut direction = Array1::<f64>::zeros(residual.ncols());
    let mut rows = residual.outer_iter().enumerate();

    if let Some((_, first)) = rows.next() {
        direction.scaled_add(sign[0], &first);
    }

    for (r, row) in rows {
        let (mut plus, mut minus) = (0.0, 0.0);
        for (&d, &x) in direction.iter().zip(row.iter()) {
            plus += (d + x) * (d + x);
            minus += (d - x) * (d - x);
        }
        sign[r] = if plus > minus { 1.0 } else { -1.0 };
        direction.scaled_add(sign[r], &row);
    }

    direction
}
