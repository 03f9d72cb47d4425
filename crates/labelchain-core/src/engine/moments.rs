//! Empirical first and second moments of weak-signal outputs.
//!
//! One pass over the batch accumulates, for every weak signal and every pair
//! of weak signals, the sum of values and the number of rows where none of
//! the involved signals abstained. Correlations are normalised by the count
//! of jointly non-abstaining rows.
//!
//! ## Determinism
//!
//! Accumulators are integers, so the parallel `fold`/`reduce` produces
//! bit-identical moments regardless of how rows are split across threads.
//!
//! ## Feature gating
//!
//! Parallel accumulation is behind the `parallel` feature flag. When disabled,
//! rows are accumulated sequentially.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::engine::errors::{LabelModelError, Result};
use crate::engine::matrix::{LabelMatrix, ABSTAIN};

/// Rows per rayon task when accumulating moments.
#[cfg(feature = "parallel")]
const ROWS_PER_TASK: usize = 256;

/// Running sums for one batch (or one slice of it).
#[derive(Debug, Clone)]
struct MomentAccumulator {
    m: usize,
    rows: u64,
    count: Vec<u64>,
    sum: Vec<i64>,
    /// Upper-triangular pair data, indexed by [`pair_index`].
    pair_count: Vec<u64>,
    pair_sum: Vec<i64>,
}

impl MomentAccumulator {
    fn new(m: usize) -> Self {
        let pairs = m * (m.saturating_sub(1)) / 2;
        Self {
            m,
            rows: 0,
            count: vec![0; m],
            sum: vec![0; m],
            pair_count: vec![0; pairs],
            pair_sum: vec![0; pairs],
        }
    }

    fn push_row(&mut self, row: &[i8], active: &mut Vec<usize>) {
        self.rows += 1;
        active.clear();
        for (j, &value) in row.iter().enumerate() {
            if value != ABSTAIN {
                self.count[j] += 1;
                self.sum[j] += i64::from(value);
                active.push(j);
            }
        }
        for (offset, &a) in active.iter().enumerate() {
            let va = i64::from(row[a]);
            for &b in &active[offset + 1..] {
                let idx = pair_index(self.m, a, b);
                self.pair_count[idx] += 1;
                self.pair_sum[idx] += va * i64::from(row[b]);
            }
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.rows += other.rows;
        for (lhs, rhs) in self.count.iter_mut().zip(other.count) {
            *lhs += rhs;
        }
        for (lhs, rhs) in self.sum.iter_mut().zip(other.sum) {
            *lhs += rhs;
        }
        for (lhs, rhs) in self.pair_count.iter_mut().zip(other.pair_count) {
            *lhs += rhs;
        }
        for (lhs, rhs) in self.pair_sum.iter_mut().zip(other.pair_sum) {
            *lhs += rhs;
        }
        self
    }
}

/// Index of the unordered pair `(a, b)`, `a != b`, in upper-triangular storage.
#[inline]
fn pair_index(m: usize, a: usize, b: usize) -> usize {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    lo * (2 * m - lo - 1) / 2 + (hi - lo - 1)
}

/// Empirical moments of a batch.
#[derive(Debug, Clone)]
pub struct Moments {
    m: usize,
    rows: usize,
    count: Vec<u64>,
    mean: Vec<f64>,
    pair_count: Vec<u64>,
    correlation: Vec<f64>,
}

impl Moments {
    /// Accumulates moments over every row of `batch`.
    ///
    /// Fails with [`LabelModelError::Shape`] for an empty batch. Signals with
    /// no non-abstaining rows are reported by [`Self::require_coverage`], not here.
    pub fn from_batch(batch: &LabelMatrix) -> Result<Self> {
        if batch.is_empty() {
            return Err(LabelModelError::Shape(
                "cannot estimate moments from an empty batch".into(),
            ));
        }
        let m = batch.cols();

        #[cfg(feature = "parallel")]
        let acc = batch
            .as_slice()
            .par_chunks(m * ROWS_PER_TASK)
            .fold(
                || (MomentAccumulator::new(m), Vec::with_capacity(m)),
                |(mut acc, mut active), chunk| {
                    for row in chunk.chunks_exact(m) {
                        acc.push_row(row, &mut active);
                    }
                    (acc, active)
                },
            )
            .map(|(acc, _)| acc)
            .reduce(|| MomentAccumulator::new(m), MomentAccumulator::merge);

        #[cfg(not(feature = "parallel"))]
        let acc = {
            let mut acc = MomentAccumulator::new(m);
            let mut active = Vec::with_capacity(m);
            for row in batch.iter_rows() {
                acc.push_row(row, &mut active);
            }
            acc
        };

        Ok(Self::finish(acc))
    }

    fn finish(acc: MomentAccumulator) -> Self {
        let mean = acc
            .sum
            .iter()
            .zip(&acc.count)
            .map(|(&s, &c)| if c == 0 { 0.0 } else { s as f64 / c as f64 })
            .collect();
        let correlation = acc
            .pair_sum
            .iter()
            .zip(&acc.pair_count)
            .map(|(&s, &c)| if c == 0 { 0.0 } else { s as f64 / c as f64 })
            .collect();
        Self {
            m: acc.m,
            rows: acc.rows as usize,
            count: acc.count,
            mean,
            pair_count: acc.pair_count,
            correlation,
        }
    }

    /// Fails with [`LabelModelError::Estimation`] naming the first weak signal
    /// that abstained on every row.
    pub fn require_coverage(&self) -> Result<()> {
        if let Some(j) = self.count.iter().position(|&c| c == 0) {
            return Err(LabelModelError::Estimation(format!(
                "weak signal {} abstained on all {} rows; nothing to estimate from",
                j, self.rows
            )));
        }
        Ok(())
    }

    pub fn num_signals(&self) -> usize {
        self.m
    }

    /// Number of rows accumulated.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Non-abstaining rows of signal `j`.
    pub fn count(&self, j: usize) -> u64 {
        self.count[j]
    }

    /// Mean of signal `j` over its non-abstaining rows.
    pub fn mean(&self, j: usize) -> f64 {
        self.mean[j]
    }

    /// `E[λ_a λ_b]` over rows where both voted; `0` when they never co-vote.
    /// The diagonal is `1`.
    pub fn correlation(&self, a: usize, b: usize) -> f64 {
        if a == b {
            return 1.0;
        }
        self.correlation[pair_index(self.m, a, b)]
    }

    /// Rows where both `a` and `b` voted.
    pub fn joint_count(&self, a: usize, b: usize) -> u64 {
        if a == b {
            return self.count[a];
        }
        self.pair_count[pair_index(self.m, a, b)]
    }
}
