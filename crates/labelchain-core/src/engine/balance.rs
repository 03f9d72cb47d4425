//! Pluggable class-balance strategies.
//!
//! The triplet method recovers each accuracy only up to one sign per latent
//! anchor. The class balance `P(Y = +1)` of the anchor's latent component
//! breaks that symmetry, and also sets the latent bias used at inference.
//! Strategies map a batch (restricted to one latent component) to a scalar in
//! the open interval `(0, 1)`.

use std::fmt;

use crate::engine::errors::{LabelModelError, Result};
use crate::engine::graph::LabelGraph;
use crate::engine::matrix::LabelMatrix;

/// One connected component of latent variables, as seen by a strategy.
#[derive(Debug, Clone, Copy)]
pub struct LatentComponent<'a> {
    pub index: usize,
    pub latents: &'a [usize],
    graph: &'a LabelGraph,
}

impl<'a> LatentComponent<'a> {
    pub(crate) fn new(index: usize, latents: &'a [usize], graph: &'a LabelGraph) -> Self {
        Self {
            index,
            latents,
            graph,
        }
    }

    /// `(latent, signals targeting it)` for every latent of the component.
    pub fn signals(&self) -> impl Iterator<Item = (usize, &'a [usize])> + '_ {
        let graph = self.graph;
        self.latents.iter().map(move |&k| (k, graph.signals_of(k)))
    }
}

/// Strategy estimating `P(Y = +1)` for a latent component.
pub trait ClassBalanceEstimator: fmt::Debug + Send + Sync {
    fn estimate(&self, batch: &LabelMatrix, component: &LatentComponent<'_>) -> Result<f64>;
}

/// Majority-vote agreement heuristic.
///
/// For every row and every latent in the component, the signals targeting
/// that latent vote; the class balance is the Laplace-smoothed fraction of
/// decided votes that came out positive. Ties and all-abstain rows are not
/// counted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AgreementRateBalance;

impl ClassBalanceEstimator for AgreementRateBalance {
    fn estimate(&self, batch: &LabelMatrix, component: &LatentComponent<'_>) -> Result<f64> {
        let mut positive = 0u64;
        let mut negative = 0u64;
        for row in batch.iter_rows() {
            for (_, signals) in component.signals() {
                let vote: i64 = signals.iter().map(|&j| i64::from(row[j])).sum();
                match vote.signum() {
                    1 => positive += 1,
                    -1 => negative += 1,
                    _ => {}
                }
            }
        }
        Ok((positive as f64 + 1.0) / ((positive + negative) as f64 + 2.0))
    }
}

/// Externally supplied class balance, shared by every component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedClassBalance {
    p: f64,
}

impl FixedClassBalance {
    pub fn new(p: f64) -> Result<Self> {
        if !(p > 0.0 && p < 1.0) {
            return Err(LabelModelError::Config(format!(
                "fixed class balance must lie in (0, 1), got {}",
                p
            )));
        }
        Ok(Self { p })
    }

    pub fn value(&self) -> f64 {
        self.p
    }
}

impl ClassBalanceEstimator for FixedClassBalance {
    fn estimate(&self, _batch: &LabelMatrix, _component: &LatentComponent<'_>) -> Result<f64> {
        Ok(self.p)
    }
}

/// Validates a strategy's output.
pub(crate) fn checked_class_balance(p: f64, component: usize) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(LabelModelError::Estimation(format!(
            "class balance for latent component {} must lie in (0, 1), got {}",
            component, p
        )));
    }
    Ok(p)
}
