//! Tunables for fitting and inference.

use crate::engine::errors::{LabelModelError, Result};
use crate::engine::graph::MAX_CACHED_TRIPLETS;

/// Hard upper bound on latents handled by brute-force enumeration.
pub const MAX_ENUMERATED_LATENTS: usize = 20;

/// How estimates of one correlation from several triplets are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TripletAggregation {
    /// Average every valid triplet (and every bridge) estimate.
    #[default]
    Mean,
    /// Keep only the nearest valid triplet (and nearest bridge).
    Nearest,
}

/// Exact marginal inference algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceStrategy {
    /// Enumerate when `v <= max_enumerated_latents`, otherwise tree message
    /// passing when the latents form a forest.
    #[default]
    Auto,
    /// Enumerate all `2^v` latent assignments.
    Enumerate,
    /// Sum-product on the latent forest.
    TreeMessagePassing,
}

/// Configuration for [`crate::LabelModel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelModelConfig {
    /// Combination rule when a correlation is reachable from several triplets.
    pub aggregation: TripletAggregation,
    /// Cap on triplets evaluated per recovered correlation.
    pub max_triplets_per_node: usize,
    /// Minimum `|2p - 1|` for the class balance to decide an anchor's sign.
    /// Below it, weak signals are assumed better than random on average.
    pub sign_balance_threshold: f64,
    /// Recovered correlations are clamped to `[-clip, clip]` before the
    /// log-odds transform.
    pub correlation_clip: f64,
    /// Marginal inference algorithm.
    pub inference: InferenceStrategy,
    /// Largest `v` enumerated under [`InferenceStrategy::Auto`].
    pub max_enumerated_latents: usize,
}

impl Default for LabelModelConfig {
    fn default() -> Self {
        Self {
            aggregation: TripletAggregation::Mean,
            max_triplets_per_node: 16,
            sign_balance_threshold: 0.1,
            correlation_clip: 0.999,
            inference: InferenceStrategy::Auto,
            max_enumerated_latents: 12,
        }
    }
}

impl LabelModelConfig {
    pub fn validate(self) -> Result<Self> {
        if self.max_triplets_per_node == 0 || self.max_triplets_per_node > MAX_CACHED_TRIPLETS {
            return Err(LabelModelError::Config(format!(
                "max_triplets_per_node must be in [1, {}]",
                MAX_CACHED_TRIPLETS
            )));
        }
        if !(0.0..=1.0).contains(&self.sign_balance_threshold) {
            return Err(LabelModelError::Config(
                "sign_balance_threshold must be in [0, 1]".into(),
            ));
        }
        if !(self.correlation_clip > 0.0 && self.correlation_clip < 1.0) {
            return Err(LabelModelError::Config(
                "correlation_clip must be in (0, 1)".into(),
            ));
        }
        if self.max_enumerated_latents == 0 || self.max_enumerated_latents > MAX_ENUMERATED_LATENTS
        {
            return Err(LabelModelError::Config(format!(
                "max_enumerated_latents must be in [1, {}]",
                MAX_ENUMERATED_LATENTS
            )));
        }
        Ok(self)
    }
}
