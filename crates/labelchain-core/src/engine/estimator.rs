//! Method-of-triplets parameter estimator.
//!
//! Recovers every edge parameter from unlabeled weak-signal outputs only.
//!
//! ## Algorithm
//!
//! For a latent anchor `Y_k` and observed nodes `a`, `b`, `c` that are
//! mutually independent given `Y_k`, the pairwise moments factor as
//! `M_ab = ρ_a ρ_b` (with `ρ_x = E[λ_x Y_k]`), so
//!
//! ```text
//! |ρ_a| = sqrt(M_ab · M_ac / M_bc)
//! ```
//!
//! Relative signs follow from the sign of `M_ab`; one global sign per anchor
//! is fixed from the class balance (when it is informative) or from the
//! convention that weak signals are better than random on average.
//!
//! - `λ–Y`: `θ = atanh ρ_j`.
//! - `Y–Y`: through bridges, `ρ(Y_p, Y_q) = ρ(λ_b, Y_p) / ρ(λ_b, Y_q)` for a
//!   signal `λ_b` targeting `Y_q`.
//! - `λ–λ`: the residual conditional correlation left after the latent path
//!   explains what it can.
//!
//! Zero partner correlations and negative squared magnitudes are clipped to
//! an uninformative estimate, never raised as errors.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::engine::balance::{checked_class_balance, ClassBalanceEstimator, LatentComponent};
use crate::engine::calibration::calibrate_latent_biases;
use crate::engine::config::{LabelModelConfig, TripletAggregation};
use crate::engine::errors::{LabelModelError, Result};
use crate::engine::graph::{EdgeKind, LabelGraph, Node, Triplet};
use crate::engine::matrix::LabelMatrix;
use crate::engine::moments::Moments;
use crate::engine::numeric::{correlation_to_natural, sign_or_positive, DEGENERATE_EPSILON};
use crate::engine::params::{EdgeParameter, FittedParameters};

/// How the global sign of an anchor was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignResolution {
    /// The class balance was informative enough to orient the anchor.
    ClassBalance,
    /// Weak signals were assumed better than random on average.
    BetterThanRandom,
}

/// Per-latent diagnostics of a fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorDiagnostics {
    pub latent: usize,
    /// Class balance of the latent's component.
    pub class_balance: f64,
    pub sign: SignResolution,
    /// Signal all relative signs at this anchor are measured against.
    pub reference_signal: usize,
}

/// Runtime diagnostics emitted by a fit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitDiagnostics {
    /// Rows accumulated.
    pub rows: usize,
    /// Triplets whose moments were evaluated.
    pub triplets_evaluated: usize,
    /// Triplets whose squared magnitude came out negative and was clipped to 0.
    pub clipped_magnitudes: usize,
    /// Triplets or bridges skipped because a divisor correlation was ~0.
    pub degenerate_triplets: usize,
    pub anchors: Vec<AnchorDiagnostics>,
}

/// Fits parameters for `graph` from an unlabeled batch.
///
/// Fails with [`LabelModelError::Shape`] when the batch is empty or its
/// column count differs from the graph's weak-signal count, and with
/// [`LabelModelError::Estimation`] when a weak signal never votes.
pub fn fit_parameters(
    graph: &LabelGraph,
    batch: &LabelMatrix,
    config: LabelModelConfig,
    balance: &dyn ClassBalanceEstimator,
) -> Result<(FittedParameters, FitDiagnostics)> {
    let config = config.validate()?;
    if batch.cols() != graph.num_signals() {
        return Err(LabelModelError::Shape(format!(
            "batch has {} columns, graph declares {} weak signals",
            batch.cols(),
            graph.num_signals()
        )));
    }

    #[cfg(feature = "tracing")]
    tracing::info!(
        rows = batch.rows(),
        signals = graph.num_signals(),
        latents = graph.num_latents(),
        "fitting label model"
    );

    let moments = Moments::from_batch(batch)?;
    moments.require_coverage()?;

    let mut class_balance = Vec::with_capacity(graph.component_count());
    for c in 0..graph.component_count() {
        let latents = graph.component_latents(c);
        let component = LatentComponent::new(c, &latents, graph);
        let p = balance.estimate(batch, &component)?;
        class_balance.push(checked_class_balance(p, c)?);
    }

    let mut solver = TripletSolver {
        graph,
        moments: &moments,
        config,
        diagnostics: FitDiagnostics {
            rows: moments.rows(),
            ..Default::default()
        },
    };

    let mut signal_corr = vec![0.0; graph.num_signals()];
    let mut bridge_corr: FxHashMap<(usize, usize), f64> = FxHashMap::default();
    for k in 0..graph.num_latents() {
        let p = class_balance[graph.latent_component(k)];
        solver.solve_anchor(k, p, &mut signal_corr, &mut bridge_corr);
    }

    let clip = config.correlation_clip;
    let mut latent_corr: FxHashMap<(usize, usize), f64> = FxHashMap::default();
    for (idx, p, q) in graph.latent_edges() {
        let rho = solver.latent_correlation(idx, &signal_corr, &bridge_corr);
        latent_corr.insert((p, q), rho);
        latent_corr.insert((q, p), rho);
    }

    let mut edges = Vec::with_capacity(graph.edges().len());
    for edge in graph.edges() {
        let rho = match (edge.kind, edge.a, edge.b) {
            (EdgeKind::LatentLatent, Node::Latent(p), Node::Latent(q)) => {
                latent_corr.get(&(p, q)).copied().unwrap_or(0.0)
            }
            (EdgeKind::ObservedLatent, Node::Observed(j), _) => signal_corr[j],
            (EdgeKind::ObservedObserved, Node::Observed(a), Node::Observed(b)) => {
                residual_correlation(graph, &moments, &signal_corr, &latent_corr, a, b, clip)
            }
            _ => {
                return Err(LabelModelError::Internal(format!(
                    "edge {} - {} has endpoints inconsistent with its kind",
                    edge.a, edge.b
                )))
            }
        };
        let correlation = if rho == 0.0 { 0.0 } else { rho.clamp(-clip, clip) };
        edges.push(EdgeParameter {
            edge: *edge,
            theta: correlation_to_natural(correlation, clip),
            correlation,
        });
    }

    let latent_bias = calibrate_latent_biases(graph, &edges, &class_balance)?;

    let diagnostics = solver.diagnostics;
    #[cfg(feature = "tracing")]
    tracing::info!(
        edges = edges.len(),
        triplets = diagnostics.triplets_evaluated,
        clipped = diagnostics.clipped_magnitudes,
        degenerate = diagnostics.degenerate_triplets,
        "label model fitted"
    );

    Ok((
        FittedParameters::new(edges, latent_bias, class_balance),
        diagnostics,
    ))
}

/// Closed-form solve over a fixed graph and fixed moments.
struct TripletSolver<'a> {
    graph: &'a LabelGraph,
    moments: &'a Moments,
    config: LabelModelConfig,
    diagnostics: FitDiagnostics,
}

impl TripletSolver<'_> {
    /// `|ρ(members[0], anchor)|` aggregated over `triplets`.
    fn magnitude(&mut self, triplets: &[Triplet]) -> f64 {
        let mut total = 0.0;
        let mut used = 0usize;
        for triplet in triplets.iter().take(self.config.max_triplets_per_node) {
            let [a, b, c] = triplet.members;
            self.diagnostics.triplets_evaluated += 1;
            let m_bc = self.moments.correlation(b, c);
            if m_bc.abs() < DEGENERATE_EPSILON {
                self.diagnostics.degenerate_triplets += 1;
                continue;
            }
            let mut squared = self.moments.correlation(a, b) * self.moments.correlation(a, c) / m_bc;
            if squared < 0.0 {
                self.diagnostics.clipped_magnitudes += 1;
                squared = 0.0;
            }
            total += squared.sqrt().min(1.0);
            used += 1;
            if self.config.aggregation == TripletAggregation::Nearest {
                break;
            }
        }
        if used == 0 {
            0.0
        } else {
            total / used as f64
        }
    }

    /// Sign of `ρ(j, anchor)` relative to `ρ(reference, anchor)`.
    fn relative_sign(&self, anchor: usize, j: usize, reference: usize) -> f64 {
        if j == reference {
            return 1.0;
        }
        let plan = self.graph.anchor(anchor);
        if plan.separated(j, reference) {
            return sign_or_positive(self.moments.correlation(j, reference));
        }
        // Same group as the reference: go through the strongest separated third signal.
        let mut best: Option<(f64, f64)> = None;
        for x in 0..self.graph.num_signals() {
            if !plan.separated(x, j) || !plan.separated(x, reference) {
                continue;
            }
            let m_jx = self.moments.correlation(j, x);
            let m_xr = self.moments.correlation(x, reference);
            let strength = (m_jx * m_xr).abs();
            if best.map_or(true, |(s, _)| strength > s) {
                best = Some((strength, sign_or_positive(m_jx) * sign_or_positive(m_xr)));
            }
        }
        best.map_or(1.0, |(_, sign)| sign)
    }

    /// Recovers signed correlations with `Y_anchor` for its own signals and
    /// for every bridge signal anchored here.
    fn solve_anchor(
        &mut self,
        anchor: usize,
        class_balance: f64,
        signal_corr: &mut [f64],
        bridge_corr: &mut FxHashMap<(usize, usize), f64>,
    ) {
        let graph = self.graph;
        let children = graph.signals_of(anchor);

        let magnitudes: Vec<f64> = children
            .iter()
            .map(|&j| self.magnitude(graph.triplets_for(Node::Observed(j))))
            .collect();

        let mut reference = children[0];
        let mut reference_magnitude = magnitudes[0];
        for (&j, &mag) in children.iter().zip(&magnitudes) {
            if mag > reference_magnitude {
                reference = j;
                reference_magnitude = mag;
            }
        }

        let signs: Vec<f64> = children
            .iter()
            .map(|&j| self.relative_sign(anchor, j, reference))
            .collect();

        let tilt = 2.0 * class_balance - 1.0;
        let balance_score: f64 = children
            .iter()
            .zip(signs.iter().zip(&magnitudes))
            .map(|(&j, (&s, &mag))| self.moments.mean(j) * s * mag * tilt)
            .sum();
        let (global, resolution) = if tilt.abs() >= self.config.sign_balance_threshold
            && balance_score.abs() > DEGENERATE_EPSILON
        {
            (sign_or_positive(balance_score), SignResolution::ClassBalance)
        } else {
            let vote: f64 = signs.iter().zip(&magnitudes).map(|(s, mag)| s * mag).sum();
            (sign_or_positive(vote), SignResolution::BetterThanRandom)
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            latent = anchor,
            class_balance,
            reference,
            sign = ?resolution,
            "resolved anchor sign"
        );

        for ((&j, &s), &mag) in children.iter().zip(&signs).zip(&magnitudes) {
            signal_corr[j] = global * s * mag;
        }

        for (idx, _, _) in graph.latent_edges() {
            for bridge in graph.bridges(idx) {
                if bridge.near != anchor {
                    continue;
                }
                let mag = self.magnitude(&bridge.triplets);
                let sign = self.relative_sign(anchor, bridge.signal, reference);
                bridge_corr.insert((bridge.signal, anchor), global * sign * mag);
            }
        }

        self.diagnostics.anchors.push(AnchorDiagnostics {
            latent: anchor,
            class_balance,
            sign: resolution,
            reference_signal: reference,
        });
    }

    /// `ρ(Y_p, Y_q)` for the latent edge at `edge_index`.
    fn latent_correlation(
        &mut self,
        edge_index: usize,
        signal_corr: &[f64],
        bridge_corr: &FxHashMap<(usize, usize), f64>,
    ) -> f64 {
        let graph = self.graph;
        let mut total = 0.0;
        let mut used = 0usize;
        for bridge in graph.bridges(edge_index) {
            let own = signal_corr[bridge.signal];
            let Some(&through) = bridge_corr.get(&(bridge.signal, bridge.near)) else {
                continue;
            };
            if own.abs() < DEGENERATE_EPSILON {
                self.diagnostics.degenerate_triplets += 1;
                continue;
            }
            total += (through / own).clamp(-1.0, 1.0);
            used += 1;
            if self.config.aggregation == TripletAggregation::Nearest {
                break;
            }
        }
        if used == 0 {
            0.0
        } else {
            total / used as f64
        }
    }
}

/// Conditional correlation of two weak signals beyond their latent targets.
fn residual_correlation(
    graph: &LabelGraph,
    moments: &Moments,
    signal_corr: &[f64],
    latent_corr: &FxHashMap<(usize, usize), f64>,
    a: usize,
    b: usize,
    clip: f64,
) -> f64 {
    let rho_a = signal_corr[a].clamp(-clip, clip);
    let rho_b = signal_corr[b].clamp(-clip, clip);
    let targets = graph.targets();
    let path = latent_path_correlation(graph, latent_corr, targets[a], targets[b]);
    let residual = moments.correlation(a, b) - rho_a * rho_b * path;
    let scale = ((1.0 - rho_a * rho_a) * (1.0 - rho_b * rho_b)).sqrt();
    if scale < DEGENERATE_EPSILON {
        return 0.0;
    }
    residual / scale
}

/// Product of latent edge correlations along the first BFS path from `from`
/// to `to`; `1` when equal, `0` when disconnected.
fn latent_path_correlation(
    graph: &LabelGraph,
    latent_corr: &FxHashMap<(usize, usize), f64>,
    from: usize,
    to: usize,
) -> f64 {
    if from == to {
        return 1.0;
    }
    let v = graph.num_latents();
    let mut parent = vec![usize::MAX; v];
    parent[from] = from;
    let mut queue = VecDeque::from([from]);
    while let Some(node) = queue.pop_front() {
        if node == to {
            break;
        }
        for next in graph.neighbors(Node::Latent(node)) {
            if let Node::Latent(next) = next {
                if parent[next] == usize::MAX {
                    parent[next] = node;
                    queue.push_back(next);
                }
            }
        }
    }
    if parent[to] == usize::MAX {
        return 0.0;
    }
    let mut product = 1.0;
    let mut node = to;
    while node != from {
        let prev = parent[node];
        product *= latent_corr.get(&(prev, node)).copied().unwrap_or(0.0);
        node = prev;
    }
    product
}
