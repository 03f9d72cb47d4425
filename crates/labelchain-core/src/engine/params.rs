//! Fitted parameters of the pairwise exponential-family label model.
//!
//! The joint log-potential of a `±1` assignment `s` is
//! `Σ_edges θ_pq · s_p · s_q + Σ_latents b_k · s_k`. Parameters are produced
//! once per fit and never mutated afterwards; inference only reads them.

use crate::engine::calibration::calibrate_latent_biases;
use crate::engine::errors::{LabelModelError, Result};
use crate::engine::graph::{Edge, LabelGraph, Node};
use crate::engine::numeric::natural_to_correlation;

/// Natural parameter of one edge, with the correlation it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeParameter {
    pub edge: Edge,
    /// Natural (log-odds) parameter `θ`.
    pub theta: f64,
    /// Recovered signed correlation, after clipping.
    pub correlation: f64,
}

impl EdgeParameter {
    /// Builds a parameter from `θ` alone; the correlation is `tanh θ`.
    pub fn from_theta(edge: Edge, theta: f64) -> Self {
        Self {
            edge,
            theta,
            correlation: natural_to_correlation(theta),
        }
    }
}

/// Complete parameter set: one entry per graph edge (in graph order), one
/// bias per latent, one class balance per latent component.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FittedParameters {
    edges: Vec<EdgeParameter>,
    latent_bias: Vec<f64>,
    class_balance: Vec<f64>,
}

impl FittedParameters {
    pub fn new(edges: Vec<EdgeParameter>, latent_bias: Vec<f64>, class_balance: Vec<f64>) -> Self {
        Self {
            edges,
            latent_bias,
            class_balance,
        }
    }

    /// Builds a parameter set whose latent biases are calibrated so that,
    /// with every weak signal abstaining, each latent's marginal equals its
    /// component's class balance.
    pub fn calibrated(
        graph: &LabelGraph,
        edges: Vec<EdgeParameter>,
        class_balance: Vec<f64>,
    ) -> Result<Self> {
        let latent_bias = calibrate_latent_biases(graph, &edges, &class_balance)?;
        Ok(Self::new(edges, latent_bias, class_balance))
    }

    /// Edge parameters in the order of [`LabelGraph::edges`].
    pub fn edges(&self) -> &[EdgeParameter] {
        &self.edges
    }

    /// `θ` of the edge at `edge_index`, or `None` past the last edge.
    pub fn theta(&self, edge_index: usize) -> Option<f64> {
        self.edges.get(edge_index).map(|param| param.theta)
    }

    /// Bias `b_k` of latent `k`.
    pub fn latent_bias(&self, latent: usize) -> Option<f64> {
        self.latent_bias.get(latent).copied()
    }

    pub fn latent_biases(&self) -> &[f64] {
        &self.latent_bias
    }

    /// `P(Y = +1)` of latent component `c`.
    pub fn class_balance(&self, component: usize) -> Option<f64> {
        self.class_balance.get(component).copied()
    }

    pub fn class_balances(&self) -> &[f64] {
        &self.class_balance
    }

    /// `P(λ_j = Y_target | λ_j ≠ 0) = (1 + ρ_j) / 2` for every weak signal.
    ///
    /// Signals whose edge these parameters don't cover (a foreign `graph`)
    /// report `0.5`.
    pub fn accuracies(&self, graph: &LabelGraph) -> Vec<f64> {
        (0..graph.num_signals())
            .map(|j| {
                let rho = self
                    .theta(graph.signal_edge(j))
                    .map_or(0.0, natural_to_correlation);
                0.5 * (1.0 + rho)
            })
            .collect()
    }

    /// Checks that this parameter set belongs to `graph` and is finite.
    pub fn validate_against(&self, graph: &LabelGraph) -> Result<()> {
        if self.edges.len() != graph.edges().len()
            || self.latent_bias.len() != graph.num_latents()
            || self.class_balance.len() != graph.component_count()
        {
            return Err(LabelModelError::Shape(format!(
                "parameters cover {} edges / {} latents / {} components, graph has {} / {} / {}",
                self.edges.len(),
                self.latent_bias.len(),
                self.class_balance.len(),
                graph.edges().len(),
                graph.num_latents(),
                graph.component_count()
            )));
        }
        for (idx, (param, edge)) in self.edges.iter().zip(graph.edges()).enumerate() {
            if param.edge != *edge {
                return Err(LabelModelError::Structural(format!(
                    "parameter {} is for edge {} - {}, graph has {} - {}",
                    idx, param.edge.a, param.edge.b, edge.a, edge.b
                )));
            }
            if !param.theta.is_finite() {
                return Err(LabelModelError::Estimation(format!(
                    "non-finite parameter on edge {} - {}",
                    edge.a, edge.b
                )));
            }
        }
        if let Some(k) = self.latent_bias.iter().position(|b| !b.is_finite()) {
            return Err(LabelModelError::Estimation(format!(
                "non-finite bias on {}",
                Node::Latent(k)
            )));
        }
        if let Some(c) = self
            .class_balance
            .iter()
            .position(|&p| !(p > 0.0 && p < 1.0))
        {
            return Err(LabelModelError::Estimation(format!(
                "class balance of component {} outside (0, 1)",
                c
            )));
        }
        Ok(())
    }
}
