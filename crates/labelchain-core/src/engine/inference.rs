//! Exact marginal inference over the latent labels of a fitted graph.
//!
//! Observed values are fixed to the row; abstains drop out of the energy.
//! `λ–λ` factors are constant once both ends are observed and cancel in the
//! normalisation, so each row reduces to an Ising model over the latents with
//! per-latent field
//!
//! ```text
//! h_k = b_k + Σ_{j → k, λ_j ≠ 0} θ_j λ_j
//! ```
//!
//! and the fitted `Y–Y` couplings. Two exact algorithms share that reduction:
//! brute-force enumeration of all `2^v` assignments (streaming log-sum-exp,
//! no allocation per row) and two-pass sum-product on latent forests.
//!
//! ## Feature gating
//!
//! Batched queries run rows in parallel behind the `parallel` feature flag.
//! Rows are independent, so sequential and parallel results are identical.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::VecDeque;

use crate::engine::config::{InferenceStrategy, LabelModelConfig, MAX_ENUMERATED_LATENTS};
use crate::engine::errors::{LabelModelError, Result};
use crate::engine::graph::LabelGraph;
use crate::engine::matrix::{LabelMatrix, ABSTAIN};
use crate::engine::numeric::{field_to_probability, log_sum_exp, pairwise_message};
use crate::engine::params::{EdgeParameter, FittedParameters};

pub(crate) const NO_PARENT: usize = usize::MAX;

/// Algorithm an [`InferenceEngine`] runs, after resolving
/// [`InferenceStrategy::Auto`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceMethod {
    Enumerate,
    TreeMessagePassing,
}

/// Rooted visiting order of a latent forest.
#[derive(Debug, Clone)]
pub(crate) struct TreeSchedule {
    /// Latents in BFS order, roots first within each tree.
    pub(crate) order: Vec<usize>,
    pub(crate) parent: Vec<usize>,
    /// Coupling to the parent; unused for roots.
    pub(crate) parent_theta: Vec<f64>,
}

impl TreeSchedule {
    pub(crate) fn build(num_latents: usize, couplings: &[(usize, usize, f64)]) -> Self {
        let mut adjacency: Vec<SmallVec<[(usize, f64); 4]>> = vec![SmallVec::new(); num_latents];
        for &(p, q, theta) in couplings {
            adjacency[p].push((q, theta));
            adjacency[q].push((p, theta));
        }

        let mut order = Vec::with_capacity(num_latents);
        let mut parent = vec![NO_PARENT; num_latents];
        let mut parent_theta = vec![0.0; num_latents];
        let mut visited = vec![false; num_latents];
        let mut queue = VecDeque::new();
        for root in 0..num_latents {
            if visited[root] {
                continue;
            }
            visited[root] = true;
            queue.push_back(root);
            while let Some(node) = queue.pop_front() {
                order.push(node);
                for &(next, theta) in &adjacency[node] {
                    if !visited[next] {
                        visited[next] = true;
                        parent[next] = node;
                        parent_theta[next] = theta;
                        queue.push_back(next);
                    }
                }
            }
        }

        Self {
            order,
            parent,
            parent_theta,
        }
    }
}

/// Per-thread working buffers.
#[derive(Debug, Clone)]
struct Scratch {
    field: Vec<f64>,
    upward: Vec<f64>,
    message: Vec<f64>,
}

impl Scratch {
    fn new(num_latents: usize) -> Self {
        Self {
            field: vec![0.0; num_latents],
            upward: vec![0.0; num_latents],
            message: vec![0.0; num_latents],
        }
    }
}

/// Read-only view of fitted parameters, laid out for per-row inference.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    num_signals: usize,
    num_latents: usize,
    method: InferenceMethod,
    latent_bias: Vec<f64>,
    /// `(target latent, θ)` of each weak signal's `λ–Y` edge.
    signal_factor: Vec<(usize, f64)>,
    /// `(p, q, θ)` of each `Y–Y` edge.
    couplings: Vec<(usize, usize, f64)>,
    schedule: Option<TreeSchedule>,
}

impl InferenceEngine {
    /// Prepares inference for `params` on `graph`.
    ///
    /// Fails with [`LabelModelError::Structural`] when the configured
    /// strategy cannot run exactly on this graph.
    pub fn new(
        graph: &LabelGraph,
        params: &FittedParameters,
        config: &LabelModelConfig,
    ) -> Result<Self> {
        params.validate_against(graph)?;
        let v = graph.num_latents();
        let method = resolve_method(graph, config)?;

        // Validated above: one parameter per graph edge.
        let edges = params.edges();
        let signal_factor = graph
            .targets()
            .iter()
            .enumerate()
            .map(|(j, &target)| (target, edges[graph.signal_edge(j)].theta))
            .collect();
        let couplings = latent_couplings(graph, edges);
        let schedule = match method {
            InferenceMethod::TreeMessagePassing => Some(TreeSchedule::build(v, &couplings)),
            InferenceMethod::Enumerate => None,
        };

        Ok(Self {
            num_signals: graph.num_signals(),
            num_latents: v,
            method,
            latent_bias: params.latent_biases().to_vec(),
            signal_factor,
            couplings,
            schedule,
        })
    }

    pub fn method(&self) -> InferenceMethod {
        self.method
    }

    pub fn num_latents(&self) -> usize {
        self.num_latents
    }

    /// `P(Y_k = +1 | row)` for every latent of one row.
    pub fn marginals_row(&self, row: &[i8]) -> Result<Vec<f64>> {
        self.check_row(row)?;
        let mut scratch = Scratch::new(self.num_latents);
        let mut out = vec![0.0; self.num_latents];
        self.marginals_into(row, &mut scratch, &mut out);
        Ok(out)
    }

    /// Marginals for every row, frame-major: `out[r * v + k] = P(Y_k = +1 | row r)`.
    pub fn marginals(&self, batch: &LabelMatrix) -> Result<Vec<f64>> {
        self.check_batch(batch)?;
        let v = self.num_latents;
        let mut out = vec![0.0; batch.rows() * v];

        #[cfg(feature = "parallel")]
        out.par_chunks_mut(v)
            .zip(batch.as_slice().par_chunks(self.num_signals))
            .for_each_init(
                || Scratch::new(v),
                |scratch, (dst, row)| self.marginals_into(row, scratch, dst),
            );

        #[cfg(not(feature = "parallel"))]
        {
            let mut scratch = Scratch::new(v);
            for (dst, row) in out.chunks_mut(v).zip(batch.iter_rows()) {
                self.marginals_into(row, &mut scratch, dst);
            }
        }

        Ok(out)
    }

    /// Full posterior over the `2^v` latent assignments of every row.
    ///
    /// Row `r` occupies `out[r * 2^v .. (r + 1) * 2^v]`; bit `k` of an
    /// assignment index set means `Y_k = +1`. Always computed by enumeration.
    pub fn joint(&self, batch: &LabelMatrix) -> Result<Vec<f64>> {
        self.check_batch(batch)?;
        if self.num_latents > MAX_ENUMERATED_LATENTS {
            return Err(LabelModelError::Structural(format!(
                "joint posterior needs enumeration; {} latents exceed the limit of {}",
                self.num_latents, MAX_ENUMERATED_LATENTS
            )));
        }
        let v = self.num_latents;
        let states = 1usize << v;
        let mut out = vec![0.0; batch.rows() * states];

        #[cfg(feature = "parallel")]
        out.par_chunks_mut(states)
            .zip(batch.as_slice().par_chunks(self.num_signals))
            .for_each_init(
                || Scratch::new(v),
                |scratch, (dst, row)| self.joint_into(row, scratch, dst),
            );

        #[cfg(not(feature = "parallel"))]
        {
            let mut scratch = Scratch::new(v);
            for (dst, row) in out.chunks_mut(states).zip(batch.iter_rows()) {
                self.joint_into(row, &mut scratch, dst);
            }
        }

        Ok(out)
    }

    fn check_row(&self, row: &[i8]) -> Result<()> {
        if row.len() != self.num_signals {
            return Err(LabelModelError::Shape(format!(
                "row has {} entries, graph declares {} weak signals",
                row.len(),
                self.num_signals
            )));
        }
        if let Some(j) = row.iter().position(|x| !(-1..=1).contains(x)) {
            return Err(LabelModelError::Shape(format!(
                "entry {} of row is {}, expected -1, 0 or 1",
                j, row[j]
            )));
        }
        Ok(())
    }

    fn check_batch(&self, batch: &LabelMatrix) -> Result<()> {
        if batch.is_empty() {
            return Err(LabelModelError::Shape("batch has no rows".into()));
        }
        if batch.cols() != self.num_signals {
            return Err(LabelModelError::Shape(format!(
                "batch has {} columns, graph declares {} weak signals",
                batch.cols(),
                self.num_signals
            )));
        }
        Ok(())
    }

    fn load_field(&self, row: &[i8], field: &mut [f64]) {
        field.copy_from_slice(&self.latent_bias);
        for (&value, &(target, theta)) in row.iter().zip(&self.signal_factor) {
            if value != ABSTAIN {
                field[target] += theta * f64::from(value);
            }
        }
    }

    fn marginals_into(&self, row: &[i8], scratch: &mut Scratch, out: &mut [f64]) {
        self.load_field(row, &mut scratch.field);
        match &self.schedule {
            Some(schedule) => tree_marginals(schedule, scratch, out),
            None => self.enumerate_marginals(&scratch.field, out),
        }
    }

    /// Unnormalised log-weight of one latent assignment.
    #[inline]
    fn log_weight(&self, assignment: usize, field: &[f64]) -> f64 {
        let spin = |k: usize| if (assignment >> k) & 1 == 1 { 1.0 } else { -1.0 };
        let mut energy = 0.0;
        for (k, &h) in field.iter().enumerate() {
            energy += h * spin(k);
        }
        for &(p, q, theta) in &self.couplings {
            energy += theta * spin(p) * spin(q);
        }
        energy
    }

    fn enumerate_marginals(&self, field: &[f64], out: &mut [f64]) {
        let v = self.num_latents;
        let mut log_z = f64::NEG_INFINITY;
        let mut log_positive = [f64::NEG_INFINITY; MAX_ENUMERATED_LATENTS];
        for assignment in 0..(1usize << v) {
            let weight = self.log_weight(assignment, field);
            log_z = log_sum_exp(log_z, weight);
            for (k, slot) in log_positive.iter_mut().enumerate().take(v) {
                if (assignment >> k) & 1 == 1 {
                    *slot = log_sum_exp(*slot, weight);
                }
            }
        }
        for (dst, &lp) in out.iter_mut().zip(&log_positive[..v]) {
            *dst = (lp - log_z).exp().clamp(0.0, 1.0);
        }
    }

    fn joint_into(&self, row: &[i8], scratch: &mut Scratch, out: &mut [f64]) {
        self.load_field(row, &mut scratch.field);
        let mut log_z = f64::NEG_INFINITY;
        for (assignment, slot) in out.iter_mut().enumerate() {
            let weight = self.log_weight(assignment, &scratch.field);
            *slot = weight;
            log_z = log_sum_exp(log_z, weight);
        }
        for slot in out.iter_mut() {
            *slot = (*slot - log_z).exp();
        }
    }
}

/// `(p, q, θ)` of every `Y–Y` edge, reading `θ` from `edges` in graph order.
pub(crate) fn latent_couplings(
    graph: &LabelGraph,
    edges: &[EdgeParameter],
) -> Vec<(usize, usize, f64)> {
    graph
        .latent_edges()
        .filter_map(|(idx, p, q)| edges.get(idx).map(|param| (p, q, param.theta)))
        .collect()
}

/// Upward then downward sum-product sweep over a latent forest.
fn tree_marginals(schedule: &TreeSchedule, scratch: &mut Scratch, out: &mut [f64]) {
    let Scratch {
        field,
        upward,
        message,
    } = scratch;

    // upward[k]: field of k plus messages from its subtree.
    upward.copy_from_slice(field);
    for &node in schedule.order.iter().rev() {
        let parent = schedule.parent[node];
        if parent == NO_PARENT {
            continue;
        }
        message[node] = pairwise_message(upward[node], schedule.parent_theta[node]);
        upward[parent] += message[node];
    }

    // field[k] becomes the total field: subtree plus message from above.
    for &node in &schedule.order {
        let parent = schedule.parent[node];
        field[node] = if parent == NO_PARENT {
            upward[node]
        } else {
            let cavity = field[parent] - message[node];
            upward[node] + pairwise_message(cavity, schedule.parent_theta[node])
        };
        out[node] = field_to_probability(field[node]);
    }
}

fn resolve_method(graph: &LabelGraph, config: &LabelModelConfig) -> Result<InferenceMethod> {
    let v = graph.num_latents();
    match config.inference {
        InferenceStrategy::Enumerate => {
            if v > MAX_ENUMERATED_LATENTS {
                return Err(LabelModelError::Structural(format!(
                    "cannot enumerate 2^{} latent assignments; the limit is {} latents",
                    v, MAX_ENUMERATED_LATENTS
                )));
            }
            Ok(InferenceMethod::Enumerate)
        }
        InferenceStrategy::TreeMessagePassing => {
            if !graph.is_latent_forest() {
                return Err(LabelModelError::Structural(
                    "tree message passing needs acyclic Y-Y edges".into(),
                ));
            }
            Ok(InferenceMethod::TreeMessagePassing)
        }
        InferenceStrategy::Auto => {
            let method = if v <= config.max_enumerated_latents {
                InferenceMethod::Enumerate
            } else if graph.is_latent_forest() {
                InferenceMethod::TreeMessagePassing
            } else {
                return Err(LabelModelError::Structural(format!(
                    "{} latents exceed the enumeration limit of {} and the Y-Y edges contain a cycle",
                    v, config.max_enumerated_latents
                )));
            };
            #[cfg(feature = "tracing")]
            tracing::debug!(latents = v, method = ?method, "selected inference method");
            Ok(method)
        }
    }
}
