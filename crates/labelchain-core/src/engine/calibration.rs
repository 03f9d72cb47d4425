//! Latent bias calibration.
//!
//! The bias `b = ½ · logit(p)` reproduces the class balance `p` only for an
//! uncoupled latent. With `Y–Y` couplings the prior marginal of a latent (all
//! weak signals abstaining) also feels its neighbours, so the biases are
//! solved jointly: under the latent-only model every latent of component `c`
//! has `P(Y = +1) = p_c`.
//!
//! - **Forests** are solved in closed form. Each edge's 2×2 table is fixed by
//!   its two marginals and the odds ratio `e^{4θ}`; re-expanding the tree
//!   factorisation `P(root) · Π P(child | parent)` as an Ising model gives the
//!   biases directly, with couplings unchanged.
//! - **Cyclic** latent graphs run damped Newton steps on the concave dual
//!   `Σ_k b_k t_k − ln Z(b)` (`t_k = 2 p_k − 1`), with moments by enumeration.

use crate::engine::config::MAX_ENUMERATED_LATENTS;
use crate::engine::errors::{LabelModelError, Result};
use crate::engine::graph::LabelGraph;
use crate::engine::inference::{latent_couplings, TreeSchedule, NO_PARENT};
use crate::engine::numeric::{class_balance_to_bias, log_sum_exp};
use crate::engine::params::EdgeParameter;

/// Largest `|4θ|` used in a pairwise odds ratio. Past it the two latents
/// agree (or disagree) to within f64 resolution.
const MAX_LOG_ODDS_RATIO: f64 = 80.0;

/// Largest `|t_k − E[s_k]|` accepted by the Newton solve.
const NEWTON_TOLERANCE: f64 = 1e-11;

const MAX_NEWTON_STEPS: usize = 100;
const MAX_BACKTRACKS: usize = 40;

/// Rounding slack when comparing dual objectives near the optimum.
const DUAL_SLACK: f64 = 1e-12;

/// Latent biases under which, with every weak signal abstaining, latent `k`
/// has marginal `class_balance[component(k)]`.
///
/// `edges` are parameters in [`LabelGraph::edges`] order; only the `Y–Y`
/// entries are read. Fails with [`LabelModelError::Structural`] for a cyclic
/// latent graph too large to enumerate.
pub fn calibrate_latent_biases(
    graph: &LabelGraph,
    edges: &[EdgeParameter],
    class_balance: &[f64],
) -> Result<Vec<f64>> {
    if edges.len() != graph.edges().len() || class_balance.len() != graph.component_count() {
        return Err(LabelModelError::Shape(format!(
            "calibration needs {} edge parameters and {} class balances, got {} and {}",
            graph.edges().len(),
            graph.component_count(),
            edges.len(),
            class_balance.len()
        )));
    }
    if let Some(c) = class_balance.iter().position(|&p| !(p > 0.0 && p < 1.0)) {
        return Err(LabelModelError::Estimation(format!(
            "class balance of component {} outside (0, 1)",
            c
        )));
    }
    let couplings = latent_couplings(graph, edges);
    if couplings.iter().any(|&(_, _, theta)| !theta.is_finite()) {
        return Err(LabelModelError::Estimation(
            "non-finite Y-Y parameter".into(),
        ));
    }

    let targets: Vec<f64> = (0..graph.num_latents())
        .map(|k| class_balance[graph.latent_component(k)])
        .collect();
    if graph.is_latent_forest() {
        Ok(forest_biases(&targets, &couplings))
    } else if targets.len() <= MAX_ENUMERATED_LATENTS {
        newton_biases(&targets, &couplings)
    } else {
        Err(LabelModelError::Structural(format!(
            "cannot calibrate biases of {} latents with cyclic Y-Y edges; the limit is {}",
            targets.len(),
            MAX_ENUMERATED_LATENTS
        )))
    }
}

fn forest_biases(targets: &[f64], couplings: &[(usize, usize, f64)]) -> Vec<f64> {
    let schedule = TreeSchedule::build(targets.len(), couplings);
    let mut bias = vec![0.0; targets.len()];
    for &node in &schedule.order {
        let parent = schedule.parent[node];
        if parent == NO_PARENT {
            bias[node] += class_balance_to_bias(targets[node]);
            continue;
        }
        let (to_child, to_parent) =
            conditional_fields(targets[parent], targets[node], schedule.parent_theta[node]);
        bias[node] += to_child;
        bias[parent] += to_parent;
    }
    bias
}

/// Field terms of `ln P(s_child | s_parent)` for a pair with
/// `P(s_parent = +1) = x`, `P(s_child = +1) = y` and coupling `θ`, as
/// `(child field, parent field)`. The pairwise term is `θ` by construction.
fn conditional_fields(x: f64, y: f64, theta: f64) -> (f64, f64) {
    let log_odds = (4.0 * theta).clamp(-MAX_LOG_ODDS_RATIO, MAX_LOG_ODDS_RATIO);
    let pp = concordant_cell(x, y, log_odds).ln();
    let pm = concordant_cell(x, 1.0 - y, -log_odds).ln();
    let mp = concordant_cell(1.0 - x, y, -log_odds).ln();
    let mm = concordant_cell(1.0 - x, 1.0 - y, log_odds).ln();
    let child = 0.25 * (pp - pm + mp - mm);
    let parent = 0.25 * (pp + pm - mp - mm) - class_balance_to_bias(x);
    (child, parent)
}

/// `P(+, +)` of the 2×2 table with row margin `x`, column margin `y` and
/// log odds ratio `log_odds`.
///
/// The cell solves `(R − 1) n² − (1 + (R − 1)(x + y)) n + R x y = 0`; the
/// branch is picked so neither form cancels.
fn concordant_cell(x: f64, y: f64, log_odds: f64) -> f64 {
    let r = log_odds.exp();
    let a = r - 1.0;
    let b = 1.0 + a * (x + y);
    let c = r * x * y;
    let root = (b * b - 4.0 * a * c).max(0.0).sqrt();
    let cell = if b >= 0.0 {
        2.0 * c / (b + root)
    } else {
        (b - root) / (2.0 * a)
    };
    cell.max(f64::MIN_POSITIVE)
}

/// Partition function, spin means and covariance of the latent-only model.
struct PriorMoments {
    log_z: f64,
    mean: Vec<f64>,
    /// Row-major `v × v`.
    covariance: Vec<f64>,
}

impl PriorMoments {
    fn enumerate(bias: &[f64], couplings: &[(usize, usize, f64)]) -> Self {
        let v = bias.len();
        let spin = |assignment: usize, k: usize| {
            if (assignment >> k) & 1 == 1 {
                1.0
            } else {
                -1.0
            }
        };
        let energies: Vec<f64> = (0..1usize << v)
            .map(|assignment| {
                let field: f64 = bias
                    .iter()
                    .enumerate()
                    .map(|(k, b)| b * spin(assignment, k))
                    .sum();
                let pairs: f64 = couplings
                    .iter()
                    .map(|&(p, q, theta)| theta * spin(assignment, p) * spin(assignment, q))
                    .sum();
                field + pairs
            })
            .collect();
        let log_z = energies
            .iter()
            .fold(f64::NEG_INFINITY, |acc, &e| log_sum_exp(acc, e));

        let mut mean = vec![0.0; v];
        let mut covariance = vec![0.0; v * v];
        for (assignment, &energy) in energies.iter().enumerate() {
            let weight = (energy - log_z).exp();
            for k in 0..v {
                let sk = spin(assignment, k);
                mean[k] += weight * sk;
                for l in 0..v {
                    covariance[k * v + l] += weight * sk * spin(assignment, l);
                }
            }
        }
        for k in 0..v {
            for l in 0..v {
                covariance[k * v + l] -= mean[k] * mean[l];
            }
        }
        Self {
            log_z,
            mean,
            covariance,
        }
    }

    fn dual(&self, bias: &[f64], spin_targets: &[f64]) -> f64 {
        bias.iter()
            .zip(spin_targets)
            .map(|(b, t)| b * t)
            .sum::<f64>()
            - self.log_z
    }
}

fn newton_biases(targets: &[f64], couplings: &[(usize, usize, f64)]) -> Result<Vec<f64>> {
    let v = targets.len();
    let spin_targets: Vec<f64> = targets.iter().map(|&p| 2.0 * p - 1.0).collect();
    let mut bias: Vec<f64> = targets.iter().map(|&p| class_balance_to_bias(p)).collect();
    let mut prior = PriorMoments::enumerate(&bias, couplings);

    for _step in 0..MAX_NEWTON_STEPS {
        let gradient: Vec<f64> = spin_targets
            .iter()
            .zip(&prior.mean)
            .map(|(t, m)| t - m)
            .collect();
        if gradient.iter().all(|g| g.abs() < NEWTON_TOLERANCE) {
            #[cfg(feature = "tracing")]
            tracing::debug!(latents = v, steps = _step, "calibrated latent biases");
            return Ok(bias);
        }
        let direction = cholesky_solve(&prior.covariance, &gradient, v).ok_or_else(|| {
            LabelModelError::Estimation(
                "latent prior covariance is singular; Y-Y couplings too strong to calibrate"
                    .into(),
            )
        })?;

        let current = prior.dual(&bias, &spin_targets);
        let mut scale = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let trial: Vec<f64> = bias
                .iter()
                .zip(&direction)
                .map(|(b, d)| b + scale * d)
                .collect();
            let moments = PriorMoments::enumerate(&trial, couplings);
            if moments.dual(&trial, &spin_targets) >= current - DUAL_SLACK {
                accepted = Some((trial, moments));
                break;
            }
            scale *= 0.5;
        }
        match accepted {
            Some((trial, moments)) => {
                bias = trial;
                prior = moments;
            }
            None => break,
        }
    }

    Err(LabelModelError::Estimation(format!(
        "latent bias calibration did not converge within {} Newton steps",
        MAX_NEWTON_STEPS
    )))
}

/// Solves `A x = rhs` for symmetric positive definite `A` (row-major `n × n`).
/// `None` when `A` is not numerically positive definite.
fn cholesky_solve(matrix: &[f64], rhs: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut lower = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[i * n + j];
            for k in 0..j {
                sum -= lower[i * n + k] * lower[j * n + k];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                lower[i * n + i] = sum.sqrt();
            } else {
                lower[i * n + j] = sum / lower[j * n + j];
            }
        }
    }

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = rhs[i];
        for k in 0..i {
            sum -= lower[i * n + k] * y[k];
        }
        y[i] = sum / lower[i * n + i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= lower[k * n + i] * x[k];
        }
        x[i] = sum / lower[i * n + i];
    }
    Some(x)
}
