//! Scalar numeric kernels shared by the estimator and the inference engine.
//!
//! All parameters live in natural (Ising) units: a pairwise term contributes
//! `θ · s_p · s_q` and a bias contributes `b · s_k` to the log-potential of a
//! `±1` assignment. The helpers below convert between those units and the
//! correlation / probability scales the estimator works in.

/// Smallest probability ever reported by inference.
pub const MIN_PROBABILITY: f64 = 1e-12;

/// Magnitudes below this are treated as an exact zero when dividing.
pub const DEGENERATE_EPSILON: f64 = 1e-9;

/// Converts a `±1` pairwise correlation into its natural parameter.
///
/// For an isolated pair `P(s_p, s_q) ∝ exp(θ s_p s_q)` we have
/// `E[s_p s_q] = tanh θ`, so `θ = atanh ρ`. The correlation is clamped to
/// `[-clip, clip]` first. An exact zero correlation maps to `θ = 0`.
pub fn correlation_to_natural(correlation: f64, clip: f64) -> f64 {
    if correlation == 0.0 || !correlation.is_finite() {
        return 0.0;
    }
    correlation.clamp(-clip, clip).atanh()
}

/// Inverse of [`correlation_to_natural`].
#[inline]
pub fn natural_to_correlation(theta: f64) -> f64 {
    theta.tanh()
}

/// Natural bias for a latent with `P(Y = +1) = p`: `b = ½ · logit(p)`.
pub fn class_balance_to_bias(p: f64) -> f64 {
    let p = p.clamp(MIN_PROBABILITY, 1.0 - MIN_PROBABILITY);
    0.5 * (p / (1.0 - p)).ln()
}

/// `P(s = +1)` for a binary spin with effective field `h`: `σ(2h)`.
#[inline]
pub fn field_to_probability(h: f64) -> f64 {
    sigmoid(2.0 * h)
}

/// Numerically stable logistic function.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `ln cosh x` without overflow for large `|x|`.
#[inline]
pub fn log_cosh(x: f64) -> f64 {
    let a = x.abs();
    a + (-2.0 * a).exp().ln_1p() - std::f64::consts::LN_2
}

#[inline]
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    if !m.is_finite() {
        return m;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// Cavity message of a pairwise Ising factor, in field units.
///
/// A spin with cavity field `h` coupled by `θ` to a neighbour contributes
/// `μ · s` to that neighbour's log-potential, with
/// `μ = ½ (ln cosh(h + θ) − ln cosh(h − θ))`, equivalently
/// `atanh(tanh θ · tanh h)`.
#[inline]
pub fn pairwise_message(h: f64, theta: f64) -> f64 {
    0.5 * (log_cosh(h + theta) - log_cosh(h - theta))
}

/// Sign with zero mapped to `+1`.
#[inline]
pub fn sign_or_positive(x: f64) -> f64 {
    if x < 0.0 {
        -1.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(lhs: f64, rhs: f64, eps: f64) {
        assert!(
            (lhs - rhs).abs() <= eps,
            "difference too large: |{} - {}| = {} (eps={})",
            lhs,
            rhs,
            (lhs - rhs).abs(),
            eps
        );
    }

    #[test]
    fn zero_correlation_is_uninformative() {
        assert_eq!(correlation_to_natural(0.0, 0.999), 0.0);
        assert_eq!(correlation_to_natural(f64::NAN, 0.999), 0.0);
    }

    #[test]
    fn correlation_round_trips_through_natural_parameter() {
        for &rho in &[-0.95, -0.4, 0.1, 0.6, 0.8] {
            let theta = correlation_to_natural(rho, 0.999);
            assert_close(natural_to_correlation(theta), rho, 1e-12);
        }
    }

    #[test]
    fn correlation_is_clipped_before_transform() {
        let theta = correlation_to_natural(1.0, 0.99);
        assert!(theta.is_finite());
        assert_close(theta, 0.99_f64.atanh(), 1e-12);
    }

    #[test]
    fn bias_matches_class_balance() {
        for &p in &[0.1, 0.5, 0.73] {
            let b = class_balance_to_bias(p);
            assert_close(field_to_probability(b), p, 1e-12);
        }
        assert_eq!(class_balance_to_bias(0.5), 0.0);
    }

    #[test]
    fn log_cosh_is_stable_for_large_inputs() {
        assert_close(log_cosh(0.0), 0.0, 1e-15);
        assert_close(log_cosh(1.3), 1.3_f64.cosh().ln(), 1e-12);
        assert!(log_cosh(1e6).is_finite());
        assert_close(log_cosh(-800.0), 800.0 - std::f64::consts::LN_2, 1e-9);
    }

    #[test]
    fn pairwise_message_matches_closed_form() {
        for &(h, theta) in &[(0.3_f64, 0.5_f64), (-1.2, 0.8), (2.0, -0.4)] {
            let expected = (theta.tanh() * h.tanh()).atanh();
            assert_close(pairwise_message(h, theta), expected, 1e-12);
        }
        assert!(pairwise_message(1e4, 1e4).is_finite());
    }

    #[test]
    fn sigmoid_is_symmetric() {
        for &x in &[0.0, 0.7, 35.0, 900.0] {
            assert_close(sigmoid(x) + sigmoid(-x), 1.0, 1e-15);
        }
    }
}
