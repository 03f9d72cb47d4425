//! Seeded synthetic weak-supervision data shared by the labelchain tests.
//!
//! Every generator draws ground truth from the model the label model assumes:
//! a Markov chain of `±1` latent labels, and weak signals that are
//! conditionally independent given their target, each with a fixed accuracy
//! and abstain rate.

use labelchain_core::LabelMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Behaviour of one weak signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSpec {
    /// `P(λ = Y | λ ≠ 0)`.
    pub accuracy: f64,
    /// `P(λ = 0)`.
    pub abstain_rate: f64,
}

impl SignalSpec {
    pub fn new(accuracy: f64, abstain_rate: f64) -> Self {
        Self {
            accuracy,
            abstain_rate,
        }
    }

    /// Never abstains.
    pub fn always(accuracy: f64) -> Self {
        Self::new(accuracy, 0.0)
    }

    fn vote(&self, rng: &mut StdRng, y: i8) -> i8 {
        if self.abstain_rate > 0.0 && rng.random_bool(self.abstain_rate) {
            0
        } else if rng.random_bool(self.accuracy) {
            y
        } else {
            -y
        }
    }
}

/// Synthetic batch together with the labels it was drawn from.
#[derive(Debug, Clone)]
pub struct Synthetic {
    pub batch: LabelMatrix,
    /// Frame-major truth: `truth[r * v + k]` is `Y_k` of row `r`.
    pub truth: Vec<i8>,
}

fn draw_label(rng: &mut StdRng, class_balance: f64) -> i8 {
    if rng.random_bool(class_balance) {
        1
    } else {
        -1
    }
}

/// Single latent per row, every signal voting on it.
pub fn independent(rows: usize, signals: &[SignalSpec], class_balance: f64, seed: u64) -> Synthetic {
    chain(rows, signals, 1, 1.0, class_balance, seed)
}

/// Windows of `v` frames; `per_frame` describes the signals of each frame,
/// wired frame-major. Consecutive labels are equal with probability `stay`.
pub fn chain(
    rows: usize,
    per_frame: &[SignalSpec],
    v: usize,
    stay: f64,
    class_balance: f64,
    seed: u64,
) -> Synthetic {
    let mut rng = StdRng::seed_from_u64(seed);
    let m = per_frame.len() * v;
    let mut data = Vec::with_capacity(rows * m);
    let mut truth = Vec::with_capacity(rows * v);
    for _ in 0..rows {
        let mut y = draw_label(&mut rng, class_balance);
        for frame in 0..v {
            if frame > 0 && !rng.random_bool(stay) {
                y = -y;
            }
            truth.push(y);
            for spec in per_frame {
                data.push(spec.vote(&mut rng, y));
            }
        }
    }
    Synthetic {
        batch: LabelMatrix::new(rows, m, data).expect("generated entries are in {-1, 0, 1}"),
        truth,
    }
}

/// Frame-level stream (one row per frame) of a single long chain, as a
/// sequence batcher would receive it.
pub fn frame_stream(
    frames: usize,
    per_frame: &[SignalSpec],
    stay: f64,
    seed: u64,
) -> Synthetic {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(frames * per_frame.len());
    let mut truth = Vec::with_capacity(frames);
    let mut y = draw_label(&mut rng, 0.5);
    for frame in 0..frames {
        if frame > 0 && !rng.random_bool(stay) {
            y = -y;
        }
        truth.push(y);
        for spec in per_frame {
            data.push(spec.vote(&mut rng, y));
        }
    }
    Synthetic {
        batch: LabelMatrix::new(frames, per_frame.len(), data)
            .expect("generated entries are in {-1, 0, 1}"),
        truth,
    }
}

/// Fraction of positions where `predicted` equals `truth`.
pub fn agreement(predicted: &[i8], truth: &[i8]) -> f64 {
    assert_eq!(predicted.len(), truth.len(), "length mismatch");
    let hits = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();
    hits as f64 / truth.len() as f64
}

/// Majority vote per latent (ties and all-abstain go to `+1`), frame-major.
pub fn majority_vote(batch: &LabelMatrix, m_per_frame: usize) -> Vec<i8> {
    batch
        .iter_rows()
        .flat_map(|row| row.chunks(m_per_frame))
        .map(|frame| {
            let vote: i32 = frame.iter().map(|&x| i32::from(x)).sum();
            if vote < 0 {
                -1
            } else {
                1
            }
        })
        .collect()
}
