//! Sequence batcher: reshapes per-frame weak-signal outputs into windows.
//!
//! A flat `(n_frames, m_per_frame)` matrix becomes a
//! `(n_frames / v, v * m_per_frame)` matrix whose rows are frame-major
//! concatenations: frame 0's signals first, then frame 1's, and so on. Weak
//! signal column `j` of a window therefore belongs to frame `j / m_per_frame`,
//! which is exactly the wiring produced by [`frame_major_lambda_y_edges`].
//!
//! Trailing frames that don't fill a complete window are dropped.

use crate::engine::errors::{LabelModelError, Result};
use crate::engine::matrix::LabelMatrix;

/// Reshapes frame-level label matrices into fixed-length windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceBatcher {
    window: usize,
}

impl SequenceBatcher {
    /// Creates a batcher for windows of `v` frames.
    pub fn new(v: usize) -> Result<Self> {
        if v == 0 {
            return Err(LabelModelError::Shape(
                "sequence window length must be at least 1".into(),
            ));
        }
        Ok(Self { window: v })
    }

    /// Window length `v`.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of complete windows in `n_frames` frames.
    pub fn window_count(&self, n_frames: usize) -> usize {
        n_frames / self.window
    }

    /// Number of trailing frames that [`Self::batch`] drops.
    pub fn dropped_frames(&self, n_frames: usize) -> usize {
        n_frames % self.window
    }

    /// Reshapes a frame matrix into windows.
    ///
    /// The result has `frames.rows() / v` rows and `v * frames.cols()` columns.
    /// When fewer than `v` frames are present the result has zero rows.
    pub fn batch(&self, frames: &LabelMatrix) -> LabelMatrix {
        let windows = self.window_count(frames.rows());
        let cols = self.window * frames.cols();
        self.log_dropped(frames.rows());
        // Row-major storage means a frame-major window is a contiguous run of
        // `v` frame rows: copy the complete windows and reinterpret the shape.
        LabelMatrix::reshaped(windows, cols, frames.as_slice()[..windows * cols].to_vec())
    }

    /// Owned variant of [`Self::batch`] that reuses the frame buffer.
    pub fn batch_owned(&self, frames: LabelMatrix) -> LabelMatrix {
        let windows = self.window_count(frames.rows());
        let cols = self.window * frames.cols();
        self.log_dropped(frames.rows());
        LabelMatrix::reshaped(windows, cols, frames.into_vec())
    }

    fn log_dropped(&self, n_frames: usize) {
        let dropped = self.dropped_frames(n_frames);
        if dropped > 0 {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                dropped,
                window = self.window,
                "sequence batcher dropped trailing frames"
            );
        }
    }
}

/// `λ–Y` edges for frame-major windows: signal `j` targets `Y_{j / m_per_frame}`.
pub fn frame_major_lambda_y_edges(m_per_frame: usize, v: usize) -> Vec<(usize, usize)> {
    (0..m_per_frame * v)
        .map(|j| (j, j / m_per_frame.max(1)))
        .collect()
}

/// `Y–Y` edges of a temporal chain `Y_0 – Y_1 – … – Y_{v-1}`.
pub fn chain_y_edges(v: usize) -> Vec<(usize, usize)> {
    (1..v).map(|i| (i - 1, i)).collect()
}
