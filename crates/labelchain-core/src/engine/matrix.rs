//! Dense label matrix of weak-signal outputs.
//!
//! Rows are items (or sequence windows), columns are weak signals. Entries are
//! `+1`, `-1`, or [`ABSTAIN`] (`0`). Storage is a single row-major `Vec<i8>`
//! so windows can be formed by reinterpreting the shape without copying.

use crate::engine::errors::{LabelModelError, Result};

/// Value of a weak signal that produced no output.
pub const ABSTAIN: i8 = 0;

/// Row-major `rows × cols` matrix with entries in `{-1, 0, +1}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatrix {
    rows: usize,
    cols: usize,
    data: Vec<i8>,
}

impl LabelMatrix {
    /// Builds a matrix from flat row-major data.
    ///
    /// Fails with [`LabelModelError::Shape`] when `data.len() != rows * cols`,
    /// when `cols == 0`, or when an entry lies outside `{-1, 0, +1}`.
    pub fn new(rows: usize, cols: usize, data: Vec<i8>) -> Result<Self> {
        if cols == 0 {
            return Err(LabelModelError::Shape(
                "label matrix must have at least one column".into(),
            ));
        }
        let expected = rows.checked_mul(cols).ok_or_else(|| {
            LabelModelError::Shape(format!("label matrix {}x{} overflows usize", rows, cols))
        })?;
        if data.len() != expected {
            return Err(LabelModelError::Shape(format!(
                "label matrix {}x{} needs {} entries, got {}",
                rows,
                cols,
                expected,
                data.len()
            )));
        }
        if let Some(pos) = data.iter().position(|&x| !(-1..=1).contains(&x)) {
            return Err(LabelModelError::Shape(format!(
                "label matrix entry ({}, {}) = {} must be -1, 0, or +1",
                pos / cols,
                pos % cols,
                data[pos]
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Builds a matrix from nested rows. All rows must have the same length.
    pub fn from_rows<R: AsRef<[i8]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map(|r| r.as_ref().len()).ok_or_else(|| {
            LabelModelError::Shape("cannot infer column count from zero rows".into())
        })?;
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (idx, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(LabelModelError::Shape(format!(
                    "row {} has {} columns, expected {}",
                    idx,
                    row.len(),
                    cols
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(rows.len(), cols, data)
    }

    /// Shape-only constructor for internal reshapes of already-validated data.
    pub(crate) fn reshaped(rows: usize, cols: usize, mut data: Vec<i8>) -> Self {
        data.truncate(rows * cols);
        Self { rows, cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Flat row-major storage.
    pub fn as_slice(&self) -> &[i8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<i8> {
        self.data
    }

    /// Returns row `idx`, or `None` when out of range.
    pub fn row(&self, idx: usize) -> Option<&[i8]> {
        if idx >= self.rows {
            return None;
        }
        let start = idx * self.cols;
        Some(&self.data[start..start + self.cols])
    }

    /// Iterates rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[i8]> + '_ {
        self.data.chunks_exact(self.cols)
    }

    /// Fraction of rows where each column did not abstain.
    pub fn coverage(&self) -> Vec<f64> {
        let mut counts = vec![0usize; self.cols];
        for row in self.iter_rows() {
            for (count, &value) in counts.iter_mut().zip(row) {
                if value != ABSTAIN {
                    *count += 1;
                }
            }
        }
        let n = self.rows.max(1) as f64;
        counts.into_iter().map(|c| c as f64 / n).collect()
    }
}
