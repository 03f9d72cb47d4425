//! Error types for label model construction, fitting and inference.

use thiserror::Error;

/// Errors that can occur while building a graph, fitting parameters, or
/// running inference.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// without breaking changes. All public APIs return `Result<T, LabelModelError>`
/// so library code never panics on bad input.
///
/// Numerical degeneracies (a zero correlation, a negative squared magnitude
/// under sampling noise) are not errors: they are clipped locally to an
/// uninformative parameter.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LabelModelError {
    /// Graph construction violates an index-range, coverage or
    /// triplet-decomposability invariant.
    #[error("structural error: {0}")]
    Structural(String),

    /// Input matrix dimensions don't match the graph, the batch is empty, or an
    /// entry lies outside `{-1, 0, +1}`.
    #[error("shape error: {0}")]
    Shape(String),

    /// A node has no usable data to estimate from (e.g., an always-abstaining
    /// weak signal), or a class-balance strategy produced an unusable value.
    #[error("estimation error: {0}")]
    Estimation(String),

    /// A configuration field is out of range.
    #[error("config error: {0}")]
    Config(String),

    /// Inference or a parameter query was requested before a successful fit.
    #[error("label model has not been fitted")]
    NotFitted,

    /// Internal error (programmer error, not user error).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LabelModelError>;
