//! # Labelchain Core
//!
//! Sequential weak-supervision label model: estimates calibrated probabilities
//! for latent labels from noisy, abstaining weak signals, without ground truth.

pub mod engine;

// Re-export commonly used types
pub use engine::balance::{AgreementRateBalance, ClassBalanceEstimator, FixedClassBalance};
pub use engine::batcher::{chain_y_edges, frame_major_lambda_y_edges, SequenceBatcher};
pub use engine::calibration::calibrate_latent_biases;
pub use engine::config::{InferenceStrategy, LabelModelConfig, TripletAggregation};
pub use engine::errors::{LabelModelError, Result};
pub use engine::estimator::{AnchorDiagnostics, FitDiagnostics, SignResolution};
pub use engine::graph::{Edge, EdgeKind, LabelGraph, Node, Triplet};
pub use engine::inference::InferenceMethod;
pub use engine::label_model::LabelModel;
pub use engine::matrix::{LabelMatrix, ABSTAIN};
pub use engine::params::{EdgeParameter, FittedParameters};
