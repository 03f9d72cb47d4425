//! The label model engine.
//!
//! This module provides:
//! - **graph**: Dependency-graph declaration, validation and triplet planning
//! - **batcher**: Reshaping frame-level label matrices into sequence windows
//! - **moments**: Empirical first and second moments of weak-signal outputs
//! - **estimator**: Method-of-triplets parameter recovery
//! - **calibration**: Latent biases that reproduce the class balance a priori
//! - **inference**: Exact marginal and joint posteriors over latent labels
//! - **label_model**: The fit / predict facade tying the pieces together

pub mod balance;
pub mod batcher;
pub mod calibration;
pub mod config;
pub mod errors;
pub mod estimator;
pub mod graph;
pub mod inference;
pub mod label_model;
pub mod matrix;
pub mod moments;
pub mod numeric;
pub mod params;
