//! Integration tests module that includes all integration test files.

#[path = "integration/estimation_tests.rs"]
mod estimation_tests;

#[path = "integration/sequence_tests.rs"]
mod sequence_tests;

#[path = "integration/error_tests.rs"]
mod error_tests;
