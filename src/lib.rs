//! Cardiovascular-disease risk prediction.
//!
//! A training run ([`selection::ModelSelector`]) compares a few candidate
//! pipelines on a stratified split of a clinical table, refits the winner on
//! all rows and stores it as a [`artifact::ModelArtifact`]. The
//! [`inference::InferenceService`] loads that artifact once per process and
//! answers single-record predictions.

pub mod artifact;
pub mod classifier;
pub mod config;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod preprocess;
pub mod rebalance;
pub mod records;
pub mod reducer;
pub mod selection;
pub mod split;

pub use error::{CardioError, Result};

/// Row-major dense features, one `Vec` per record.
pub type FeatureMatrix = Vec<Vec<f64>>;
