use std::path::PathBuf;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Every way the training run or the inference service can fail.
///
/// An unseen `famhist` category is not an error: it encodes as the reference
/// category.
#[derive(Error, Debug)]
pub enum CardioError {
    #[error("model artifact {path:?} is missing or corrupt: {reason}")]
    ArtifactMissingOrCorrupt { path: PathBuf, reason: String },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("training data error: {0}")]
    TrainingData(String),
    #[error("model fitting failed: {0}")]
    Fit(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<smartcore::error::Failed> for CardioError {
    fn from(e: smartcore::error::Failed) -> Self {
        CardioError::Fit(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CardioError>;
