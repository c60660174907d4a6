//! Serving predictions from a persisted artifact.
//!
//! Artifacts are loaded at most once per process and path, then shared
//! read-only between every service built on them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use lazy_static::lazy_static;
use log::{debug, info};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::artifact::ModelArtifact;
use crate::records::{conform_features, records_to_frame, ClinicalRecord, FEATURE_COLUMNS};
use crate::{CardioError, Result};

lazy_static! {
    static ref LOADED: Mutex<HashMap<PathBuf, Arc<ModelArtifact>>> = Mutex::new(HashMap::new());
}

/// Coarse reading of the disease probability, for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBand {
    Low,
    Moderate,
    High,
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Moderate => write!(f, "moderate"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// 1 when coronary heart disease is predicted.
    pub label: i32,
    /// `[P(class 0), P(class 1)]`
    pub probabilities: [f64; 2],
}

impl Prediction {
    fn from_probabilities(probabilities: [f64; 2]) -> Self {
        Self {
            label: i32::from(probabilities[1] > 0.5),
            probabilities,
        }
    }

    pub fn disease_probability(&self) -> f64 {
        self.probabilities[1]
    }

    /// Below 30 % is low, below 60 % moderate, anything else high.
    pub fn risk_band(&self) -> RiskBand {
        match self.disease_probability() {
            p if p < 0.30 => RiskBand::Low,
            p if p < 0.60 => RiskBand::Moderate,
            _ => RiskBand::High,
        }
    }
}

/// Answers prediction requests from one loaded artifact.
#[derive(Debug, Clone)]
pub struct InferenceService {
    artifact: Arc<ModelArtifact>,
}

impl InferenceService {
    /// Loads the artifact at `path` on first use and reuses it afterwards.
    /// A missing or corrupt artifact fails here, before any request.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let key = path
            .canonicalize()
            .map_err(|e| CardioError::ArtifactMissingOrCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        // held across the load so concurrent first requests read the file once
        let mut loaded = LOADED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(artifact) = loaded.get(&key) {
            debug!("reusing loaded artifact {}", key.display());
            return Ok(Self { artifact: Arc::clone(artifact) });
        }
        let artifact = Arc::new(ModelArtifact::load(&key)?);
        info!(
            "loaded {} model from {} (selection accuracy {:.4}, {} training rows)",
            artifact.candidate,
            key.display(),
            artifact.selection_accuracy,
            artifact.trained_rows
        );
        loaded.insert(key, Arc::clone(&artifact));
        Ok(Self { artifact })
    }

    /// Whether `path` has already been loaded by this process.
    pub fn is_loaded<P: AsRef<Path>>(path: P) -> bool {
        match path.as_ref().canonicalize() {
            Ok(key) => LOADED
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(&key),
            Err(_) => false,
        }
    }

    /// Serves an artifact that is already in memory, bypassing the cache.
    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        Self { artifact: Arc::new(artifact) }
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn predict_record(&self, record: &ClinicalRecord) -> Result<Prediction> {
        let df = records_to_frame(std::slice::from_ref(record))?;
        self.predict_frame(&df)?
            .pop()
            .ok_or_else(|| CardioError::SchemaMismatch("request produced no row".to_string()))
    }

    /// Scores every row of `df`, which must hold exactly the six feature
    /// columns, in any order.
    pub fn predict_frame(&self, df: &DataFrame) -> Result<Vec<Prediction>> {
        check_request_columns(df)?;
        let features = conform_features(df)?;
        let probabilities = self.artifact.predict_proba(&features)?;
        Ok(probabilities.into_iter().map(Prediction::from_probabilities).collect())
    }
}

fn check_request_columns(df: &DataFrame) -> Result<()> {
    let names = df.get_column_names();
    let missing: Vec<&str> = FEATURE_COLUMNS
        .iter()
        .copied()
        .filter(|c| !names.contains(c))
        .collect();
    let extra: Vec<&str> = names
        .iter()
        .copied()
        .filter(|c| !FEATURE_COLUMNS.contains(c))
        .collect();
    if missing.is_empty() && extra.is_empty() {
        Ok(())
    } else {
        Err(CardioError::SchemaMismatch(format!(
            "request columns do not match the model: missing {missing:?}, unexpected {extra:?}"
        )))
    }
}
