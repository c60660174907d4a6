use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CardioError, Result};

/// Knobs of a training run. Every field has a default, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Seed for the train/test split and for SMOTE.
    pub seed: u64,
    pub test_fraction: f64,
    /// Variance kept by the PCA of the first logistic candidate.
    pub pca_variance: f64,
    /// Variance that fixes the component count of the neighbour candidate.
    pub analysis_variance: f64,
    pub neighbor_grid: Vec<usize>,
    pub cv_folds: usize,
    pub smote_neighbors: usize,
    pub logistic_alpha: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 123,
            test_fraction: 0.33,
            pca_variance: 0.95,
            analysis_variance: 0.90,
            neighbor_grid: vec![3, 5, 7, 9, 11, 15, 20],
            cv_folds: 5,
            smote_neighbors: 5,
            logistic_alpha: 1.0,
        }
    }
}

impl TrainingConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| CardioError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| CardioError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fraction = |name: &str, value: f64| {
            if value > 0.0 && value < 1.0 {
                Ok(())
            } else {
                Err(CardioError::Config(format!("{name} must lie in (0, 1), got {value}")))
            }
        };
        fraction("test_fraction", self.test_fraction)?;
        fraction("pca_variance", self.pca_variance)?;
        fraction("analysis_variance", self.analysis_variance)?;

        if self.neighbor_grid.is_empty() || self.neighbor_grid.contains(&0) {
            return Err(CardioError::Config(
                "neighbor_grid must list at least one positive k".to_string(),
            ));
        }
        if self.cv_folds < 2 {
            return Err(CardioError::Config(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        if self.smote_neighbors == 0 {
            return Err(CardioError::Config("smote_neighbors must be positive".to_string()));
        }
        if self.logistic_alpha.is_nan() || self.logistic_alpha < 0.0 {
            return Err(CardioError::Config(format!(
                "logistic_alpha must be non-negative, got {}",
                self.logistic_alpha
            )));
        }
        Ok(())
    }
}
