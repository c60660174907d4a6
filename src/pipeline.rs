//! A candidate pipeline: normalizer -> preprocessor -> [rebalancer] ->
//! [reducer] -> classifier.
//!
//! The stage set is fixed, so the fitted pipeline is a plain struct of
//! stages rather than a list of boxed transformers.

use log::debug;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::classifier::{ClassifierSpec, FittedClassifier};
use crate::metrics;
use crate::normalizer::FeatureNormalizer;
use crate::preprocess::{ColumnPreprocessor, FittedPreprocessor};
use crate::rebalance::Smote;
use crate::reducer::{FittedReducer, ReducerSpec};
use crate::{FeatureMatrix, Result};

/// Unfitted configuration of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    /// Applied to encoded training rows only, never at transform time.
    pub rebalance: Option<Smote>,
    pub reducer: Option<ReducerSpec>,
    pub classifier: ClassifierSpec,
}

impl PipelineSpec {
    pub fn fit(&self, df: &DataFrame, y: &[i32]) -> Result<FittedPipeline> {
        let normalizer = FeatureNormalizer;
        let normalized = normalizer.transform(df)?;
        let preprocessor = ColumnPreprocessor::default().fit(&normalized)?;
        let encoded = preprocessor.transform(&normalized)?;

        let (encoded, labels) = match &self.rebalance {
            Some(smote) => smote.resample(&encoded, y)?,
            None => (encoded, y.to_vec()),
        };

        let (reducer, features) = match self.reducer {
            Some(spec) => {
                let reducer = FittedReducer::fit(spec, &encoded)?;
                let reduced = reducer.transform(&encoded)?;
                (Some(reducer), reduced)
            }
            None => (None, encoded),
        };

        let classifier = FittedClassifier::fit(self.classifier, &features, &labels)?;
        debug!(
            "fitted {} on {} rows x {} features",
            self.name,
            features.len(),
            features.first().map(Vec::len).unwrap_or(0)
        );
        Ok(FittedPipeline {
            normalizer,
            preprocessor,
            reducer,
            classifier,
        })
    }
}

/// Every fitted stage of a pipeline; this is what gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub normalizer: FeatureNormalizer,
    pub preprocessor: FittedPreprocessor,
    pub reducer: Option<FittedReducer>,
    pub classifier: FittedClassifier,
}

impl FittedPipeline {
    /// Runs the frozen transform chain up to the classifier input.
    pub fn transform(&self, df: &DataFrame) -> Result<FeatureMatrix> {
        let normalized = self.normalizer.transform(df)?;
        let encoded = self.preprocessor.transform(&normalized)?;
        match &self.reducer {
            Some(reducer) => reducer.transform(&encoded),
            None => Ok(encoded),
        }
    }

    /// `[P(class 0), P(class 1)]` per row.
    pub fn predict_proba(&self, df: &DataFrame) -> Result<Vec<[f64; 2]>> {
        Ok(self
            .transform(df)?
            .iter()
            .map(|row| {
                let positive = self.classifier.positive_probability(row).clamp(0.0, 1.0);
                [1.0 - positive, positive]
            })
            .collect())
    }

    /// Class 1 only when it is strictly more probable than class 0.
    pub fn predict(&self, df: &DataFrame) -> Result<Vec<i32>> {
        Ok(self
            .predict_proba(df)?
            .iter()
            .map(|[_, positive]| i32::from(*positive > 0.5))
            .collect())
    }

    pub fn score(&self, df: &DataFrame, y: &[i32]) -> Result<f64> {
        Ok(metrics::accuracy(y, &self.predict(df)?))
    }
}

/// Row-major feature rows to the matrix type smartcore estimators take.
pub fn convert_features_to_matrix(rows: &[Vec<f64>]) -> DenseMatrix<f64> {
    let nrows = rows.len();
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    let values: Vec<f64> = rows.iter().flatten().copied().collect();
    DenseMatrix::new(nrows, ncols, values, false)
}

pub fn matrix_to_rows(matrix: &DenseMatrix<f64>) -> FeatureMatrix {
    let (nrows, ncols) = matrix.shape();
    (0..nrows)
        .map(|r| (0..ncols).map(|c| *matrix.get((r, c))).collect())
        .collect()
}
