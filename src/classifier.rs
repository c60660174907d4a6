//! The two candidate classifiers: logistic regression and k-nearest-neighbours.

use log::debug;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linear::logistic_regression::{LogisticRegression, LogisticRegressionParameters};

use crate::pipeline::convert_features_to_matrix;
use crate::{CardioError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ClassifierSpec {
    /// L2-regularised logistic regression with penalty weight `alpha`.
    Logistic { alpha: f64 },
    /// Majority vote of the `k` nearest training rows (euclidean, uniform
    /// weights).
    Neighbors { k: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedClassifier {
    Logistic(LogisticModel),
    Neighbors(NeighborModel),
}

impl FittedClassifier {
    pub fn fit(spec: ClassifierSpec, x: &[Vec<f64>], y: &[i32]) -> Result<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(CardioError::Fit(format!(
                "{} feature rows for {} labels",
                x.len(),
                y.len()
            )));
        }
        match spec {
            ClassifierSpec::Logistic { alpha } => LogisticModel::fit(x, y, alpha).map(Self::Logistic),
            ClassifierSpec::Neighbors { k } => NeighborModel::fit(x, y, k).map(Self::Neighbors),
        }
    }

    /// Probability of class 1 for one encoded row.
    pub fn positive_probability(&self, row: &[f64]) -> f64 {
        match self {
            Self::Logistic(model) => model.positive_probability(row),
            Self::Neighbors(model) => model.positive_probability(row),
        }
    }
}

/// Weights and intercept of a binary logistic regression.
///
/// Fitting goes through smartcore; only the parameters are kept, which is
/// all that scoring needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn fit(x: &[Vec<f64>], y: &[i32], alpha: f64) -> Result<Self> {
        if !(y.contains(&0) && y.contains(&1)) {
            return Err(CardioError::Fit(
                "logistic regression needs both classes in the training rows".to_string(),
            ));
        }
        let dense = convert_features_to_matrix(x);
        let labels = y.to_vec();
        let model = LogisticRegression::fit(
            &dense,
            &labels,
            LogisticRegressionParameters::default().with_alpha(alpha),
        )?;

        let weights: Vec<f64> = model.coefficients().iterator(0).copied().collect();
        let intercept = model.intercept().iterator(0).copied().next().unwrap_or(0.0);
        if weights.len() != x[0].len() {
            return Err(CardioError::Fit(format!(
                "expected {} coefficients, solver returned {}",
                x[0].len(),
                weights.len()
            )));
        }
        debug!("logistic weights={weights:?} intercept={intercept:.4}");
        Ok(Self { weights, intercept })
    }

    pub fn positive_probability(&self, row: &[f64]) -> f64 {
        let z = self.intercept + self.weights.iter().zip(row).map(|(w, v)| w * v).sum::<f64>();
        sigmoid(z)
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// The stored neighbour set of a fitted k-NN classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborModel {
    pub k: usize,
    points: Vec<Vec<f64>>,
    labels: Vec<i32>,
}

impl NeighborModel {
    pub fn fit(x: &[Vec<f64>], y: &[i32], k: usize) -> Result<Self> {
        if k == 0 || k > x.len() {
            return Err(CardioError::Fit(format!(
                "k = {k} neighbours requested from {} training rows",
                x.len()
            )));
        }
        Ok(Self {
            k,
            points: x.to_vec(),
            labels: y.to_vec(),
        })
    }

    /// Share of class-1 labels among the `k` closest stored rows. Equal
    /// distances keep training order.
    pub fn positive_probability(&self, row: &[f64]) -> f64 {
        let mut distances: Vec<(f64, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| (squared_distance(p, row), i))
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let positives = distances
            .iter()
            .take(self.k)
            .filter(|&&(_, i)| self.labels[i] == 1)
            .count();
        positives as f64 / self.k as f64
    }
}

pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}
