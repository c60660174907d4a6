//! Candidate comparison on a held-out split, grid search for the neighbour
//! count, and the final full-data refit.

use std::sync::Arc;

use log::{debug, info};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::artifact::ModelArtifact;
use crate::classifier::ClassifierSpec;
use crate::config::TrainingConfig;
use crate::metrics::ClassificationReport;
use crate::normalizer::FeatureNormalizer;
use crate::pipeline::{FittedPipeline, PipelineSpec};
use crate::preprocess::ColumnPreprocessor;
use crate::rebalance::Smote;
use crate::reducer::{components_for_variance, explained_variance_ratio, ReducerSpec};
use crate::split::{stratified_kfold, stratified_split, take_labels, take_rows};
use crate::{CardioError, Result};

pub const LOGREG_PCA: &str = "logreg_pca";
pub const LOGREG: &str = "logreg";
pub const KNN_SMOTE_PCA: &str = "knn_smote_pca";

/// PCA spectrum of the preprocessed training split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceAnalysis {
    pub explained_variance_ratio: Vec<f64>,
    pub cumulative: Vec<f64>,
    pub threshold: f64,
    /// Components needed to reach `threshold`.
    pub n_components: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub k: usize,
    pub fold_accuracy: Vec<f64>,
    pub mean_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSearchResult {
    pub points: Vec<GridPoint>,
    pub best_k: usize,
    pub best_score: f64,
}

/// How a candidate's hyperparameters are settled before the final fit.
#[derive(Debug, Clone, PartialEq)]
enum Tuning {
    Fixed,
    NeighborGrid { grid: Vec<usize>, folds: usize },
}

#[derive(Debug, Clone)]
struct Candidate {
    spec: PipelineSpec,
    tuning: Tuning,
}

/// A candidate fitted on the training split and scored on the test split.
#[derive(Debug, Clone)]
pub struct CandidateResult {
    /// Configuration with tuned values filled in; refitting it reproduces the
    /// pipeline on other rows.
    pub spec: PipelineSpec,
    pub fitted: FittedPipeline,
    pub accuracy: f64,
    pub report: ClassificationReport,
    pub grid: Option<GridSearchResult>,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub variance: VarianceAnalysis,
    pub candidates: Vec<CandidateResult>,
    pub winner: usize,
}

/// Serializable account of a selection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionSummary {
    pub variance: VarianceAnalysis,
    pub candidates: Vec<CandidateSummary>,
    pub winner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub spec: PipelineSpec,
    pub accuracy: f64,
    pub report: ClassificationReport,
    pub grid: Option<GridSearchResult>,
}

impl Selection {
    pub fn winner(&self) -> &CandidateResult {
        &self.candidates[self.winner]
    }

    pub fn summary(&self) -> SelectionSummary {
        SelectionSummary {
            variance: self.variance.clone(),
            candidates: self
                .candidates
                .iter()
                .map(|c| CandidateSummary {
                    spec: c.spec.clone(),
                    accuracy: c.accuracy,
                    report: c.report.clone(),
                    grid: c.grid.clone(),
                })
                .collect(),
            winner: self.winner().spec.name.clone(),
        }
    }
}

/// Train and test halves shared by every candidate task.
struct SplitData {
    train: DataFrame,
    train_y: Vec<i32>,
    test: DataFrame,
    test_y: Vec<i32>,
}

pub struct ModelSelector {
    config: TrainingConfig,
}

impl ModelSelector {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Variance spectrum of the training rows after normalisation and
    /// preprocessing.
    pub fn analyse_variance(&self, df: &DataFrame) -> Result<VarianceAnalysis> {
        let normalized = FeatureNormalizer.transform(df)?;
        let encoded = ColumnPreprocessor::default().fit(&normalized)?.transform(&normalized)?;
        let ratios = explained_variance_ratio(&encoded)?;
        let cumulative = ratios
            .iter()
            .scan(0.0, |acc, r| {
                *acc += r;
                Some(*acc)
            })
            .collect();
        let threshold = self.config.analysis_variance;
        Ok(VarianceAnalysis {
            n_components: components_for_variance(&ratios, threshold),
            explained_variance_ratio: ratios,
            cumulative,
            threshold,
        })
    }

    /// Candidates in declaration order; earlier ones win accuracy ties.
    fn candidates(&self, neighbor_components: usize) -> Vec<Candidate> {
        let logistic = ClassifierSpec::Logistic { alpha: self.config.logistic_alpha };
        vec![
            Candidate {
                spec: PipelineSpec {
                    name: LOGREG_PCA.to_string(),
                    rebalance: None,
                    reducer: Some(ReducerSpec::VarianceRatio(self.config.pca_variance)),
                    classifier: logistic,
                },
                tuning: Tuning::Fixed,
            },
            Candidate {
                spec: PipelineSpec {
                    name: LOGREG.to_string(),
                    rebalance: None,
                    reducer: None,
                    classifier: logistic,
                },
                tuning: Tuning::Fixed,
            },
            Candidate {
                spec: PipelineSpec {
                    name: KNN_SMOTE_PCA.to_string(),
                    rebalance: Some(Smote {
                        k_neighbors: self.config.smote_neighbors,
                        seed: self.config.seed,
                    }),
                    reducer: Some(ReducerSpec::Components(neighbor_components)),
                    classifier: ClassifierSpec::Neighbors { k: self.config.neighbor_grid[0] },
                },
                tuning: Tuning::NeighborGrid {
                    grid: self.config.neighbor_grid.clone(),
                    folds: self.config.cv_folds,
                },
            },
        ]
    }

    /// Fits every candidate on the same stratified training split and keeps
    /// the most accurate one on the held-out rows. Nothing is refit here.
    pub async fn select(&self, df: &DataFrame, y: &[i32]) -> Result<Selection> {
        if df.height() != y.len() {
            return Err(CardioError::TrainingData(format!(
                "{} feature rows for {} labels",
                df.height(),
                y.len()
            )));
        }
        let split = stratified_split(y, self.config.test_fraction, self.config.seed)?;
        info!(
            "split {} rows into {} train / {} test",
            y.len(),
            split.train.len(),
            split.test.len()
        );
        let data = Arc::new(SplitData {
            train: take_rows(df, &split.train)?,
            train_y: take_labels(y, &split.train),
            test: take_rows(df, &split.test)?,
            test_y: take_labels(y, &split.test),
        });

        let variance = self.analyse_variance(&data.train)?;
        info!(
            "{} components explain {:.0}% of the variance (spectrum {:?})",
            variance.n_components,
            variance.threshold * 100.0,
            variance.explained_variance_ratio
        );

        // candidate fits share nothing mutable, so they run side by side
        let handles: Vec<_> = self
            .candidates(variance.n_components)
            .into_iter()
            .map(|candidate| {
                let data = Arc::clone(&data);
                let name = candidate.spec.name.clone();
                let handle = tokio::task::spawn_blocking(move || evaluate(candidate, &data));
                (name, handle)
            })
            .collect();

        let mut candidates = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = handle
                .await
                .map_err(|e| CardioError::Fit(format!("candidate {name} did not finish: {e}")))??;
            info!("{name}: test accuracy {:.4}\n{}", result.accuracy, result.report);
            candidates.push(result);
        }

        let winner = best_index(candidates.iter().map(|c| c.accuracy));
        info!(
            "best model: {} (accuracy {:.4})",
            candidates[winner].spec.name, candidates[winner].accuracy
        );
        Ok(Selection { variance, candidates, winner })
    }

    /// Selects on a split, then refits the winning configuration on every row
    /// and wraps it as an artifact. The stored accuracy is the held-out one
    /// from selection.
    pub async fn train(&self, df: &DataFrame, y: &[i32]) -> Result<(Selection, ModelArtifact)> {
        let selection = self.select(df, y).await?;
        let winner = selection.winner();
        info!("refitting {} on all {} rows", winner.spec.name, y.len());

        let spec = winner.spec.clone();
        let (full, labels) = (df.clone(), y.to_vec());
        let pipeline = tokio::task::spawn_blocking(move || spec.fit(&full, &labels))
            .await
            .map_err(|e| CardioError::Fit(format!("final refit did not finish: {e}")))??;

        let artifact = ModelArtifact::new(&winner.spec.name, winner.accuracy, y.len(), pipeline);
        Ok((selection, artifact))
    }
}

fn evaluate(candidate: Candidate, data: &SplitData) -> Result<CandidateResult> {
    let mut spec = candidate.spec;
    let grid = match candidate.tuning {
        Tuning::Fixed => None,
        Tuning::NeighborGrid { grid, folds } => {
            let result = grid_search(&spec, &grid, folds, &data.train, &data.train_y)?;
            spec.classifier = ClassifierSpec::Neighbors { k: result.best_k };
            Some(result)
        }
    };

    let fitted = spec.fit(&data.train, &data.train_y)?;
    let predicted = fitted.predict(&data.test)?;
    let report = ClassificationReport::new(&data.test_y, &predicted);
    Ok(CandidateResult {
        accuracy: report.accuracy,
        spec,
        fitted,
        report,
        grid,
    })
}

/// Mean k-fold accuracy of `template` for every neighbour count in `grid`.
/// The first count reaching the best mean wins.
pub fn grid_search(
    template: &PipelineSpec,
    grid: &[usize],
    folds: usize,
    df: &DataFrame,
    y: &[i32],
) -> Result<GridSearchResult> {
    let splits = stratified_kfold(y, folds)?;
    let fold_data = splits
        .iter()
        .map(|fold| {
            Ok::<_, CardioError>((
                take_rows(df, &fold.train)?,
                take_labels(y, &fold.train),
                take_rows(df, &fold.test)?,
                take_labels(y, &fold.test),
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut points = Vec::with_capacity(grid.len());
    for &k in grid {
        let spec = PipelineSpec {
            classifier: ClassifierSpec::Neighbors { k },
            ..template.clone()
        };
        let fold_accuracy = fold_data
            .iter()
            .map(|(train, train_y, test, test_y)| spec.fit(train, train_y)?.score(test, test_y))
            .collect::<Result<Vec<f64>>>()?;
        let mean_accuracy = fold_accuracy.iter().sum::<f64>() / fold_accuracy.len() as f64;
        debug!("k={k}: mean CV accuracy {mean_accuracy:.4}");
        points.push(GridPoint { k, fold_accuracy, mean_accuracy });
    }

    let best = best_index(points.iter().map(|p| p.mean_accuracy));
    info!(
        "grid search picked k={} (mean CV accuracy {:.4})",
        points[best].k, points[best].mean_accuracy
    );
    Ok(GridSearchResult {
        best_k: points[best].k,
        best_score: points[best].mean_accuracy,
        points,
    })
}

/// Index of the largest score; ties keep the earliest.
fn best_index(scores: impl Iterator<Item = f64>) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for (i, score) in scores.enumerate() {
        match best {
            Some((_, top)) if top >= score => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_go_to_the_first_declared() {
        assert_eq!(best_index([0.7, 0.8, 0.8].into_iter()), 1);
        assert_eq!(best_index([0.9, 0.9, 0.9].into_iter()), 0);
        assert_eq!(best_index([0.1, 0.2, 0.3].into_iter()), 2);
    }

    #[test]
    fn candidates_follow_declared_order() {
        let selector = ModelSelector::new(TrainingConfig::default()).unwrap();
        let names: Vec<String> = selector.candidates(3).into_iter().map(|c| c.spec.name).collect();
        assert_eq!(names, vec![LOGREG_PCA, LOGREG, KNN_SMOTE_PCA]);

        let knn = &selector.candidates(3)[2];
        assert_eq!(knn.spec.reducer, Some(ReducerSpec::Components(3)));
        assert!(knn.spec.rebalance.is_some());
        assert!(matches!(knn.tuning, Tuning::NeighborGrid { folds: 5, .. }));
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = TrainingConfig { cv_folds: 0, ..Default::default() };
        assert!(ModelSelector::new(config).is_err());
    }
}
