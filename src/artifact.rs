//! The persisted model: one JSON document holding every fitted stage.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::info;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

use crate::pipeline::FittedPipeline;
use crate::{CardioError, Result};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    /// Name of the winning candidate.
    pub candidate: String,
    /// Accuracy on the held-out split during selection. The stored pipeline
    /// was refit on all rows afterwards, so this is not its own test score.
    pub selection_accuracy: f64,
    /// Rows used by the final refit.
    pub trained_rows: usize,
    /// Classifier inputs before any PCA.
    pub feature_names: Vec<String>,
    pub pipeline: FittedPipeline,
}

impl ModelArtifact {
    pub fn new(candidate: &str, selection_accuracy: f64, trained_rows: usize, pipeline: FittedPipeline) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            candidate: candidate.to_string(),
            selection_accuracy,
            trained_rows,
            feature_names: pipeline.preprocessor.feature_names(),
            pipeline,
        }
    }

    pub fn predict(&self, df: &DataFrame) -> Result<Vec<i32>> {
        self.pipeline.predict(df)
    }

    pub fn predict_proba(&self, df: &DataFrame) -> Result<Vec<[f64; 2]>> {
        self.pipeline.predict_proba(df)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        info!("model artifact ({}) written to {}", self.candidate, path.display());
        Ok(())
    }

    /// Reads an artifact; any failure is reported as a missing or corrupt
    /// artifact.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let corrupt = |reason: String| CardioError::ArtifactMissingOrCorrupt {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| corrupt(e.to_string()))?;
        let artifact: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;
        if artifact.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {} is not supported (expected {FORMAT_VERSION})",
                artifact.format_version
            )));
        }
        if artifact.feature_names != artifact.pipeline.preprocessor.feature_names() {
            return Err(corrupt("feature names disagree with the preprocessor".to_string()));
        }
        Ok(artifact)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classifier::{FittedClassifier, LogisticModel};
    use crate::normalizer::FeatureNormalizer;
    use crate::preprocess::{CategoricalStats, FittedPreprocessor, NumericStats};
    use crate::records::{ClinicalRecord, records_to_frame, NUMERIC_FEATURES};
    use std::path::PathBuf;

    pub(crate) fn hand_built() -> ModelArtifact {
        let preprocessor = FittedPreprocessor {
            numeric: NUMERIC_FEATURES
                .iter()
                .map(|name| NumericStats { name: name.to_string(), median: 50.0, mean: 50.0, std: 10.0 })
                .collect(),
            categorical: vec![CategoricalStats {
                name: "famhist".to_string(),
                mode: "Absent".to_string(),
                categories: vec!["Absent".to_string(), "Present".to_string()],
            }],
        };
        let pipeline = FittedPipeline {
            normalizer: FeatureNormalizer,
            preprocessor,
            reducer: None,
            classifier: FittedClassifier::Logistic(LogisticModel {
                weights: vec![0.1, 0.2, 0.0, 0.0, 0.8, 0.5],
                intercept: -0.3,
            }),
        };
        ModelArtifact::new("logreg", 0.7, 10, pipeline)
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cardio-artifact-{}-{name}", std::process::id()))
    }

    #[test]
    fn save_then_load_gives_the_same_model() {
        let artifact = hand_built();
        let path = temp_path("roundtrip.json");
        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, artifact);
        let df = records_to_frame(&[ClinicalRecord {
            sbp: Some(130.0),
            ldl: Some(4.0),
            adiposity: Some(25.0),
            famhist: Some("Present".to_string()),
            obesity: Some(26.0),
            age: Some(60.0),
        }])
        .unwrap();
        assert_eq!(loaded.predict_proba(&df).unwrap(), artifact.predict_proba(&df).unwrap());
    }

    #[test]
    fn fitted_floats_survive_the_file_exactly() {
        let mut artifact = hand_built();
        artifact.pipeline.preprocessor.numeric[0].mean = 24.546300000000002;
        artifact.pipeline.preprocessor.numeric[1].std = 0.1 + 0.2;
        if let FittedClassifier::Logistic(model) = &mut artifact.pipeline.classifier {
            model.weights[0] = -0.45056979330314373;
            model.intercept = std::f64::consts::PI / 7.0;
        }
        let path = temp_path("floats.json");
        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, artifact);
        assert_eq!(
            loaded.pipeline.preprocessor.numeric[0].mean.to_bits(),
            24.546300000000002f64.to_bits()
        );
    }

    #[test]
    fn missing_file_is_reported() {
        let err = ModelArtifact::load(temp_path("does-not-exist.json")).unwrap_err();
        assert!(matches!(err, CardioError::ArtifactMissingOrCorrupt { .. }));
    }

    #[test]
    fn garbage_and_unknown_versions_are_corrupt() {
        let path = temp_path("garbage.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(CardioError::ArtifactMissingOrCorrupt { .. })
        ));

        let mut artifact = hand_built();
        artifact.format_version = FORMAT_VERSION + 1;
        artifact.save(&path).unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(CardioError::ArtifactMissingOrCorrupt { .. })
        ));
        std::fs::remove_file(&path).ok();
    }
}
