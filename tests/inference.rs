use cardio_risk::artifact::ModelArtifact;
use cardio_risk::classifier::ClassifierSpec;
use cardio_risk::inference::InferenceService;
use cardio_risk::pipeline::PipelineSpec;
use cardio_risk::records::{read_training_csv, records_to_frame, ClinicalRecord, FAMHIST, LABEL};
use cardio_risk::reducer::ReducerSpec;
use cardio_risk::CardioError;
use polars::prelude::*;

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/chd_sample.csv");

async fn service() -> InferenceService {
    let (df, y) = read_training_csv(FIXTURE).await.unwrap();
    let spec = PipelineSpec {
        name: "logreg_pca".to_string(),
        rebalance: None,
        reducer: Some(ReducerSpec::VarianceRatio(0.95)),
        classifier: ClassifierSpec::Logistic { alpha: 1.0 },
    };
    let pipeline = spec.fit(&df, &y).unwrap();
    InferenceService::from_artifact(ModelArtifact::new(&spec.name, 0.0, y.len(), pipeline))
}

fn record(famhist: &str) -> ClinicalRecord {
    ClinicalRecord {
        sbp: Some(144.0),
        ldl: Some(5.2),
        adiposity: Some(30.1),
        famhist: Some(famhist.to_string()),
        obesity: Some(27.5),
        age: Some(52.0),
    }
}

#[tokio::test]
async fn spelling_variants_of_famhist_agree() {
    let service = service().await;
    let reference = service.predict_record(&record("Present")).unwrap();
    for variant in ["present", "  PRESENT ", "Present\t"] {
        assert_eq!(service.predict_record(&record(variant)).unwrap(), reference);
    }
}

#[tokio::test]
async fn unseen_category_uses_the_reference_encoding() {
    let service = service().await;
    let unseen = service.predict_record(&record("Unknown")).unwrap();
    let reference = service.predict_record(&record("Absent")).unwrap();
    assert_eq!(unseen, reference);
    assert!((unseen.probabilities.iter().sum::<f64>() - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn columns_may_arrive_in_any_order() {
    let service = service().await;
    let df = records_to_frame(&[record("Absent"), record("Present")]).unwrap();
    let reversed: Vec<&str> = df.get_column_names().into_iter().rev().collect();
    let shuffled = df.select(reversed).unwrap();
    assert_eq!(service.predict_frame(&shuffled).unwrap(), service.predict_frame(&df).unwrap());
}

#[tokio::test]
async fn request_schema_is_enforced() {
    let service = service().await;

    let mut extra = records_to_frame(&[record("Absent")]).unwrap();
    extra.with_column(Series::new(LABEL, &[0i32])).unwrap();
    assert!(matches!(service.predict_frame(&extra), Err(CardioError::SchemaMismatch(_))));

    let missing = records_to_frame(&[record("Absent")]).unwrap().drop("age").unwrap();
    assert!(matches!(service.predict_frame(&missing), Err(CardioError::SchemaMismatch(_))));

    let mut numeric_famhist = records_to_frame(&[record("Absent")]).unwrap();
    numeric_famhist.with_column(Series::new(FAMHIST, &[1.0f64])).unwrap();
    assert!(matches!(
        service.predict_frame(&numeric_famhist),
        Err(CardioError::SchemaMismatch(_))
    ));
}

#[test]
fn missing_artifact_fails_before_serving() {
    let path = std::env::temp_dir().join("cardio-risk-absent-model.json");
    let err = InferenceService::load(&path).unwrap_err();
    assert!(matches!(err, CardioError::ArtifactMissingOrCorrupt { .. }));
}

#[test]
fn corrupt_artifact_fails_before_serving() {
    let path = std::env::temp_dir().join(format!("cardio-risk-corrupt-{}.json", std::process::id()));
    std::fs::write(&path, br#"{"format_version": 1, "candidate": "logreg"}"#).unwrap();
    let err = InferenceService::load(&path).unwrap_err();
    std::fs::remove_file(&path).ok();
    assert!(matches!(err, CardioError::ArtifactMissingOrCorrupt { .. }));
}
