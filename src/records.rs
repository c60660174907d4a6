use std::fs::File;
use std::path::Path;

use log::debug;
use polars::prelude::*;
use polars_io::parquet::ParquetWriter;
use serde::{Deserialize, Serialize};

use crate::{CardioError, Result};

pub const SBP: &str = "sbp";
pub const LDL: &str = "ldl";
pub const ADIPOSITY: &str = "adiposity";
pub const FAMHIST: &str = "famhist";
pub const OBESITY: &str = "obesity";
pub const AGE: &str = "age";
pub const LABEL: &str = "chd";

/// Numeric features, in the order they are emitted by the preprocessor.
pub const NUMERIC_FEATURES: [&str; 5] = [SBP, LDL, ADIPOSITY, OBESITY, AGE];
pub const CATEGORICAL_FEATURES: [&str; 1] = [FAMHIST];
pub const FEATURE_COLUMNS: [&str; 6] = [SBP, LDL, ADIPOSITY, FAMHIST, OBESITY, AGE];

/// One patient row. The `chd` label never travels with a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClinicalRecord {
    pub sbp: Option<f64>,
    pub ldl: Option<f64>,
    pub adiposity: Option<f64>,
    pub famhist: Option<String>,
    pub obesity: Option<f64>,
    pub age: Option<f64>,
}

impl ClinicalRecord {
    pub fn raw_schema() -> Schema {
        Schema::from_iter(vec![
            Field::new(SBP, DataType::Float64),
            Field::new(LDL, DataType::Float64),
            Field::new(ADIPOSITY, DataType::Float64),
            Field::new(FAMHIST, DataType::Utf8),
            Field::new(OBESITY, DataType::Float64),
            Field::new(AGE, DataType::Float64),
        ])
    }
}

/// Builds a frame with the six feature columns from typed records.
pub fn records_to_frame(records: &[ClinicalRecord]) -> Result<DataFrame> {
    let numeric = |f: fn(&ClinicalRecord) -> Option<f64>| -> Vec<Option<f64>> {
        records.iter().map(f).collect()
    };
    let famhist: Vec<Option<String>> = records.iter().map(|r| r.famhist.clone()).collect();

    let df = DataFrame::new(vec![
        Series::new(SBP, numeric(|r| r.sbp)),
        Series::new(LDL, numeric(|r| r.ldl)),
        Series::new(ADIPOSITY, numeric(|r| r.adiposity)),
        Series::new(FAMHIST, famhist),
        Series::new(OBESITY, numeric(|r| r.obesity)),
        Series::new(AGE, numeric(|r| r.age)),
    ])?;
    Ok(df)
}

/// Casts the feature columns to the types of [`ClinicalRecord::raw_schema`]
/// and returns them in canonical order. Extra columns are dropped.
pub fn conform_features(df: &DataFrame) -> Result<DataFrame> {
    let schema = ClinicalRecord::raw_schema();
    let mut columns = Vec::with_capacity(schema.len());
    for (name, dtype) in schema.iter() {
        let series = df
            .column(name)
            .map_err(|_| CardioError::SchemaMismatch(format!("missing column {name:?}")))?;
        let conformed = match (dtype, series.dtype()) {
            (DataType::Utf8, DataType::Utf8) => series.clone(),
            // a column that is empty in every row carries no type of its own
            (_, DataType::Null) => Series::full_null(name, series.len(), dtype),
            (DataType::Float64, found) if found.is_numeric() => series.cast(dtype)?,
            (_, found) => {
                return Err(CardioError::SchemaMismatch(format!(
                    "column {name:?} has type {found}, expected {dtype}"
                )))
            }
        };
        columns.push(conformed);
    }
    Ok(DataFrame::new(columns)?)
}

/// Reads the 0/1 label column. Nulls or other values are fatal.
pub fn labels(df: &DataFrame) -> Result<Vec<i32>> {
    let series = df
        .column(LABEL)
        .map_err(|_| CardioError::TrainingData(format!("missing label column {LABEL:?}")))?;
    if !series.dtype().is_numeric() {
        return Err(CardioError::TrainingData(format!(
            "label column {LABEL:?} has type {}, expected an integer",
            series.dtype()
        )));
    }
    let cast = series.cast(&DataType::Float64)?;
    cast.f64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(label) if label == 0.0 => Ok(0),
            Some(label) if label == 1.0 => Ok(1),
            Some(other) => Err(CardioError::TrainingData(format!(
                "row {row}: label {other} is not 0 or 1"
            ))),
            None => Err(CardioError::TrainingData(format!("row {row}: label is missing"))),
        })
        .collect()
}

pub async fn read_csv<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
    let path = path.as_ref();
    let file = File::open(path)?;

    let df = CsvReader::new(file)
        .has_header(true)
        .with_delimiter(b';')
        .infer_schema(None)
        .with_null_values(Some(NullValues::AllColumns(vec!["NA".to_string()])))
        .finish()?;
    debug!("read {} rows x {} columns from {}", df.height(), df.width(), path.display());
    Ok(df)
}

/// Loads a training table: conformed feature columns plus the label vector.
pub async fn read_training_csv<P: AsRef<Path>>(path: P) -> Result<(DataFrame, Vec<i32>)> {
    let path = path.as_ref();
    let raw = read_csv(path).await.map_err(|e| match e {
        CardioError::Io(io) => CardioError::TrainingData(format!("{}: {io}", path.display())),
        CardioError::Polars(pe) => CardioError::TrainingData(format!("{}: {pe}", path.display())),
        other => other,
    })?;
    if raw.height() == 0 {
        return Err(CardioError::TrainingData(format!("{} has no rows", path.display())));
    }
    let features = conform_features(&raw).map_err(|e| match e {
        CardioError::SchemaMismatch(msg) => CardioError::TrainingData(msg),
        other => other,
    })?;
    let y = labels(&raw)?;
    Ok((features, y))
}

pub async fn write_csv(file_name: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(file_name)?;

    CsvWriter::new(&mut file).with_delimiter(b';').finish(df)?;

    Ok(())
}

pub async fn write_parquet(file_name: &Path, df: &mut DataFrame) -> Result<()> {
    let mut file = File::create(file_name)?;

    ParquetWriter::new(&mut file).finish(df)?;

    Ok(())
}
