//! Imputation, scaling and one-hot encoding, learned once from training rows.

use std::collections::BTreeMap;

use log::{debug, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::records::{CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use crate::{CardioError, FeatureMatrix, Result};

/// Fitted statistics of one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub name: String,
    pub median: f64,
    pub mean: f64,
    pub std: f64,
}

impl NumericStats {
    fn scale(&self, value: Option<f64>) -> f64 {
        let value = value.filter(|v| !v.is_nan()).unwrap_or(self.median);
        (value - self.mean) / self.std
    }
}

/// Fitted vocabulary of one categorical column. `categories` is sorted and
/// its first entry is the reference level that gets no indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalStats {
    pub name: String,
    pub mode: String,
    pub categories: Vec<String>,
}

impl CategoricalStats {
    pub fn encoded_categories(&self) -> &[String] {
        self.categories.get(1..).unwrap_or(&[])
    }
}

/// Column groups the preprocessor is fitted on.
#[derive(Debug, Clone)]
pub struct ColumnPreprocessor {
    numeric: Vec<String>,
    categorical: Vec<String>,
}

impl Default for ColumnPreprocessor {
    fn default() -> Self {
        Self::new(&NUMERIC_FEATURES, &CATEGORICAL_FEATURES)
    }
}

impl ColumnPreprocessor {
    pub fn new(numeric: &[&str], categorical: &[&str]) -> Self {
        Self {
            numeric: numeric.iter().map(|s| s.to_string()).collect(),
            categorical: categorical.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn fit(&self, df: &DataFrame) -> Result<FittedPreprocessor> {
        let mut numeric = Vec::with_capacity(self.numeric.len());
        for name in &self.numeric {
            let values = numeric_column(df, name)?;
            let observed = Series::new(name, &values);
            let median = observed.median().ok_or_else(|| {
                CardioError::TrainingData(format!("column {name:?} has no observed values"))
            })?;

            let imputed: Vec<f64> = values.iter().map(|v| v.unwrap_or(median)).collect();
            let imputed = Float64Chunked::from_vec(name, imputed);
            let mean = imputed.mean().unwrap_or(median);
            let std = match imputed.std(0) {
                Some(std) if std > 0.0 => std,
                _ => 1.0,
            };
            debug!("{name}: median={median:.4} mean={mean:.4} std={std:.4}");
            numeric.push(NumericStats { name: name.clone(), median, mean, std });
        }

        let mut categorical = Vec::with_capacity(self.categorical.len());
        for name in &self.categorical {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for value in text_column(df, name)?.into_iter().flatten() {
                *counts.entry(value).or_default() += 1;
            }
            // sorted iteration plus keeping the first maximum: ties go to the
            // smallest category
            let mode = counts
                .iter()
                .fold(None::<(&String, usize)>, |best, (value, &count)| match best {
                    Some((_, top)) if top >= count => best,
                    _ => Some((value, count)),
                })
                .map(|(value, _)| value.clone())
                .ok_or_else(|| {
                    CardioError::TrainingData(format!("column {name:?} has no observed values"))
                })?;
            let categories: Vec<String> = counts.into_keys().collect();
            debug!("{name}: mode={mode:?} categories={categories:?}");
            categorical.push(CategoricalStats { name: name.clone(), mode, categories });
        }

        Ok(FittedPreprocessor { numeric, categorical })
    }
}

/// Frozen preprocessing state. Every row, at training or inference time, goes
/// through the same statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    pub numeric: Vec<NumericStats>,
    pub categorical: Vec<CategoricalStats>,
}

impl FittedPreprocessor {
    pub fn n_features(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|c| c.encoded_categories().len())
                .sum::<usize>()
    }

    /// Output column names: the numeric block, then `<column>_<category>`
    /// for every encoded category.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|n| n.name.clone()).collect();
        for cat in &self.categorical {
            names.extend(cat.encoded_categories().iter().map(|c| format!("{}_{c}", cat.name)));
        }
        names
    }

    pub fn transform(&self, df: &DataFrame) -> Result<FeatureMatrix> {
        let height = df.height();
        let mut rows: FeatureMatrix = vec![Vec::with_capacity(self.n_features()); height];

        for stats in &self.numeric {
            let values = numeric_column(df, &stats.name)?;
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(stats.scale(value));
            }
        }

        for stats in &self.categorical {
            let values = text_column(df, &stats.name)?;
            let encoded = stats.encoded_categories();
            for (row, value) in rows.iter_mut().zip(values) {
                let value = value.unwrap_or_else(|| stats.mode.clone());
                if !stats.categories.contains(&value) {
                    warn!("unseen {} category {value:?}, using the reference encoding", stats.name);
                }
                row.extend(encoded.iter().map(|c| if *c == value { 1.0 } else { 0.0 }));
            }
        }

        Ok(rows)
    }
}

/// Numeric values with NaN folded into missing.
fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let series = df
        .column(name)
        .map_err(|_| CardioError::SchemaMismatch(format!("missing column {name:?}")))?;
    if !series.dtype().is_numeric() && series.dtype() != &DataType::Null {
        return Err(CardioError::SchemaMismatch(format!(
            "column {name:?} has type {}, expected a number",
            series.dtype()
        )));
    }
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

fn text_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df
        .column(name)
        .map_err(|_| CardioError::SchemaMismatch(format!("missing column {name:?}")))?;
    match series.dtype() {
        DataType::Utf8 => Ok(series
            .utf8()?
            .into_iter()
            .map(|v| v.map(str::to_string))
            .collect()),
        DataType::Null => Ok(vec![None; series.len()]),
        other => Err(CardioError::SchemaMismatch(format!(
            "column {name:?} has type {other}, expected text"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ADIPOSITY, AGE, FAMHIST, LDL, OBESITY, SBP};

    fn training_frame() -> DataFrame {
        df!(
            SBP => &[120.0, 140.0, 160.0, 130.0],
            LDL => &[Some(2.0), None, Some(6.0), Some(4.0)],
            ADIPOSITY => &[20.0, 25.0, 30.0, 35.0],
            FAMHIST => &[Some("Absent"), Some("Present"), None, Some("Present")],
            OBESITY => &[22.0, 24.0, 26.0, 28.0],
            AGE => &[30.0, 40.0, 50.0, 60.0],
        )
        .unwrap()
    }

    #[test]
    fn learns_median_mode_and_vocabulary() {
        let fitted = ColumnPreprocessor::default().fit(&training_frame()).unwrap();
        let ldl = fitted.numeric.iter().find(|n| n.name == LDL).unwrap();
        assert_eq!(ldl.median, 4.0);
        // mean of the imputed column 2, 4, 6, 4
        assert!((ldl.mean - 4.0).abs() < 1e-12);

        let famhist = &fitted.categorical[0];
        assert_eq!(famhist.mode, "Present");
        assert_eq!(famhist.categories, vec!["Absent".to_string(), "Present".to_string()]);
        assert_eq!(fitted.feature_names().last().unwrap(), "famhist_Present");
        assert_eq!(fitted.n_features(), 6);
    }

    #[test]
    fn missing_values_are_imputed_before_scaling() {
        let df = training_frame();
        let fitted = ColumnPreprocessor::default().fit(&df).unwrap();
        let rows = fitted.transform(&df).unwrap();
        // row 1 had no ldl: imputed to the median, which equals the mean here
        assert!(rows[1][1].abs() < 1e-12);
        // row 2 had no famhist: imputed to the mode
        assert_eq!(rows[2][5], 1.0);
        assert_eq!(rows[0][5], 0.0);
    }

    #[test]
    fn nan_is_imputed_like_a_null() {
        let fitted = ColumnPreprocessor::default().fit(&training_frame()).unwrap();
        let row = |ldl: f64| {
            let mut row = training_frame().head(Some(1));
            row.with_column(Series::new(LDL, &[ldl])).unwrap();
            fitted.transform(&row).unwrap()
        };
        assert_eq!(row(f64::NAN), row(4.0));
    }

    #[test]
    fn unseen_category_uses_reference_encoding() {
        let fitted = ColumnPreprocessor::default().fit(&training_frame()).unwrap();
        let mut row = training_frame().head(Some(1));
        row.with_column(Series::new(FAMHIST, &["Unknown"])).unwrap();
        let encoded = fitted.transform(&row).unwrap();
        assert_eq!(encoded[0][5], 0.0);
    }

    #[test]
    fn output_order_ignores_column_order() {
        let df = training_frame();
        let fitted = ColumnPreprocessor::default().fit(&df).unwrap();
        let shuffled = df.select([AGE, FAMHIST, OBESITY, SBP, ADIPOSITY, LDL]).unwrap();
        assert_eq!(fitted.transform(&df).unwrap(), fitted.transform(&shuffled).unwrap());
    }

    #[test]
    fn absent_column_is_a_schema_mismatch() {
        let fitted = ColumnPreprocessor::default().fit(&training_frame()).unwrap();
        let df = training_frame().drop(AGE).unwrap();
        assert!(matches!(fitted.transform(&df), Err(CardioError::SchemaMismatch(_))));
    }

    #[test]
    fn constant_column_scales_by_one() {
        let mut df = training_frame();
        df.with_column(Series::new(OBESITY, &[25.0, 25.0, 25.0, 25.0])).unwrap();
        let fitted = ColumnPreprocessor::default().fit(&df).unwrap();
        let obesity = fitted.numeric.iter().find(|n| n.name == OBESITY).unwrap();
        assert_eq!(obesity.std, 1.0);
    }
}
