//! Canonical spelling for the free-text family-history field.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::records::FAMHIST;
use crate::{CardioError, Result};

/// Trims `value` and rewrites it first-letter-upper, rest-lower.
/// Returns `None` when nothing is left after trimming.
pub fn canonical_category(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    let mut out: String = first.to_uppercase().collect();
    out.extend(chars.flat_map(char::to_lowercase));
    Some(out)
}

/// Stateless stage in front of the preprocessor. Fitting it learns nothing,
/// so it only exposes the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureNormalizer;

impl FeatureNormalizer {
    /// Returns a copy of `df` with `famhist` canonicalised. Frames without the
    /// column come back unchanged.
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame> {
        let series = match df.column(FAMHIST) {
            Ok(series) => series,
            Err(_) => return Ok(df.clone()),
        };
        let normalized = match series.dtype() {
            DataType::Utf8 => {
                let mut ca: Utf8Chunked = series
                    .utf8()?
                    .into_iter()
                    .map(|v| v.and_then(canonical_category))
                    .collect();
                ca.rename(FAMHIST);
                ca.into_series()
            }
            DataType::Null => series.cast(&DataType::Utf8)?,
            other => {
                return Err(CardioError::SchemaMismatch(format!(
                    "column {FAMHIST:?} must hold text, found {other}"
                )))
            }
        };

        let mut out = df.clone();
        out.with_column(normalized)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_and_whitespace_variants_collapse() {
        for raw in [" present", "PRESENT", "Present ", "pReSeNt", "\tpresent\n"] {
            assert_eq!(canonical_category(raw).as_deref(), Some("Present"));
        }
        assert_eq!(canonical_category("ABSENT ").as_deref(), Some("Absent"));
        assert_eq!(canonical_category("   "), None);
    }

    #[test]
    fn transform_leaves_input_untouched() {
        let df = df!(FAMHIST => &[Some("PRESENT "), None, Some(" absent")], "age" => &[1.0, 2.0, 3.0])
            .unwrap();
        let out = FeatureNormalizer.transform(&df).unwrap();

        assert_eq!(out.get_column_names(), df.get_column_names());
        let values: Vec<Option<&str>> = out.column(FAMHIST).unwrap().utf8().unwrap().into_iter().collect();
        assert_eq!(values, vec![Some("Present"), None, Some("Absent")]);
        let original: Vec<Option<&str>> = df.column(FAMHIST).unwrap().utf8().unwrap().into_iter().collect();
        assert_eq!(original[0], Some("PRESENT "));
    }

    #[test]
    fn missing_column_is_a_no_op() {
        let df = df!("age" => &[1.0, 2.0]).unwrap();
        assert!(FeatureNormalizer.transform(&df).unwrap().frame_equal(&df));
    }

    #[test]
    fn numeric_famhist_is_rejected() {
        let df = df!(FAMHIST => &[1i32, 0]).unwrap();
        assert!(matches!(
            FeatureNormalizer.transform(&df),
            Err(CardioError::SchemaMismatch(_))
        ));
    }
}
