//! Principal-component projection of the encoded features.
//!
//! The decomposition itself is smartcore's PCA. Its projection is affine, so
//! the learned basis is read back by projecting the origin and the unit
//! vectors once; the fitted stage then only stores plain numbers and can be
//! serialised with the rest of the pipeline.

use log::debug;
use serde::{Deserialize, Serialize};
use smartcore::decomposition::pca::{PCAParameters, PCA};

use crate::pipeline::{convert_features_to_matrix, matrix_to_rows};
use crate::{CardioError, FeatureMatrix, Result};

/// How many components to keep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReducerSpec {
    /// Smallest count whose cumulative explained-variance ratio reaches the
    /// given fraction.
    VarianceRatio(f64),
    /// Fixed count, clamped to the input dimension.
    Components(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedReducer {
    offset: Vec<f64>,
    /// input dimension x retained components
    basis: Vec<Vec<f64>>,
    explained_variance_ratio: Vec<f64>,
}

/// Full decomposition of a training matrix, components sorted by variance.
struct Spectrum {
    offset: Vec<f64>,
    basis: Vec<Vec<f64>>,
    ratios: Vec<f64>,
}

impl Spectrum {
    fn compute(x: &[Vec<f64>]) -> Result<Self> {
        let n_features = x.first().map(Vec::len).unwrap_or(0);
        if x.len() < 2 || n_features == 0 {
            return Err(CardioError::Fit(format!(
                "PCA needs at least two rows and one feature, got {} x {n_features}",
                x.len()
            )));
        }

        let dense = convert_features_to_matrix(x);
        let pca = PCA::fit(
            &dense,
            PCAParameters::default().with_n_components(n_features),
        )?;

        let projected = matrix_to_rows(&pca.transform(&dense)?);
        let component_var = column_variances(&projected);
        let total: f64 = column_variances(x).iter().sum();
        if total <= 0.0 {
            return Err(CardioError::Fit("training features have zero variance".to_string()));
        }

        // origin first, then one unit vector per input feature
        let mut probe = vec![vec![0.0; n_features]; n_features + 1];
        for (j, row) in probe.iter_mut().skip(1).enumerate() {
            row[j] = 1.0;
        }
        let probed = matrix_to_rows(&pca.transform(&convert_features_to_matrix(&probe))?);
        let origin = &probed[0];

        let mut order: Vec<usize> = (0..component_var.len()).collect();
        order.sort_by(|&a, &b| component_var[b].total_cmp(&component_var[a]));

        let offset = order.iter().map(|&c| origin[c]).collect();
        let basis = probed[1..]
            .iter()
            .map(|unit| order.iter().map(|&c| unit[c] - origin[c]).collect())
            .collect();
        let ratios = order.iter().map(|&c| component_var[c] / total).collect();

        Ok(Self { offset, basis, ratios })
    }

    fn truncate(self, k: usize) -> FittedReducer {
        FittedReducer {
            offset: self.offset[..k].to_vec(),
            basis: self.basis.into_iter().map(|row| row[..k].to_vec()).collect(),
            explained_variance_ratio: self.ratios[..k].to_vec(),
        }
    }
}

/// Explained-variance ratio of every principal component, largest first.
pub fn explained_variance_ratio(x: &[Vec<f64>]) -> Result<Vec<f64>> {
    Ok(Spectrum::compute(x)?.ratios)
}

/// Smallest number of leading components whose cumulative ratio reaches
/// `threshold`; every component when it is never reached.
pub fn components_for_variance(ratios: &[f64], threshold: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, ratio) in ratios.iter().enumerate() {
        cumulative += ratio;
        // tolerate rounding when the spectrum is summed up to exactly 1.0
        if cumulative + 1e-12 >= threshold {
            return i + 1;
        }
    }
    ratios.len()
}

impl FittedReducer {
    pub fn fit(spec: ReducerSpec, x: &[Vec<f64>]) -> Result<Self> {
        let spectrum = Spectrum::compute(x)?;
        let available = spectrum.ratios.len();
        let k = match spec {
            ReducerSpec::VarianceRatio(threshold) => components_for_variance(&spectrum.ratios, threshold),
            ReducerSpec::Components(k) => k.clamp(1, available),
        };
        debug!(
            "PCA keeps {k} of {available} components, cumulative variance {:.4}",
            spectrum.ratios[..k].iter().sum::<f64>()
        );
        Ok(spectrum.truncate(k))
    }

    pub fn n_components(&self) -> usize {
        self.offset.len()
    }

    pub fn explained_variance_ratio(&self) -> &[f64] {
        &self.explained_variance_ratio
    }

    pub fn transform(&self, x: &[Vec<f64>]) -> Result<FeatureMatrix> {
        x.iter().map(|row| self.project(row)).collect()
    }

    fn project(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.basis.len() {
            return Err(CardioError::SchemaMismatch(format!(
                "PCA expects {} features, got {}",
                self.basis.len(),
                row.len()
            )));
        }
        let mut out = self.offset.clone();
        for (value, weights) in row.iter().zip(&self.basis) {
            for (acc, w) in out.iter_mut().zip(weights) {
                *acc += value * w;
            }
        }
        Ok(out)
    }
}

fn column_variances(rows: &[Vec<f64>]) -> Vec<f64> {
    let n = rows.len() as f64;
    let width = rows.first().map(Vec::len).unwrap_or(0);
    (0..width)
        .map(|c| {
            let mean = rows.iter().map(|r| r[c]).sum::<f64>() / n;
            rows.iter().map(|r| (r[c] - mean).powi(2)).sum::<f64>() / n
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points close to the line y = 2x, plus a small independent third axis.
    fn elongated() -> FeatureMatrix {
        (0..40)
            .map(|i| {
                let t = i as f64 / 4.0;
                let wobble = if i % 2 == 0 { 0.05 } else { -0.05 };
                vec![t, 2.0 * t + wobble, ((i * 7) % 5) as f64 * 0.1]
            })
            .collect()
    }

    #[test]
    fn ratios_are_sorted_and_sum_to_one() {
        let ratios = explained_variance_ratio(&elongated()).unwrap();
        assert_eq!(ratios.len(), 3);
        assert!((ratios.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        assert!(ratios.windows(2).all(|w| w[0] >= w[1]));
        assert!(ratios[0] > 0.95);
    }

    #[test]
    fn variance_threshold_picks_minimum_count() {
        assert_eq!(components_for_variance(&[0.6, 0.3, 0.1], 0.5), 1);
        assert_eq!(components_for_variance(&[0.6, 0.3, 0.1], 0.9), 2);
        assert_eq!(components_for_variance(&[0.6, 0.3, 0.1], 0.95), 3);
        assert_eq!(components_for_variance(&[0.6, 0.3], 1.5), 2);
    }

    #[test]
    fn fixed_count_is_clamped() {
        let x = elongated();
        assert_eq!(FittedReducer::fit(ReducerSpec::Components(2), &x).unwrap().n_components(), 2);
        assert_eq!(FittedReducer::fit(ReducerSpec::Components(10), &x).unwrap().n_components(), 3);
    }

    #[test]
    fn projection_is_deterministic_and_centred() {
        let x = elongated();
        let first = FittedReducer::fit(ReducerSpec::VarianceRatio(0.95), &x).unwrap();
        let second = FittedReducer::fit(ReducerSpec::VarianceRatio(0.95), &x).unwrap();
        assert_eq!(first, second);

        let z = first.transform(&x).unwrap();
        assert_eq!(z, second.transform(&x).unwrap());
        let mean = z.iter().map(|r| r[0]).sum::<f64>() / z.len() as f64;
        assert!(mean.abs() < 1e-6);
    }

    #[test]
    fn wrong_width_is_rejected() {
        let fitted = FittedReducer::fit(ReducerSpec::Components(1), &elongated()).unwrap();
        assert!(fitted.transform(&[vec![1.0, 2.0]]).is_err());
    }
}
