//! Synthetic minority oversampling (SMOTE), used on training features only.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::classifier::squared_distance;
use crate::{CardioError, FeatureMatrix, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Smote {
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Default for Smote {
    fn default() -> Self {
        Self { k_neighbors: 5, seed: 123 }
    }
}

impl Smote {
    /// Returns the input rows followed by synthetic minority rows, so that
    /// both labels end up equally frequent. Balanced input is returned as is.
    pub fn resample(&self, x: &[Vec<f64>], y: &[i32]) -> Result<(FeatureMatrix, Vec<i32>)> {
        let positives = y.iter().filter(|&&label| label == 1).count();
        let negatives = y.len() - positives;
        let (minority_label, n_new) = match positives.cmp(&negatives) {
            std::cmp::Ordering::Less => (1, negatives - positives),
            std::cmp::Ordering::Greater => (0, positives - negatives),
            std::cmp::Ordering::Equal => return Ok((x.to_vec(), y.to_vec())),
        };

        let minority: Vec<&Vec<f64>> = x
            .iter()
            .zip(y)
            .filter(|(_, &label)| label == minority_label)
            .map(|(row, _)| row)
            .collect();
        if minority.len() < 2 {
            return Err(CardioError::Fit(format!(
                "SMOTE needs at least two rows of class {minority_label}, got {}",
                minority.len()
            )));
        }
        let k = self.k_neighbors.clamp(1, minority.len() - 1);
        let neighbors: Vec<Vec<usize>> = (0..minority.len())
            .map(|i| nearest_minority(&minority, i, k))
            .collect();

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut out_x = x.to_vec();
        let mut out_y = y.to_vec();
        out_x.reserve(n_new);
        out_y.reserve(n_new);
        for _ in 0..n_new {
            let base = rng.gen_range(0..minority.len());
            let other = minority[neighbors[base][rng.gen_range(0..k)]];
            let gap: f64 = rng.gen();
            let synthetic = minority[base]
                .iter()
                .zip(other)
                .map(|(a, b)| a + gap * (b - a))
                .collect();
            out_x.push(synthetic);
            out_y.push(minority_label);
        }
        debug!(
            "SMOTE added {n_new} rows of class {minority_label} ({} -> {} rows)",
            y.len(),
            out_y.len()
        );
        Ok((out_x, out_y))
    }
}

/// Indices of the `k` minority rows closest to row `i`, excluding itself.
fn nearest_minority(minority: &[&Vec<f64>], i: usize, k: usize) -> Vec<usize> {
    let mut distances: Vec<(f64, usize)> = minority
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(j, row)| (squared_distance(minority[i], row), j))
        .collect();
    distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    distances.into_iter().take(k).map(|(_, j)| j).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn imbalanced() -> (FeatureMatrix, Vec<i32>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..12 {
            x.push(vec![i as f64, 0.0]);
            y.push(0);
        }
        for i in 0..4 {
            x.push(vec![100.0 + i as f64, 10.0]);
            y.push(1);
        }
        (x, y)
    }

    #[test]
    fn equalises_class_counts() {
        let (x, y) = imbalanced();
        let (rx, ry) = Smote::default().resample(&x, &y).unwrap();
        assert_eq!(rx.len(), 24);
        assert_eq!(ry.iter().filter(|&&l| l == 1).count(), 12);
        assert_eq!(&rx[..16], &x[..]);
    }

    #[test]
    fn synthetic_rows_lie_between_minority_rows() {
        let (x, y) = imbalanced();
        let (rx, _) = Smote::default().resample(&x, &y).unwrap();
        for row in &rx[16..] {
            assert!((100.0..=103.0).contains(&row[0]));
            assert_eq!(row[1], 10.0);
        }
    }

    #[test]
    fn fixed_seed_reproduces_samples() {
        let (x, y) = imbalanced();
        let smote = Smote { k_neighbors: 3, seed: 7 };
        assert_eq!(smote.resample(&x, &y).unwrap(), smote.resample(&x, &y).unwrap());
    }

    #[test]
    fn balanced_input_is_untouched() {
        let x = vec![vec![0.0], vec![1.0]];
        let y = vec![0, 1];
        assert_eq!(Smote::default().resample(&x, &y).unwrap(), (x, y));
    }

    #[test]
    fn single_minority_row_is_an_error() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0]];
        let y = vec![0, 0, 1];
        assert!(Smote::default().resample(&x, &y).is_err());
    }
}
