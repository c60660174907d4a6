//! Stratified train/test split and stratified k-fold indices.

use log::warn;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{CardioError, Result};

/// Row indices of both halves of a split, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

fn indices_by_class(y: &[i32]) -> [Vec<usize>; 2] {
    let mut by_class = [Vec::new(), Vec::new()];
    for (i, &label) in y.iter().enumerate() {
        by_class[usize::from(label == 1)].push(i);
    }
    by_class
}

/// Holds out `test_fraction` of every class, chosen by a seeded shuffle.
pub fn stratified_split(y: &[i32], test_fraction: f64, seed: u64) -> Result<Split> {
    if !(0.0..1.0).contains(&test_fraction) || test_fraction == 0.0 {
        return Err(CardioError::Config(format!(
            "test fraction must lie in (0, 1), got {test_fraction}"
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut split = Split { train: Vec::new(), test: Vec::new() };
    for (label, mut members) in indices_by_class(y).into_iter().enumerate() {
        if members.len() < 2 {
            return Err(CardioError::TrainingData(format!(
                "class {label} has {} rows, a stratified split needs at least 2",
                members.len()
            )));
        }
        members.shuffle(&mut rng);
        let n_test = ((members.len() as f64 * test_fraction).round() as usize).clamp(1, members.len() - 1);
        split.test.extend_from_slice(&members[..n_test]);
        split.train.extend_from_slice(&members[n_test..]);
    }
    split.train.sort_unstable();
    split.test.sort_unstable();
    Ok(split)
}

/// `n_folds` validation folds that each keep the class ratio. Rows are taken
/// in their original order, so the folds are deterministic.
pub fn stratified_kfold(y: &[i32], n_folds: usize) -> Result<Vec<Split>> {
    if n_folds < 2 || n_folds > y.len() {
        return Err(CardioError::Config(format!(
            "cannot build {n_folds} folds from {} rows",
            y.len()
        )));
    }
    let mut validation: Vec<Vec<usize>> = vec![Vec::new(); n_folds];
    for (label, members) in indices_by_class(y).iter().enumerate() {
        if !members.is_empty() && members.len() < n_folds {
            warn!("class {label} has only {} rows for {n_folds} folds", members.len());
        }
        let base = members.len() / n_folds;
        let extra = members.len() % n_folds;
        let mut start = 0;
        for (fold, rows) in validation.iter_mut().enumerate() {
            let size = base + usize::from(fold < extra);
            rows.extend_from_slice(&members[start..start + size]);
            start += size;
        }
    }

    Ok(validation
        .into_iter()
        .map(|mut test| {
            test.sort_unstable();
            let train = (0..y.len()).filter(|i| test.binary_search(i).is_err()).collect();
            Split { train, test }
        })
        .collect())
}

pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec("idx", rows.iter().map(|&i| i as IdxSize).collect());
    Ok(df.take(&idx)?)
}

pub fn take_labels(y: &[i32], rows: &[usize]) -> Vec<i32> {
    rows.iter().map(|&i| y[i]).collect()
}
