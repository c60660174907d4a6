use std::fmt;

use serde::{Deserialize, Serialize};

/// Fraction of matching labels.
pub fn accuracy(y_true: &[i32], y_pred: &[i32]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    smartcore::metrics::accuracy(&y_true.to_vec(), &y_pred.to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassScores {
    pub label: i32,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision / recall / F1 of a binary prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: [ClassScores; 2],
    pub accuracy: f64,
}

impl ClassificationReport {
    pub fn new(y_true: &[i32], y_pred: &[i32]) -> Self {
        let scores = |label: i32| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (&truth, &pred) in y_true.iter().zip(y_pred) {
                match (truth == label, pred == label) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_);
            let f1 = if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            };
            ClassScores { label, precision, recall, f1, support: tp + fn_ }
        };
        Self {
            classes: [scores(0), scores(1)],
            accuracy: accuracy(y_true, y_pred),
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>7} {:>9} {:>9} {:>9} {:>9}", "class", "precision", "recall", "f1", "support")?;
        for c in &self.classes {
            writeln!(
                f,
                "{:>7} {:>9.2} {:>9.2} {:>9.2} {:>9}",
                c.label, c.precision, c.recall, c.f1, c.support
            )?;
        }
        write!(f, "accuracy {:.4}", self.accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accuracy_counts_matches() {
        assert_eq!(accuracy(&[0, 1, 1, 0], &[0, 1, 0, 0]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn report_matches_hand_counts() {
        let truth = [1, 1, 1, 0, 0, 0, 0, 0];
        let pred = [1, 1, 0, 1, 0, 0, 0, 0];
        let report = ClassificationReport::new(&truth, &pred);
        let positive = report.classes[1];
        assert!((positive.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((positive.recall - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(positive.support, 3);
        assert_eq!(report.classes[0].support, 5);
        assert_eq!(report.accuracy, 0.75);
    }
}
