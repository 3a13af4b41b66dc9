//! Binary classification metrics with FAKE as the positive class.

use serde::Serialize;
use std::fmt;

use crate::label::Label;

/// `matrix[actual][predicted]`, indexed by class index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub matrix: [[usize; 2]; 2],
}

impl ConfusionMatrix {
    pub fn record(&mut self, actual: Label, predicted: Label) {
        self.matrix[actual.index()][predicted.index()] += 1;
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    pub fn true_positives(&self) -> usize {
        self.matrix[1][1]
    }

    pub fn false_positives(&self) -> usize {
        self.matrix[0][1]
    }

    pub fn false_negatives(&self) -> usize {
        self.matrix[1][0]
    }

    pub fn true_negatives(&self) -> usize {
        self.matrix[0][0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub samples: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    /// Build a report from paired labels. Ratios with a zero denominator are 0.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Label, Label)>) -> Self {
        let mut confusion = ConfusionMatrix::default();
        for (actual, predicted) in pairs {
            confusion.record(actual, predicted);
        }
        Self::from_confusion(confusion)
    }

    pub fn from_confusion(confusion: ConfusionMatrix) -> Self {
        let tp = confusion.true_positives() as f64;
        let fp = confusion.false_positives() as f64;
        let fn_ = confusion.false_negatives() as f64;
        let correct = (confusion.true_positives() + confusion.true_negatives()) as f64;
        let total = confusion.total();

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);

        Self {
            samples: total,
            accuracy: ratio(correct, total as f64),
            precision,
            recall,
            f1: ratio(2.0 * precision * recall, precision + recall),
            confusion,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.confusion.matrix;
        writeln!(f, "Samples:   {}", self.samples)?;
        writeln!(f, "Accuracy:  {:.4}", self.accuracy)?;
        writeln!(f, "Precision: {:.4}", self.precision)?;
        writeln!(f, "Recall:    {:.4}", self.recall)?;
        writeln!(f, "F1-Score:  {:.4}", self.f1)?;
        writeln!(f, "Confusion Matrix (rows = actual REAL/FAKE):")?;
        writeln!(f, "[[{} {}]", m[0][0], m[0][1])?;
        write!(f, " [{} {}]]", m[1][0], m[1][1])
    }
}
