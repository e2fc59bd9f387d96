//! Evaluation metrics for the classification pipeline
//!
//! Provides accuracy, per-class precision/recall/F1, confusion matrices and
//! the small running accumulators used for windowed progress logging during
//! training. Macro averages are computed over classes that actually occur in
//! the targets, so rare attribute combinations that are absent from a
//! validation split do not drag the averages to zero.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Aggregated evaluation results for one pass over a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of samples evaluated
    pub total_samples: usize,
    /// Number of correct predictions
    pub correct_predictions: usize,
    /// Overall accuracy in [0, 1]
    pub accuracy: f64,
    /// Average loss over the evaluated batches, when available
    pub loss: Option<f64>,
    /// Macro-averaged precision over classes with support
    pub macro_precision: f64,
    /// Macro-averaged recall over classes with support
    pub macro_recall: f64,
    /// Macro-averaged F1 over classes with support
    pub macro_f1: f64,
    /// Support-weighted F1 over all classes
    pub weighted_f1: f64,
    /// Per-class breakdown
    pub per_class: Vec<ClassMetrics>,
    /// Full confusion matrix (rows = actual, columns = predicted)
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Compute metrics from parallel slices of predictions and targets.
    ///
    /// Both slices must hold class indices in `0..num_classes` and have the
    /// same length.
    pub fn from_predictions(predictions: &[usize], targets: &[usize], num_classes: usize) -> Self {
        let confusion_matrix = ConfusionMatrix::from_predictions(predictions, targets, num_classes);

        let total_samples = confusion_matrix.total();
        let correct_predictions = confusion_matrix.correct();
        let accuracy = if total_samples > 0 {
            correct_predictions as f64 / total_samples as f64
        } else {
            0.0
        };

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|idx| ClassMetrics::from_confusion_matrix(&confusion_matrix, idx))
            .collect();

        // Macro averages only over classes that appear in the targets.
        let supported: Vec<&ClassMetrics> = per_class.iter().filter(|c| c.support > 0).collect();
        let denom = supported.len().max(1) as f64;
        let macro_precision = supported.iter().map(|c| c.precision).sum::<f64>() / denom;
        let macro_recall = supported.iter().map(|c| c.recall).sum::<f64>() / denom;
        let macro_f1 = supported.iter().map(|c| c.f1).sum::<f64>() / denom;

        let weighted_f1 = if total_samples > 0 {
            per_class
                .iter()
                .map(|c| c.f1 * c.support as f64)
                .sum::<f64>()
                / total_samples as f64
        } else {
            0.0
        };

        Self {
            total_samples,
            correct_predictions,
            accuracy,
            loss: None,
            macro_precision,
            macro_recall,
            macro_f1,
            weighted_f1,
            per_class,
            confusion_matrix,
        }
    }

    /// Render a summary table with box-drawing characters.
    pub fn display(&self) -> String {
        let mut out = String::new();
        out.push_str("╔══════════════════════════════════════════════╗\n");
        out.push_str("║              Evaluation Metrics              ║\n");
        out.push_str("╠══════════════════════════════════════════════╣\n");
        out.push_str(&format!(
            "║ Samples:          {:>24}   ║\n",
            self.total_samples
        ));
        out.push_str(&format!(
            "║ Correct:          {:>24}   ║\n",
            self.correct_predictions
        ));
        out.push_str(&format!(
            "║ Accuracy:         {:>23.2}%   ║\n",
            self.accuracy * 100.0
        ));
        if let Some(loss) = self.loss {
            out.push_str(&format!("║ Loss:             {:>24.4}   ║\n", loss));
        }
        out.push_str(&format!(
            "║ Macro Precision:  {:>23.2}%   ║\n",
            self.macro_precision * 100.0
        ));
        out.push_str(&format!(
            "║ Macro Recall:     {:>23.2}%   ║\n",
            self.macro_recall * 100.0
        ));
        out.push_str(&format!("║ Macro F1:         {:>24.4}   ║\n", self.macro_f1));
        out.push_str(&format!(
            "║ Weighted F1:      {:>24.4}   ║\n",
            self.weighted_f1
        ));
        out.push_str("╚══════════════════════════════════════════════╝");
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            total_samples: 0,
            correct_predictions: 0,
            accuracy: 0.0,
            loss: None,
            macro_precision: 0.0,
            macro_recall: 0.0,
            macro_f1: 0.0,
            weighted_f1: 0.0,
            per_class: Vec::new(),
            confusion_matrix: ConfusionMatrix::new(0),
        }
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Precision / recall / F1 for a single class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of samples whose actual label is this class
    pub support: usize,
}

impl ClassMetrics {
    /// Derive one class's counts and rates from a confusion matrix.
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let tp = cm.get(class_idx, class_idx);
        let row_sum = cm.row_sums()[class_idx];
        let col_sum = cm.col_sums()[class_idx];
        let total = cm.total();

        let fn_ = row_sum - tp;
        let fp = col_sum - tp;
        let tn = total - tp - fp - fn_;

        let precision = if tp + fp > 0 {
            tp as f64 / (tp + fp) as f64
        } else {
            0.0
        };
        let recall = if tp + fn_ > 0 {
            tp as f64 / (tp + fn_) as f64
        } else {
            0.0
        };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives: tp,
            false_positives: fp,
            false_negatives: fn_,
            true_negatives: tn,
            precision,
            recall,
            f1,
            support: row_sum,
        }
    }

    /// Attach a human-readable class name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = Some(name.into());
        self
    }
}

/// Square confusion matrix stored row-major as `actual x predicted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(predictions: &[usize], targets: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(targets.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Record one observation. Out-of-range labels are ignored.
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.matrix[actual * self.num_classes + predicted]
    }

    /// Total number of recorded observations.
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Number of observations on the diagonal.
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Per-class support (samples whose actual label is the row class).
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// Per-class prediction counts.
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// Row-normalized matrix (each row sums to 1 where support exists).
    pub fn normalize_rows(&self) -> Vec<f64> {
        let row_sums = self.row_sums();
        let mut out = vec![0.0; self.matrix.len()];
        for row in 0..self.num_classes {
            if row_sums[row] == 0 {
                continue;
            }
            for col in 0..self.num_classes {
                out[row * self.num_classes + col] =
                    self.get(row, col) as f64 / row_sums[row] as f64;
            }
        }
        out
    }

    /// Render the matrix as an aligned text table.
    pub fn display(&self, class_names: Option<&[&str]>) -> String {
        let mut out = String::new();
        out.push_str("        ");
        for col in 0..self.num_classes {
            out.push_str(&format!("{:>6}", col));
        }
        out.push('\n');
        for row in 0..self.num_classes {
            let label = match class_names {
                Some(names) if row < names.len() => format!("{:>7}", names[row]),
                _ => format!("{:>7}", row),
            };
            out.push_str(&label);
            out.push(' ');
            for col in 0..self.num_classes {
                out.push_str(&format!("{:>6}", self.get(row, col)));
            }
            out.push('\n');
        }
        out
    }

    /// Write the matrix as CSV with a header row of predicted labels.
    pub fn save_csv(&self, path: &Path) -> std::io::Result<()> {
        let mut out = String::new();
        out.push_str("actual\\predicted");
        for col in 0..self.num_classes {
            out.push_str(&format!(",{}", col));
        }
        out.push('\n');
        for row in 0..self.num_classes {
            out.push_str(&row.to_string());
            for col in 0..self.num_classes {
                out.push_str(&format!(",{}", self.get(row, col)));
            }
            out.push('\n');
        }
        std::fs::write(path, out)
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display(None))
    }
}

/// Running average over an arbitrary number of values.
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

/// Correct/total accumulator for batch-level accuracy.
#[derive(Debug, Clone, Default)]
pub struct AccuracyTracker {
    correct: usize,
    total: usize,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_batch(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    pub fn accuracy(&self) -> f64 {
        if self.total > 0 {
            self.correct as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.total
    }

    pub fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_predictions() {
        let predictions = vec![0, 1, 2, 0, 1, 2];
        let targets = vec![0, 1, 2, 0, 1, 2];
        let metrics = Metrics::from_predictions(&predictions, &targets, 3);

        assert_eq!(metrics.total_samples, 6);
        assert_eq!(metrics.correct_predictions, 6);
        assert!((metrics.accuracy - 1.0).abs() < 1e-10);
        assert!((metrics.macro_f1 - 1.0).abs() < 1e-10);
        assert!((metrics.weighted_f1 - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_binary_precision_recall() {
        // Class 1: TP = 2 (idx 1, 4), FP = 1 (idx 3), FN = 1 (idx 2).
        let predictions = vec![0, 1, 0, 1, 1, 0];
        let targets = vec![0, 1, 1, 0, 1, 0];
        let metrics = Metrics::from_predictions(&predictions, &targets, 2);

        let class1 = &metrics.per_class[1];
        assert_eq!(class1.true_positives, 2);
        assert_eq!(class1.false_positives, 1);
        assert_eq!(class1.false_negatives, 1);
        assert!((class1.precision - 2.0 / 3.0).abs() < 1e-10);
        assert!((class1.recall - 2.0 / 3.0).abs() < 1e-10);
        assert!((class1.f1 - 2.0 / 3.0).abs() < 1e-10);
        assert!((metrics.accuracy - 4.0 / 6.0).abs() < 1e-10);
    }

    #[test]
    fn test_macro_skips_absent_classes() {
        // Class 2 never appears in the targets, so the macro average is taken
        // over classes 0 and 1 only.
        let predictions = vec![0, 0, 1, 1];
        let targets = vec![0, 0, 1, 1];
        let metrics = Metrics::from_predictions(&predictions, &targets, 3);

        assert_eq!(metrics.per_class[2].support, 0);
        assert!((metrics.macro_f1 - 1.0).abs() < 1e-10);
        assert!((metrics.macro_precision - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let mut cm = ConfusionMatrix::new(3);
        cm.add(0, 0);
        cm.add(0, 1);
        cm.add(1, 1);
        cm.add(2, 2);
        cm.add(2, 2);

        assert_eq!(cm.total(), 5);
        assert_eq!(cm.correct(), 4);
        assert_eq!(cm.get(0, 1), 1);
        assert_eq!(cm.row_sums(), vec![2, 1, 2]);
        assert_eq!(cm.col_sums(), vec![1, 2, 2]);
        assert!((cm.accuracy() - 0.8).abs() < 1e-10);

        let normalized = cm.normalize_rows();
        assert!((normalized[0] - 0.5).abs() < 1e-10);
        assert!((normalized[1] - 0.5).abs() < 1e-10);
        assert!((normalized[8] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_confusion_matrix_save_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.csv");

        let mut cm = ConfusionMatrix::new(2);
        cm.add(0, 0);
        cm.add(1, 0);
        cm.save_csv(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "actual\\predicted,0,1");
        assert_eq!(lines[1], "0,1,0");
        assert_eq!(lines[2], "1,1,0");
    }

    #[test]
    fn test_running_average() {
        let mut avg = RunningAverage::new();
        assert_eq!(avg.average(), 0.0);
        avg.add(1.0);
        avg.add(2.0);
        avg.add(3.0);
        assert!((avg.average() - 2.0).abs() < 1e-10);
        assert_eq!(avg.count(), 3);
        avg.reset();
        assert_eq!(avg.count(), 0);
        assert_eq!(avg.average(), 0.0);
    }

    #[test]
    fn test_accuracy_tracker() {
        let mut tracker = AccuracyTracker::new();
        tracker.add_batch(8, 10);
        tracker.add_batch(9, 10);
        assert!((tracker.accuracy() - 0.85).abs() < 1e-10);
        assert_eq!(tracker.count(), 20);
        tracker.reset();
        assert_eq!(tracker.accuracy(), 0.0);
    }
}
