use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Precision, recall and F1 for one label class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Decoded class label.
    pub label: String,
    /// Correct predictions of the class over all predictions of it.
    pub precision: f64,
    /// Correct predictions of the class over its held-out rows.
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
    /// Held-out rows of the class.
    pub support: usize,
}

/// Held-out evaluation of a trained classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Share of rows predicted correctly.
    pub accuracy: f64,
    /// Number of evaluated rows.
    pub samples: usize,
    /// Per-class scores in label code order.
    pub classes: Vec<ClassMetrics>,
    /// `confusion[actual][predicted]` counts.
    pub confusion: Vec<Vec<usize>>,
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl EvaluationReport {
    /// Scores `predicted` against `actual`; both hold label codes.
    #[must_use]
    pub fn from_predictions(actual: &[usize], predicted: &[usize], labels: &[String]) -> Self {
        let n_classes = labels.len();
        let mut confusion = vec![vec![0_usize; n_classes]; n_classes];
        let mut correct = 0;
        for (&truth, &guess) in actual.iter().zip(predicted) {
            if truth == guess {
                correct += 1;
            }
            if let Some(cell) = confusion.get_mut(truth).and_then(|row| row.get_mut(guess)) {
                *cell += 1;
            }
        }

        let classes = labels
            .iter()
            .enumerate()
            .map(|(class, label)| {
                let hits = confusion[class][class];
                let support: usize = confusion[class].iter().sum();
                let predicted_as: usize = confusion.iter().map(|row| row[class]).sum();
                let precision = ratio(hits, predicted_as);
                let recall = ratio(hits, support);
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                ClassMetrics {
                    label: label.clone(),
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let samples = actual.len().min(predicted.len());
        Self {
            accuracy: ratio(correct, samples),
            samples,
            classes,
            confusion,
        }
    }

    /// Single-line rendering for logs and the CLI.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut line = format!("accuracy={:.4} samples={}", self.accuracy, self.samples);
        for class in &self.classes {
            let _ = write!(
                line,
                " | {}: p={:.3} r={:.3} f1={:.3} n={}",
                class.label, class.precision, class.recall, class.f1, class.support
            );
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        ["None", "Sleep Apnea", "Insomnia"].map(String::from).to_vec()
    }

    #[test]
    fn scores_a_mixed_prediction() {
        let actual = [0, 0, 1, 1, 2, 2];
        let predicted = [0, 1, 1, 1, 2, 0];
        let report = EvaluationReport::from_predictions(&actual, &predicted, &labels());
        assert!((report.accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert_eq!(report.confusion[0], vec![1, 1, 0]);
        let apnea = &report.classes[1];
        assert!((apnea.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((apnea.recall - 1.0).abs() < 1e-12);
        assert!((apnea.f1 - 0.8).abs() < 1e-12);
        assert_eq!(apnea.support, 2);
    }

    #[test]
    fn never_predicted_class_scores_zero() {
        let report = EvaluationReport::from_predictions(&[0, 2], &[0, 0], &labels());
        let insomnia = &report.classes[2];
        assert!(insomnia.precision.abs() < f64::EPSILON);
        assert!(insomnia.f1.abs() < f64::EPSILON);
        assert_eq!(report.classes[1].support, 0);
    }

    #[test]
    fn summary_names_every_class() {
        let report = EvaluationReport::from_predictions(&[0, 1, 2], &[0, 1, 2], &labels());
        let summary = report.summary();
        assert!(summary.starts_with("accuracy=1.0000 samples=3"));
        assert!(summary.contains("Sleep Apnea: p=1.000"));
        assert!(summary.contains("Insomnia"));
    }
}
