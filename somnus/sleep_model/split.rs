use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::TrainingDataError;

/// Row indices of the two partitions, each sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSplit {
    /// Rows the classifier is fitted on.
    pub train: Vec<usize>,
    /// Rows held out for evaluation.
    pub test: Vec<usize>,
}

/// Label-stratified train/held-out split.
///
/// Each class holds out `round(n_c * test_size)` of its rows, chosen by a
/// per-class shuffle driven by one ChaCha8 stream; classes are visited in
/// code order so the result depends only on `labels`, `test_size` and `seed`.
/// `class_names[code]` names each class; a class that would be absent from
/// either partition is an error naming it.
pub fn stratified_split(
    labels: &[usize],
    class_names: &[String],
    test_size: f64,
    seed: u64,
) -> Result<DatasetSplit, TrainingDataError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(TrainingDataError::InvalidSplit { test_size });
    }
    if labels.is_empty() {
        return Err(TrainingDataError::EmptyDataset);
    }
    let n_classes = class_names.len();
    if let Some(&stray) = labels.iter().find(|&&label| label >= n_classes) {
        return Err(TrainingDataError::Classifier {
            reason: format!("label code {stray} outside {n_classes} classes"),
        });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for class in 0..n_classes {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|&(_, &label)| label == class)
            .map(|(row, _)| row)
            .collect();
        if members.is_empty() {
            continue;
        }
        let rows = members.len();
        let held = (rows as f64 * test_size).round() as usize;
        let empty = if held == 0 {
            Some("held-out")
        } else if held >= rows {
            Some("training")
        } else {
            None
        };
        if let Some(partition) = empty {
            return Err(TrainingDataError::EmptyPartition {
                label: class_names[class].clone(),
                partition: partition.into(),
                rows,
            });
        }
        members.shuffle(&mut rng);
        test.extend_from_slice(&members[..held]);
        train.extend_from_slice(&members[held..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok(DatasetSplit { train, test })
}
