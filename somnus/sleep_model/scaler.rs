use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, TrainingDataError};

/// Relative tolerance below which a column counts as constant.
const DEGENERATE_TOLERANCE: f64 = 1e-12;

/// Per-position mean and standard deviation fitted on a feature matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParameters {
    /// Column names the parameters were fitted on, in position order.
    pub columns: Vec<String>,
    /// Column means.
    pub means: Vec<f64>,
    /// Column population standard deviations.
    pub stds: Vec<f64>,
}

impl ScalerParameters {
    /// Number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.means.len()
    }

    /// True when no position was fitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.means.is_empty()
    }

    /// Applies `(x - mean) / std` position by position.
    pub fn transform(&self, vector: &[f64]) -> Result<Vec<f64>, SchemaError> {
        if vector.len() != self.len() {
            return Err(SchemaError::DimensionMismatch {
                expected: self.len(),
                actual: vector.len(),
            });
        }
        Ok(vector
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(value, (mean, std))| (value - mean) / std)
            .collect())
    }

    /// Scales every row of `matrix`.
    pub fn transform_matrix(&self, matrix: ArrayView2<'_, f64>) -> Result<Array2<f64>, SchemaError> {
        if matrix.ncols() != self.len() {
            return Err(SchemaError::DimensionMismatch {
                expected: self.len(),
                actual: matrix.ncols(),
            });
        }
        let mut scaled = matrix.to_owned();
        for mut row in scaled.axis_iter_mut(Axis(0)) {
            for ((value, mean), std) in row.iter_mut().zip(&self.means).zip(&self.stds) {
                *value = (*value - mean) / std;
            }
        }
        Ok(scaled)
    }
}

/// Standard-score scaler.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureScaler;

impl FeatureScaler {
    /// Fits per-column statistics; constant columns are rejected.
    pub fn fit(
        matrix: ArrayView2<'_, f64>,
        columns: &[String],
    ) -> Result<ScalerParameters, TrainingDataError> {
        let rows = matrix.nrows();
        if rows == 0 {
            return Err(TrainingDataError::EmptyDataset);
        }
        let mut means = Vec::with_capacity(matrix.ncols());
        let mut stds = Vec::with_capacity(matrix.ncols());
        for (index, column) in matrix.axis_iter(Axis(1)).enumerate() {
            let mean = column.sum() / rows as f64;
            let variance = column.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / rows as f64;
            let std = variance.sqrt();
            if !std.is_finite() || std <= DEGENERATE_TOLERANCE * mean.abs().max(1.0) {
                return Err(TrainingDataError::DegenerateColumn {
                    column: columns
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| format!("column {index}")),
                    index,
                });
            }
            means.push(mean);
            stds.push(std);
        }
        Ok(ScalerParameters {
            columns: columns.to_vec(),
            means,
            stds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(count: usize) -> Vec<String> {
        (0..count).map(|idx| format!("f{idx}")).collect()
    }

    #[test]
    fn fits_population_statistics() {
        let matrix = array![[1.0, 10.0], [3.0, 20.0], [5.0, 30.0]];
        let params = FeatureScaler::fit(matrix.view(), &names(2)).unwrap();
        assert!((params.means[0] - 3.0).abs() < 1e-12);
        assert!((params.stds[0] - (8.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        let scaled = params.transform_matrix(matrix.view()).unwrap();
        let column_mean: f64 = scaled.column(1).sum() / 3.0;
        assert!(column_mean.abs() < 1e-12);
    }

    #[test]
    fn transform_is_positional() {
        let params = ScalerParameters {
            columns: names(2),
            means: vec![1.0, 100.0],
            stds: vec![2.0, 10.0],
        };
        assert_eq!(params.transform(&[3.0, 90.0]).unwrap(), vec![1.0, -1.0]);
    }

    #[test]
    fn constant_column_is_degenerate() {
        let matrix = array![[1.0, 7.25], [2.0, 7.25], [3.0, 7.25]];
        let err = FeatureScaler::fit(matrix.view(), &["Age".into(), "Sleep Duration".into()])
            .unwrap_err();
        assert_eq!(
            err,
            TrainingDataError::DegenerateColumn {
                column: "Sleep Duration".into(),
                index: 1
            }
        );
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let matrix = array![[1.0, 2.0], [2.0, 4.0]];
        let params = FeatureScaler::fit(matrix.view(), &names(2)).unwrap();
        assert_eq!(
            params.transform(&[1.0, 2.0, 3.0]),
            Err(SchemaError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        );
        assert!(params.transform_matrix(array![[1.0]].view()).is_err());
    }

    #[test]
    fn empty_matrix_is_rejected() {
        let matrix = Array2::<f64>::zeros((0, 3));
        assert_eq!(
            FeatureScaler::fit(matrix.view(), &names(3)),
            Err(TrainingDataError::EmptyDataset)
        );
    }
}
