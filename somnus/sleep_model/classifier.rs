use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::{
    error::TrainingDataError,
    forest::{argmax, RandomForest, RandomForestConfig},
};

/// A fitted classifier over scaled feature vectors.
///
/// Callers pass vectors of exactly [`Classifier::n_features`] values; the
/// returned class codes index the label vocabulary.
pub trait Classifier {
    /// Input vector length.
    fn n_features(&self) -> usize;
    /// Number of label classes.
    fn n_classes(&self) -> usize;
    /// Most likely class code.
    fn predict(&self, features: &[f64]) -> usize;
    /// Per-class probabilities, when the model produces them.
    fn predict_proba(&self, features: &[f64]) -> Option<Vec<f64>>;
}

/// Assigns the class whose training centroid is nearest in Euclidean distance.
///
/// Produces no probability estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid {
    n_features: usize,
    centroids: Vec<Option<Vec<f64>>>,
}

impl NearestCentroid {
    /// Averages the rows of each class.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
    ) -> Result<Self, TrainingDataError> {
        let (rows, n_features) = x.dim();
        if rows == 0 {
            return Err(TrainingDataError::EmptyDataset);
        }
        if rows != y.len() {
            return Err(TrainingDataError::Classifier {
                reason: format!("{rows} rows but {} labels", y.len()),
            });
        }
        let mut sums = vec![vec![0.0; n_features]; n_classes];
        let mut counts = vec![0_usize; n_classes];
        for (row, &label) in x.rows().into_iter().zip(y) {
            let Some(sum) = sums.get_mut(label) else {
                return Err(TrainingDataError::Classifier {
                    reason: format!("label code {label} outside {n_classes} classes"),
                });
            };
            for (total, value) in sum.iter_mut().zip(row.iter()) {
                *total += value;
            }
            counts[label] += 1;
        }
        let centroids = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| {
                (count > 0).then(|| sum.into_iter().map(|total| total / count as f64).collect())
            })
            .collect();
        Ok(Self {
            n_features,
            centroids,
        })
    }

    fn is_well_formed(&self) -> bool {
        self.centroids.iter().any(Option::is_some)
            && self
                .centroids
                .iter()
                .flatten()
                .all(|centroid| centroid.len() == self.n_features)
    }
}

impl Classifier for NearestCentroid {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.centroids.len()
    }

    fn predict(&self, features: &[f64]) -> usize {
        let negated: Vec<f64> = self
            .centroids
            .iter()
            .map(|centroid| {
                centroid.as_ref().map_or(f64::NEG_INFINITY, |centroid| {
                    -centroid
                        .iter()
                        .zip(features)
                        .map(|(c, v)| (c - v).powi(2))
                        .sum::<f64>()
                })
            })
            .collect();
        argmax(&negated)
    }

    fn predict_proba(&self, _features: &[f64]) -> Option<Vec<f64>> {
        None
    }
}

/// Which algorithm to fit, with its hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ClassifierConfig {
    /// Bagged CART ensemble.
    RandomForest(RandomForestConfig),
    /// Class centroid lookup.
    NearestCentroid,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::RandomForest(RandomForestConfig::default())
    }
}

impl ClassifierConfig {
    /// Fits the configured algorithm; `seed` drives any randomness.
    pub fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
        seed: u64,
    ) -> Result<ClassifierModel, TrainingDataError> {
        match self {
            Self::RandomForest(config) => {
                RandomForest::fit(config, x, y, n_classes, seed).map(ClassifierModel::RandomForest)
            }
            Self::NearestCentroid => {
                NearestCentroid::fit(x, y, n_classes).map(ClassifierModel::NearestCentroid)
            }
        }
    }

    /// Short algorithm name for logs and manifests.
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        match self {
            Self::RandomForest(_) => "random_forest",
            Self::NearestCentroid => "nearest_centroid",
        }
    }
}

/// Persisted classifier of any supported algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum ClassifierModel {
    /// Fitted forest.
    RandomForest(RandomForest),
    /// Fitted centroids.
    NearestCentroid(NearestCentroid),
}

impl ClassifierModel {
    /// Short algorithm name for logs and manifests.
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        match self {
            Self::RandomForest(_) => "random_forest",
            Self::NearestCentroid(_) => "nearest_centroid",
        }
    }

    /// Structural consistency check run when a bundle is loaded.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::RandomForest(forest) => forest.is_well_formed(),
            Self::NearestCentroid(centroids) => centroids.is_well_formed(),
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Self::RandomForest(forest) => forest,
            Self::NearestCentroid(centroids) => centroids,
        }
    }
}

impl Classifier for ClassifierModel {
    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn n_classes(&self) -> usize {
        self.inner().n_classes()
    }

    fn predict(&self, features: &[f64]) -> usize {
        self.inner().predict(features)
    }

    fn predict_proba(&self, features: &[f64]) -> Option<Vec<f64>> {
        self.inner().predict_proba(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn centroid_picks_nearest_class() {
        let x = array![[0.0, 0.0], [0.2, 0.0], [5.0, 5.0], [5.2, 4.8]];
        let model = NearestCentroid::fit(x.view(), &[0, 0, 2, 2], 3).unwrap();
        assert_eq!(model.n_classes(), 3);
        assert_eq!(model.predict(&[0.1, 0.3]), 0);
        assert_eq!(model.predict(&[4.0, 4.0]), 2);
        assert!(model.predict_proba(&[4.0, 4.0]).is_none());
    }

    #[test]
    fn config_parses_from_toml() {
        let config: ClassifierConfig = toml::from_str(
            r#"
            algorithm = "random_forest"
            n_estimators = 25
            max_depth = 6
            max_features = "all"
            "#,
        )
        .unwrap();
        let ClassifierConfig::RandomForest(forest) = &config else {
            panic!("expected a forest config");
        };
        assert_eq!(forest.n_estimators, 25);
        assert_eq!(forest.max_depth, Some(6));
        assert_eq!(forest.min_samples_split, 10);
        assert_eq!(config.algorithm(), "random_forest");

        let centroid: ClassifierConfig = toml::from_str(r#"algorithm = "nearest_centroid""#).unwrap();
        assert_eq!(centroid, ClassifierConfig::NearestCentroid);
    }

    #[test]
    fn model_round_trips_through_json() {
        let x = array![[0.0], [1.0], [10.0], [11.0]];
        let config = ClassifierConfig::RandomForest(RandomForestConfig {
            n_estimators: 3,
            min_samples_split: 2,
            ..RandomForestConfig::default()
        });
        let model = config.fit(x.view(), &[0, 0, 1, 1], 2, 42).unwrap();
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["algorithm"], "random_forest");
        let back: ClassifierModel = serde_json::from_value(json).unwrap();
        assert_eq!(back, model);
        assert!(back.is_well_formed());
        assert_eq!(back.n_features(), 1);
    }
}
