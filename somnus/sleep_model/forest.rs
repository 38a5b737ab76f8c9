//! Random forest of CART trees split on Gini impurity.
//!
//! Trees are grown on bootstrap samples with a random subset of candidate
//! features per split. Every random draw comes from a ChaCha8 stream seeded
//! from the configured seed and the tree index, so a fit is reproducible
//! across runs and platforms.

use ndarray::ArrayView2;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{classifier::Classifier, error::TrainingDataError};

/// Number of candidate features examined per split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `ceil(sqrt(n_features))`.
    Sqrt,
    /// Every feature.
    All,
    /// Fixed count, clamped to `1..=n_features`.
    Count(usize),
}

impl MaxFeatures {
    fn resolve(self, n_features: usize) -> usize {
        let count = match self {
            Self::Sqrt => (n_features as f64).sqrt().ceil() as usize,
            Self::All => n_features,
            Self::Count(count) => count,
        };
        count.clamp(1, n_features.max(1))
    }
}

/// Forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomForestConfig {
    /// Number of trees.
    pub n_estimators: usize,
    /// Depth limit; `None` grows until another stop rule fires.
    pub max_depth: Option<usize>,
    /// Nodes with fewer samples become leaves.
    pub min_samples_split: usize,
    /// Minimum samples on each side of a split.
    pub min_samples_leaf: usize,
    /// Candidate features per split.
    pub max_features: MaxFeatures,
}

impl Default for RandomForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: None,
            min_samples_split: 10,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        distribution: Vec<f64>,
    },
}

/// Single CART tree stored as a flat node arena (root at index 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

struct GrowContext<'a> {
    x: ArrayView2<'a, f64>,
    y: &'a [usize],
    n_classes: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    max_features: usize,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    fn grow(ctx: &GrowContext<'_>, samples: Vec<usize>, rng: &mut ChaCha8Rng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(ctx, samples, 0, rng);
        tree
    }

    fn grow_node(
        &mut self,
        ctx: &GrowContext<'_>,
        samples: Vec<usize>,
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let counts = class_counts(ctx, &samples);
        let index = self.nodes.len();
        self.nodes.push(TreeNode::Leaf {
            distribution: normalize(&counts),
        });

        let pure = counts.iter().filter(|&&count| count > 0).count() <= 1;
        let depth_reached = ctx.max_depth.is_some_and(|max| depth >= max);
        if pure || depth_reached || samples.len() < ctx.min_samples_split {
            return index;
        }

        let Some(split) = best_split(ctx, &samples, &counts, rng) else {
            return index;
        };
        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .into_iter()
            .partition(|&sample| ctx.x[[sample, split.feature]] <= split.threshold);
        let left = self.grow_node(ctx, left_samples, depth + 1, rng);
        let right = self.grow_node(ctx, right_samples, depth + 1, rng);
        self.nodes[index] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        index
    }

    /// Class distribution of the leaf `features` falls into.
    #[must_use]
    pub fn leaf_distribution(&self, features: &[f64]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { distribution } => return distribution,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if features[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Number of nodes in the arena.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn is_well_formed(&self, n_features: usize, n_classes: usize) -> bool {
        !self.nodes.is_empty()
            && self.nodes.iter().enumerate().all(|(index, node)| match node {
                TreeNode::Leaf { distribution } => distribution.len() == n_classes,
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    threshold,
                } => {
                    *feature < n_features
                        && threshold.is_finite()
                        && *left > index
                        && *right > index
                        && *left < self.nodes.len()
                        && *right < self.nodes.len()
                }
            })
    }
}

fn class_counts(ctx: &GrowContext<'_>, samples: &[usize]) -> Vec<usize> {
    let mut counts = vec![0; ctx.n_classes];
    for &sample in samples {
        counts[ctx.y[sample]] += 1;
    }
    counts
}

fn normalize(counts: &[usize]) -> Vec<f64> {
    let total = counts.iter().sum::<usize>().max(1) as f64;
    counts.iter().map(|&count| count as f64 / total).collect()
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts
        .iter()
        .map(|&count| {
            let p = count as f64 / total;
            p * p
        })
        .sum::<f64>()
}

fn best_split(
    ctx: &GrowContext<'_>,
    samples: &[usize],
    parent_counts: &[usize],
    rng: &mut ChaCha8Rng,
) -> Option<SplitCandidate> {
    let n = samples.len();
    let parent_impurity = gini(parent_counts, n);
    let mut features: Vec<usize> = (0..ctx.x.ncols()).collect();
    features.shuffle(rng);
    features.truncate(ctx.max_features);

    let mut best: Option<SplitCandidate> = None;
    let mut order = samples.to_vec();
    for feature in features {
        order.sort_by(|&a, &b| ctx.x[[a, feature]].total_cmp(&ctx.x[[b, feature]]));
        let mut left = vec![0; ctx.n_classes];
        let mut right = parent_counts.to_vec();
        for position in 1..n {
            let moved = ctx.y[order[position - 1]];
            left[moved] += 1;
            right[moved] -= 1;

            let lower = ctx.x[[order[position - 1], feature]];
            let upper = ctx.x[[order[position], feature]];
            if lower >= upper {
                continue;
            }
            let (n_left, n_right) = (position, n - position);
            if n_left < ctx.min_samples_leaf || n_right < ctx.min_samples_leaf {
                continue;
            }
            let impurity = (n_left as f64 * gini(&left, n_left)
                + n_right as f64 * gini(&right, n_right))
                / n as f64;
            if best.as_ref().map_or(true, |current| impurity < current.impurity) {
                let midpoint = lower + (upper - lower) / 2.0;
                best = Some(SplitCandidate {
                    feature,
                    threshold: if midpoint < upper { midpoint } else { lower },
                    impurity,
                });
            }
        }
    }
    best.filter(|split| split.impurity < parent_impurity - 1e-12)
}

/// Bagged ensemble of [`DecisionTree`]s with soft voting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    config: RandomForestConfig,
    seed: u64,
    n_features: usize,
    n_classes: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fits a forest on `x` (one row per sample) against class codes `y`.
    /// Tree `i` draws from a ChaCha8 stream seeded with `seed + i`.
    pub fn fit(
        config: &RandomForestConfig,
        x: ArrayView2<'_, f64>,
        y: &[usize],
        n_classes: usize,
        seed: u64,
    ) -> Result<Self, TrainingDataError> {
        let (rows, n_features) = x.dim();
        let reject = |reason: String| TrainingDataError::Classifier { reason };
        if rows == 0 {
            return Err(TrainingDataError::EmptyDataset);
        }
        if rows != y.len() {
            return Err(reject(format!("{rows} rows but {} labels", y.len())));
        }
        if config.n_estimators == 0 {
            return Err(reject("n_estimators must be positive".into()));
        }
        if let Some(label) = y.iter().find(|&&label| label >= n_classes) {
            return Err(reject(format!("label code {label} outside {n_classes} classes")));
        }
        if x.iter().any(|value| !value.is_finite()) {
            return Err(reject("feature matrix contains non-finite values".into()));
        }

        let ctx = GrowContext {
            x: x.view(),
            y,
            n_classes,
            max_depth: config.max_depth,
            min_samples_split: config.min_samples_split.max(2),
            min_samples_leaf: config.min_samples_leaf.max(1),
            max_features: config.max_features.resolve(n_features),
        };
        let trees = (0..config.n_estimators)
            .map(|tree_index| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(tree_index as u64));
                let bootstrap: Vec<usize> = (0..rows).map(|_| rng.gen_range(0..rows)).collect();
                DecisionTree::grow(&ctx, bootstrap, &mut rng)
            })
            .collect();
        Ok(Self {
            config: config.clone(),
            seed,
            n_features,
            n_classes,
            trees,
        })
    }

    /// Hyperparameters the forest was fitted with.
    #[must_use]
    pub const fn config(&self) -> &RandomForestConfig {
        &self.config
    }

    /// Seed the forest was grown from.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Fitted trees.
    #[must_use]
    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Structural consistency check used when loading persisted forests.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.trees.is_empty()
            && self
                .trees
                .iter()
                .all(|tree| tree.is_well_formed(self.n_features, self.n_classes))
    }

    fn mean_distribution(&self, features: &[f64]) -> Vec<f64> {
        let mut totals = vec![0.0; self.n_classes];
        for tree in &self.trees {
            for (total, p) in totals.iter_mut().zip(tree.leaf_distribution(features)) {
                *total += p;
            }
        }
        let count = self.trees.len().max(1) as f64;
        totals.iter().map(|total| total / count).collect()
    }
}

impl Classifier for RandomForest {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn predict(&self, features: &[f64]) -> usize {
        argmax(&self.mean_distribution(features))
    }

    fn predict_proba(&self, features: &[f64]) -> Option<Vec<f64>> {
        Some(self.mean_distribution(features))
    }
}

/// Index of the largest value; the lowest index wins ties.
pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best, best_value), (index, &value)| {
            if value > best_value {
                (index, value)
            } else {
                (best, best_value)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn separable() -> (Array2<f64>, Vec<usize>) {
        let mut values = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let class = i % 3;
            let jitter = f64::from(i as u32 % 7) * 0.05;
            values.push(class as f64 * 3.0 + jitter);
            values.push(jitter - class as f64);
            labels.push(class);
        }
        (Array2::from_shape_vec((60, 2), values).unwrap(), labels)
    }

    fn small_config() -> RandomForestConfig {
        RandomForestConfig {
            n_estimators: 15,
            min_samples_split: 2,
            ..RandomForestConfig::default()
        }
    }

    #[test]
    fn learns_separable_classes() {
        let (x, y) = separable();
        let forest = RandomForest::fit(&small_config(), x.view(), &y, 3, 42).unwrap();
        for (row, &label) in x.rows().into_iter().zip(&y) {
            assert_eq!(forest.predict(row.as_slice().unwrap()), label);
        }
        let proba = forest.predict_proba(&[6.1, -2.0]).unwrap();
        assert_eq!(proba.len(), 3);
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(forest.is_well_formed());
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = separable();
        let first = RandomForest::fit(&small_config(), x.view(), &y, 3, 42).unwrap();
        let second = RandomForest::fit(&small_config(), x.view(), &y, 3, 42).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn probabilities_cover_unobserved_classes() {
        let (x, y) = separable();
        let forest = RandomForest::fit(&small_config(), x.view(), &y, 5, 42).unwrap();
        let proba = forest.predict_proba(&[0.0, 0.0]).unwrap();
        assert_eq!(proba.len(), 5);
        assert!(proba[3].abs() < f64::EPSILON && proba[4].abs() < f64::EPSILON);
    }

    #[test]
    fn depth_limit_yields_stumps() {
        let (x, y) = separable();
        let config = RandomForestConfig {
            max_depth: Some(1),
            ..small_config()
        };
        let forest = RandomForest::fit(&config, x.view(), &y, 3, 42).unwrap();
        assert!(forest.trees().iter().all(|tree| tree.node_count() <= 3));
    }

    #[test]
    fn rejects_bad_inputs() {
        let (x, y) = separable();
        assert!(RandomForest::fit(&small_config(), x.view(), &y[..10], 3, 42).is_err());
        assert!(RandomForest::fit(&small_config(), x.view(), &y, 2, 42).is_err());
        let zero = RandomForestConfig {
            n_estimators: 0,
            ..small_config()
        };
        assert!(RandomForest::fit(&zero, x.view(), &y, 3, 42).is_err());
    }

    #[test]
    fn labels_may_outlive_the_matrix_view() {
        let (_, y) = separable();
        let forest = {
            let (x, _) = separable();
            let view = x.view();
            RandomForest::fit(&small_config(), view, &y, 3, 7).unwrap()
        };
        assert_eq!(forest.trees().len(), 15);
        assert_eq!(forest.n_features(), 2);
    }

    #[test]
    fn argmax_prefers_lowest_index_on_ties() {
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), 0);
        assert_eq!(argmax(&[0.1, 0.2, 0.7]), 2);
    }

    #[test]
    fn max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(12), 4);
        assert_eq!(MaxFeatures::All.resolve(12), 12);
        assert_eq!(MaxFeatures::Count(40).resolve(12), 12);
        assert_eq!(MaxFeatures::Count(0).resolve(12), 1);
    }
}
