//! Random forest binary classifier.
//!
//! CART trees split on Gini impurity over a random subset of `sqrt(n_features)`
//! features per node, each tree fitted on a bootstrap sample. Probabilities are
//! the mean positive-class fraction of the leaves a row lands in. Fitting is
//! deterministic for a given seed.

use crate::utils::error::{MortgageError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` means `sqrt(n_features)`.
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 15,
            min_samples_split: 10,
            min_samples_leaf: 5,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        probability: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [u8],
    params: &'a ForestParams,
    max_features: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, indices: &mut [usize], depth: usize, rng: &mut StdRng) -> usize {
        let total = indices.len();
        let positives = indices.iter().filter(|&&i| self.y[i] == 1).count();
        let node_index = self.nodes.len();
        self.nodes.push(Node::Leaf {
            probability: positives as f64 / total.max(1) as f64,
            samples: total,
        });

        let pure = positives == 0 || positives == total;
        if pure || depth >= self.params.max_depth || total < self.params.min_samples_split {
            return node_index;
        }

        let Some(split) = self.best_split(indices, positives, rng) else {
            return node_index;
        };
        self.importances[split.feature] += split.decrease;

        // Partition in place: left side holds values <= threshold.
        let mut boundary = 0;
        for i in 0..indices.len() {
            if self.x[indices[i]][split.feature] <= split.threshold {
                indices.swap(i, boundary);
                boundary += 1;
            }
        }
        let (left_indices, right_indices) = indices.split_at_mut(boundary);
        let left = self.build(left_indices, depth + 1, rng);
        let right = self.build(right_indices, depth + 1, rng);

        self.nodes[node_index] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node_index
    }

    fn best_split(
        &self,
        indices: &[usize],
        positives: usize,
        rng: &mut StdRng,
    ) -> Option<SplitCandidate> {
        let total = indices.len();
        let n_features = self.x[indices[0]].len();
        let parent_impurity = gini(positives, total) * total as f64;
        let min_leaf = self.params.min_samples_leaf.max(1);

        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(rng);
        features.truncate(self.max_features);

        let mut best: Option<SplitCandidate> = None;
        let mut sorted = indices.to_vec();

        for &feature in &features {
            sorted.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

            let mut left_pos = 0usize;
            for split_at in 1..total {
                let prev = sorted[split_at - 1];
                if self.y[prev] == 1 {
                    left_pos += 1;
                }
                let left_n = split_at;
                let right_n = total - split_at;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let prev_value = self.x[prev][feature];
                let next_value = self.x[sorted[split_at]][feature];
                if prev_value == next_value {
                    continue;
                }

                let right_pos = positives - left_pos;
                let child_impurity = gini(left_pos, left_n) * left_n as f64
                    + gini(right_pos, right_n) * right_n as f64;
                let decrease = parent_impurity - child_impurity;

                if decrease > 1e-12 && best.as_ref().map_or(true, |b| decrease > b.decrease) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (prev_value + next_value) / 2.0,
                        decrease,
                    });
                }
            }
        }

        best
    }
}

impl DecisionTree {
    fn fit(
        x: &[Vec<f64>],
        y: &[u8],
        mut indices: Vec<usize>,
        params: &ForestParams,
        max_features: usize,
        rng: &mut StdRng,
    ) -> (Self, Vec<f64>) {
        let n_features = x[0].len();
        let mut builder = TreeBuilder {
            x,
            y,
            params,
            max_features,
            nodes: Vec::new(),
            importances: vec![0.0; n_features],
        };
        builder.build(&mut indices, 0, rng);
        (
            Self {
                nodes: builder.nodes,
            },
            builder.importances,
        )
    }

    /// Children always follow their parent, so a checked tree has no cycles.
    fn check(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(MortgageError::model("tree has no nodes"));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { probability, .. } => {
                    if !probability.is_finite() || !(0.0..=1.0).contains(probability) {
                        return Err(MortgageError::model(format!(
                            "leaf {} has probability {}",
                            index, probability
                        )));
                    }
                }
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        return Err(MortgageError::model(format!(
                            "node {} splits on feature {} of {}",
                            index, feature, n_features
                        )));
                    }
                    if threshold.is_nan() {
                        return Err(MortgageError::model(format!("node {} has a NaN threshold", index)));
                    }
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(MortgageError::model(format!(
                                "node {} points to child {} of {} nodes",
                                index,
                                child,
                                self.nodes.len()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Positive-class fraction of the leaf `row` lands in, or `None` when the
    /// walk leaves the tree.
    fn leaf_probability(&self, row: &[f64]) -> Option<f64> {
        let mut index = 0;
        for _ in 0..self.nodes.len() {
            match self.nodes.get(index)? {
                Node::Leaf { probability, .. } => return Some(*probability),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    index = if value <= *threshold { *left } else { *right };
                }
            }
        }
        None
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        self.leaf_probability(row).unwrap_or(0.0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match nodes.get(index) {
                Some(Node::Split { left, right, .. }) if *left > index && *right > index => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    pub params: ForestParams,
    /// Mean decrease in impurity, normalized to sum to 1.
    pub feature_importances: Vec<f64>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f64>], y: &[u8], params: &ForestParams) -> Result<Self> {
        if x.is_empty() {
            return Err(MortgageError::model("cannot fit a forest on an empty dataset"));
        }
        if x.len() != y.len() {
            return Err(MortgageError::model(format!(
                "feature rows ({}) and labels ({}) differ in length",
                x.len(),
                y.len()
            )));
        }
        let n_features = x[0].len();
        if n_features == 0 || x.iter().any(|row| row.len() != n_features) {
            return Err(MortgageError::model("feature rows must share a non-zero width"));
        }
        if params.n_estimators == 0 {
            return Err(MortgageError::model("n_estimators must be at least 1"));
        }

        let max_features = params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().round() as usize)
            .clamp(1, n_features);

        let n = x.len();
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut importances = vec![0.0; n_features];

        for t in 0..params.n_estimators {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
            let indices: Vec<usize> = if params.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };

            let (tree, tree_importances) =
                DecisionTree::fit(x, y, indices, params, max_features, &mut rng);

            let tree_total: f64 = tree_importances.iter().sum();
            if tree_total > 0.0 {
                for (acc, value) in importances.iter_mut().zip(&tree_importances) {
                    *acc += value / tree_total;
                }
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            n_features,
            params: params.clone(),
            feature_importances: importances,
            trees,
        })
    }

    /// Structural check for forests read back from an artifact.
    pub fn check(&self) -> Result<()> {
        if self.n_features == 0 {
            return Err(MortgageError::model("forest has no features"));
        }
        if self.trees.is_empty() {
            return Err(MortgageError::model("forest has no trees"));
        }
        for (index, tree) in self.trees.iter().enumerate() {
            tree.check(self.n_features)
                .map_err(|e| MortgageError::model(format!("tree {}: {}", index, e)))?;
        }
        Ok(())
    }

    /// Probability of the positive (default) class. Trees whose walk fails are
    /// left out; with none left the result is 0.
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let (sum, count) = self
            .trees
            .iter()
            .filter_map(|tree| tree.leaf_probability(row))
            .fold((0.0, 0usize), |(sum, count), p| (sum + p, count + 1));
        if count == 0 {
            return 0.0;
        }
        sum / count as f64
    }

    pub fn predict(&self, row: &[f64]) -> bool {
        self.predict_proba(row) >= 0.5
    }

    pub fn accuracy(&self, x: &[Vec<f64>], y: &[u8]) -> f64 {
        if x.is_empty() {
            return 0.0;
        }
        let correct = x
            .iter()
            .zip(y)
            .filter(|(row, label)| self.predict(row) == (**label == 1))
            .count();
        correct as f64 / x.len() as f64
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Label is 1 when the first feature exceeds 0.5; the second feature is noise.
    fn threshold_dataset(n: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<u8>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut x = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            let signal: f64 = rng.gen();
            let noise: f64 = rng.gen();
            x.push(vec![signal, noise]);
            y.push(u8::from(signal > 0.5));
        }
        (x, y)
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_estimators: 15,
            max_depth: 6,
            min_samples_split: 4,
            min_samples_leaf: 2,
            max_features: Some(2),
            bootstrap: true,
            seed: 7,
        }
    }

    #[test]
    fn test_learns_threshold() {
        let (x, y) = threshold_dataset(400, 1);
        let forest = RandomForest::fit(&x, &y, &small_params()).unwrap();

        assert_eq!(forest.tree_count(), 15);
        assert!(forest.predict_proba(&[0.9, 0.3]) > 0.8);
        assert!(forest.predict_proba(&[0.1, 0.3]) < 0.2);

        let (test_x, test_y) = threshold_dataset(200, 2);
        assert!(forest.accuracy(&test_x, &test_y) > 0.9);
    }

    #[test]
    fn test_importance_favours_signal_feature() {
        let (x, y) = threshold_dataset(400, 3);
        let forest = RandomForest::fit(&x, &y, &small_params()).unwrap();

        let total: f64 = forest.feature_importances.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(forest.feature_importances[0] > forest.feature_importances[1]);
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() {
        let (x, y) = threshold_dataset(200, 4);
        let a = RandomForest::fit(&x, &y, &small_params()).unwrap();
        let b = RandomForest::fit(&x, &y, &small_params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_depth_limit_respected() {
        let (x, y) = threshold_dataset(300, 5);
        let params = ForestParams {
            max_depth: 2,
            ..small_params()
        };
        let forest = RandomForest::fit(&x, &y, &params).unwrap();
        assert!(forest.trees().iter().all(|t| t.depth() <= 2));
    }

    #[test]
    fn test_pure_labels_give_single_leaf() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let y = vec![0, 0, 0, 0];
        let forest = RandomForest::fit(&x, &y, &small_params()).unwrap();
        assert!(forest.trees().iter().all(|t| t.node_count() == 1));
        assert_eq!(forest.predict_proba(&[2.5]), 0.0);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(RandomForest::fit(&[], &[], &small_params()).is_err());
        assert!(RandomForest::fit(&[vec![1.0]], &[0, 1], &small_params()).is_err());
        assert!(RandomForest::fit(&[vec![1.0], vec![1.0, 2.0]], &[0, 1], &small_params()).is_err());
    }

    #[test]
    fn test_serde_preserves_predictions() {
        let (x, y) = threshold_dataset(100, 6);
        let forest = RandomForest::fit(&x, &y, &small_params()).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let restored: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tree_count(), forest.tree_count());
        for row in [[0.7, 0.2], [0.2, 0.9], [0.5, 0.5]] {
            assert!((restored.predict_proba(&row) - forest.predict_proba(&row)).abs() < 1e-9);
        }
    }

    fn corrupted(edit: impl FnOnce(&mut serde_json::Value)) -> RandomForest {
        let (x, y) = threshold_dataset(100, 8);
        let forest = RandomForest::fit(&x, &y, &small_params()).unwrap();
        let mut value = serde_json::to_value(&forest).unwrap();
        edit(&mut value);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_check_accepts_fitted_forest() {
        let forest = corrupted(|_| {});
        assert!(forest.check().is_ok());
    }

    #[test]
    fn test_check_rejects_broken_structure() {
        let empty = corrupted(|v| v["trees"] = serde_json::json!([]));
        assert!(empty.check().is_err());
        assert_eq!(empty.predict_proba(&[0.9, 0.1]), 0.0);

        let no_nodes = corrupted(|v| v["trees"] = serde_json::json!([{"nodes": []}]));
        assert!(no_nodes.check().is_err());
        assert_eq!(no_nodes.predict_proba(&[0.9, 0.1]), 0.0);

        let dangling = corrupted(|v| {
            v["trees"] = serde_json::json!([{"nodes": [
                {"kind": "split", "feature": 0, "threshold": 0.5, "left": 1, "right": 7},
                {"kind": "leaf", "probability": 0.2, "samples": 10}
            ]}])
        });
        assert!(dangling.check().is_err());
        assert_eq!(dangling.predict_proba(&[0.9, 0.1]), 0.0);
        assert_eq!(dangling.predict_proba(&[0.1, 0.1]), 0.2);

        let cycle = corrupted(|v| {
            v["trees"] = serde_json::json!([{"nodes": [
                {"kind": "split", "feature": 0, "threshold": 0.5, "left": 0, "right": 0}
            ]}])
        });
        assert!(cycle.check().is_err());
        assert_eq!(cycle.predict_proba(&[0.9, 0.1]), 0.0);

        let bad_feature = corrupted(|v| {
            v["trees"] = serde_json::json!([{"nodes": [
                {"kind": "split", "feature": 9, "threshold": 0.5, "left": 1, "right": 2},
                {"kind": "leaf", "probability": 0.2, "samples": 10},
                {"kind": "leaf", "probability": 0.8, "samples": 10}
            ]}])
        });
        assert!(bad_feature.check().is_err());
    }
}
