//! Regression tree grown on variance impurity.
//!
//! Predictors are given column-wise (`x[p][i]` is predictor `p` for sample `i`),
//! which is how gene profiles are stored. Nodes live in a flat arena with the
//! root at index 0.

use rand::seq::index::sample;
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone)]
pub(crate) enum TreeNode {
    Split {
        feature_idx: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

/// Best split found for a node
#[derive(Debug, Clone, PartialEq)]
struct Split {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree on `sample_indices`, drawing `mtry` candidate predictors at
    /// every node. Nodes with `node_size` samples or fewer are leaves.
    ///
    /// The reduction in residual sum of squares of every split is added to
    /// `importance[feature_idx]`.
    pub fn fit(
        x: &[&[f64]],
        y: &[f64],
        sample_indices: &[usize],
        mtry: usize,
        node_size: usize,
        rng: &mut ChaCha8Rng,
        importance: &mut [f64],
    ) -> RegressionTree {
        let n_features = x.len();
        let mtry = mtry.clamp(1, n_features.max(1));
        let mut nodes = vec![TreeNode::Leaf { value: mean(y, sample_indices) }];

        // explicit stack: full-depth trees can be as deep as the sample count
        let mut stack: Vec<(usize, Vec<usize>)> = vec![(0, sample_indices.to_vec())];

        while let Some((node_idx, indices)) = stack.pop() {
            if indices.len() <= node_size.max(1) || is_pure(y, &indices) || n_features == 0 {
                continue;
            }

            let candidates = sample(rng, n_features, mtry).into_vec();
            let split = match find_best_split(x, y, &indices, &candidates) {
                Some(split) => split,
                None => continue,
            };

            let column = x[split.feature_idx];
            let (left_indices, right_indices): (Vec<usize>, Vec<usize>) =
                indices.iter().partition(|&&i| column[i] <= split.threshold);

            importance[split.feature_idx] += split.gain;

            let left = nodes.len();
            nodes.push(TreeNode::Leaf { value: mean(y, &left_indices) });
            let right = nodes.len();
            nodes.push(TreeNode::Leaf { value: mean(y, &right_indices) });

            nodes[node_idx] = TreeNode::Split {
                feature_idx: split.feature_idx,
                threshold: split.threshold,
                left,
                right,
            };

            stack.push((right, right_indices));
            stack.push((left, left_indices));
        }

        RegressionTree { nodes }
    }

    /// Predict the response for one sample given as a row (one value per predictor)
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature_idx,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature_idx] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, TreeNode::Leaf { .. })).count()
    }
}

fn mean(y: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn is_pure(y: &[f64], indices: &[usize]) -> bool {
    let first = y[indices[0]];
    indices.iter().all(|&i| y[i] == first)
}

/// Scan every midpoint between consecutive distinct values of each candidate
/// and keep the split with the largest RSS reduction.
/// Returns `None` when no candidate reduces the RSS.
fn find_best_split(x: &[&[f64]], y: &[f64], indices: &[usize], candidates: &[usize]) -> Option<Split> {
    let n = indices.len() as f64;
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let parent_term = total * total / n;

    let mut best: Option<Split> = None;
    let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(indices.len());

    for &feat in candidates {
        let column = x[feat];
        pairs.clear();
        pairs.extend(indices.iter().map(|&i| (column[i], y[i])));
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut left_sum = 0.0;
        for k in 0..pairs.len() - 1 {
            left_sum += pairs[k].1;
            if pairs[k].0 == pairs[k + 1].0 {
                continue;
            }
            let left_n = (k + 1) as f64;
            let right_n = n - left_n;
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_n + right_sum * right_sum / right_n - parent_term;

            if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(Split {
                    feature_idx: feat,
                    threshold: (pairs[k].0 + pairs[k + 1].0) / 2.0,
                    gain,
                });
            }
        }
    }

    best
}
