//! CART regression tree (variance-reduction splits).

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use sd_core::{Learner, Predictor, Result};
use serde::{Deserialize, Serialize};

use super::check_shape;

/// Tree growth limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TreeParams {
    /// Maximum depth (root = 0).
    pub max_depth: usize,
    /// Minimum rows in each leaf.
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` tries all.
    pub max_features: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self { max_depth: 6, min_samples_leaf: 5, max_features: None }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// A fitted tree stored as a node arena; node 0 is the root.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Number of leaves.
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf(_))).count()
    }
}

impl Predictor for RegressionTree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf(v) => return *v,
                Node::Split { feature, threshold, left, right } => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

struct Grower<'a> {
    x: &'a [f64],
    y: &'a [f64],
    p: usize,
    params: &'a TreeParams,
    rng: StdRng,
    features: Vec<usize>,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl Grower<'_> {
    fn mean(&self, rows: &[usize]) -> f64 {
        rows.iter().map(|&i| self.y[i]).sum::<f64>() / rows.len() as f64
    }

    fn best_split(&mut self, rows: &[usize]) -> Option<BestSplit> {
        let n = rows.len();
        let leaf = self.params.min_samples_leaf.max(1);
        let k = self.params.max_features.unwrap_or(self.p).clamp(1, self.p);
        if k < self.p {
            self.features.shuffle(&mut self.rng);
        }
        let total: f64 = rows.iter().map(|&i| self.y[i]).sum();
        let parent = total * total / n as f64;

        let mut best: Option<BestSplit> = None;
        let mut order: Vec<usize> = rows.to_vec();
        for &f in &self.features[..k] {
            let x = self.x;
            let p = self.p;
            order.sort_by(|&a, &b| x[a * p + f].total_cmp(&x[b * p + f]));
            let mut left_sum = 0.0;
            for split in 1..n {
                left_sum += self.y[order[split - 1]];
                if split < leaf || n - split < leaf {
                    continue;
                }
                let lo = x[order[split - 1] * p + f];
                let hi = x[order[split] * p + f];
                if lo == hi {
                    continue;
                }
                let right_sum = total - left_sum;
                // SSE reduction = Σ_child S²/n − S²/n (constant terms cancel).
                let gain = left_sum * left_sum / split as f64
                    + right_sum * right_sum / (n - split) as f64
                    - parent;
                if best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(BestSplit { feature: f, threshold: 0.5 * (lo + hi), gain });
                }
            }
        }
        best.filter(|b| b.gain > 1e-12)
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf(self.mean(&rows)));
        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf.max(1) {
            return id;
        }
        let Some(split) = self.best_split(&rows) else { return id };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.iter().copied().partition(|&i| self.x[i * self.p + split.feature] <= split.threshold);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[id] = Node::Split { feature: split.feature, threshold: split.threshold, left, right };
        id
    }
}

/// Grow a tree on `rows` of `(x, y)`. Rows may repeat (bootstrap samples).
pub fn grow_tree(x: &[f64], y: &[f64], p: usize, rows: Vec<usize>, params: &TreeParams, seed: u64) -> RegressionTree {
    let mut g = Grower {
        x,
        y,
        p,
        params,
        rng: StdRng::seed_from_u64(seed),
        features: (0..p).collect(),
        nodes: Vec::new(),
    };
    g.grow(rows, 0);
    RegressionTree { nodes: g.nodes }
}

/// Single-tree learner.
#[derive(Debug, Clone)]
pub struct TreeLearner {
    params: TreeParams,
}

impl TreeLearner {
    /// New learner.
    pub fn new(params: TreeParams) -> Self {
        Self { params }
    }
}

impl Learner for TreeLearner {
    fn name(&self) -> &str {
        "tree"
    }

    fn fit(&self, x: &[f64], y: &[f64], p: usize, seed: u64) -> Result<Box<dyn Predictor>> {
        let n = check_shape(x, y, p)?;
        Ok(Box::new(grow_tree(x, y, p, (0..n).collect(), &self.params, seed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_step_function_is_learned_exactly() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| if v < 10.0 { 1.0 } else { 5.0 }).collect();
        let params = TreeParams { max_depth: 3, min_samples_leaf: 2, max_features: None };
        let tree = grow_tree(&x, &y, 1, (0..20).collect(), &params, 0);
        assert_eq!(tree.n_leaves(), 2);
        assert_relative_eq!(tree.predict_row(&[3.0]), 1.0);
        assert_relative_eq!(tree.predict_row(&[9.6]), 5.0);
        assert_relative_eq!(tree.predict_row(&[9.4]), 1.0);
    }

    #[test]
    fn test_respects_min_leaf_and_depth() {
        let x: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let stump = grow_tree(&x, &y, 1, (0..8).collect(), &TreeParams { max_depth: 0, ..Default::default() }, 0);
        assert_eq!(stump.n_leaves(), 1);
        assert_relative_eq!(stump.predict_row(&[0.0]), y.iter().sum::<f64>() / 8.0);

        let big_leaf = TreeParams { max_depth: 10, min_samples_leaf: 4, max_features: None };
        assert_eq!(grow_tree(&x, &y, 1, (0..8).collect(), &big_leaf, 0).n_leaves(), 2);
    }

    #[test]
    fn test_picks_informative_feature() {
        // feature 0 is noise-free signal, feature 1 constant
        let n = 30;
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            x.push(i as f64);
            x.push(7.0);
            y.push(if i < 15 { -2.0 } else { 2.0 });
        }
        let learner = TreeLearner::new(TreeParams::default());
        let m = learner.fit(&x, &y, 2, 1).unwrap();
        assert_relative_eq!(m.predict_row(&[3.0, 7.0]), -2.0);
        assert_relative_eq!(m.predict_row(&[25.0, 7.0]), 2.0);
    }
}
