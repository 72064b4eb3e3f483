//! Random forest: bootstrap-aggregated CART trees with per-split feature
//! subsampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use sd_core::{Learner, Predictor, Result};
use serde::{Deserialize, Serialize};

use super::check_shape;
use super::tree::{RegressionTree, TreeParams, grow_tree};

/// Forest settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RandomForestParams {
    /// Number of trees.
    pub n_trees: usize,
    /// Maximum depth per tree.
    pub max_depth: usize,
    /// Minimum rows per leaf.
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` uses `max(1, p / 3)`.
    pub max_features: Option<usize>,
}

impl Default for RandomForestParams {
    fn default() -> Self {
        Self { n_trees: 200, max_depth: 8, min_samples_leaf: 5, max_features: None }
    }
}

/// Fitted forest; predicts the average of its trees.
#[derive(Debug, Clone)]
pub struct ForestModel {
    trees: Vec<RegressionTree>,
}

impl Predictor for ForestModel {
    fn predict_row(&self, row: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }
}

/// Random forest learner.
#[derive(Debug, Clone)]
pub struct RandomForest {
    params: RandomForestParams,
}

impl RandomForest {
    /// New learner.
    pub fn new(params: RandomForestParams) -> Self {
        Self { params }
    }
}

impl Learner for RandomForest {
    fn name(&self) -> &str {
        "random_forest"
    }

    fn fit(&self, x: &[f64], y: &[f64], p: usize, seed: u64) -> Result<Box<dyn Predictor>> {
        let n = check_shape(x, y, p)?;
        if self.params.n_trees == 0 {
            return Err(sd_core::Error::Validation("n_trees must be >= 1".into()));
        }
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: Some(self.params.max_features.unwrap_or((p / 3).max(1))),
        };
        // Per-tree seeds make the forest independent of thread scheduling.
        let trees: Vec<RegressionTree> = (0..self.params.n_trees)
            .into_par_iter()
            .map(|t| {
                let tree_seed = seed.wrapping_add(t as u64);
                let mut rng = StdRng::seed_from_u64(tree_seed);
                let rows: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
                grow_tree(x, y, p, rows, &tree_params, tree_seed.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            })
            .collect();
        Ok(Box::new(ForestModel { trees }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> (Vec<f64>, Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 200;
        let mut x = Vec::with_capacity(n * 3);
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            let a: f64 = rng.random_range(-2.0..2.0);
            let b: f64 = rng.random_range(-2.0..2.0);
            let c: f64 = rng.random_range(-2.0..2.0);
            x.extend([a, b, c]);
            y.push(if a > 0.0 { 3.0 } else { -3.0 } + 0.5 * b);
        }
        (x, y)
    }

    #[test]
    fn test_forest_fits_nonlinear_signal() {
        let (x, y) = data();
        let learner = RandomForest::new(RandomForestParams { n_trees: 30, ..Default::default() });
        let m = learner.fit(&x, &y, 3, 11).unwrap();
        assert!(m.predict_row(&[1.5, 0.0, 0.0]) > 1.5);
        assert!(m.predict_row(&[-1.5, 0.0, 0.0]) < -1.5);
    }

    #[test]
    fn test_forest_is_deterministic_per_seed() {
        let (x, y) = data();
        let learner = RandomForest::new(RandomForestParams { n_trees: 10, ..Default::default() });
        let a = learner.fit(&x, &y, 3, 5).unwrap().predict(&x, 3);
        let b = learner.fit(&x, &y, 3, 5).unwrap().predict(&x, 3);
        assert_eq!(a, b);
        assert!(learner.fit(&x, &y, 3, 0).is_ok());
        let none = RandomForest::new(RandomForestParams { n_trees: 0, ..Default::default() });
        assert!(none.fit(&x, &y, 3, 0).is_err());
    }
}
