//! Least-squares gradient boosting of shallow regression trees.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use sd_core::{Error, Learner, Predictor, Result};
use serde::{Deserialize, Serialize};

use super::check_shape;
use super::tree::{RegressionTree, TreeParams, grow_tree};

/// Boosting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GradientBoostingParams {
    /// Boosting rounds.
    pub n_estimators: usize,
    /// Shrinkage per round.
    pub learning_rate: f64,
    /// Depth of each tree.
    pub max_depth: usize,
    /// Minimum rows per leaf.
    pub min_samples_leaf: usize,
    /// Row fraction drawn (without replacement) per round.
    pub subsample: f64,
}

impl Default for GradientBoostingParams {
    fn default() -> Self {
        Self { n_estimators: 100, learning_rate: 0.1, max_depth: 3, min_samples_leaf: 5, subsample: 1.0 }
    }
}

/// Fitted boosted ensemble.
#[derive(Debug, Clone)]
pub struct BoostedModel {
    init: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl Predictor for BoostedModel {
    fn predict_row(&self, row: &[f64]) -> f64 {
        self.init + self.learning_rate * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
    }
}

/// Gradient boosting learner.
#[derive(Debug, Clone)]
pub struct GradientBoosting {
    params: GradientBoostingParams,
}

impl GradientBoosting {
    /// New learner.
    pub fn new(params: GradientBoostingParams) -> Self {
        Self { params }
    }
}

impl Learner for GradientBoosting {
    fn name(&self) -> &str {
        "gradient_boosting"
    }

    fn fit(&self, x: &[f64], y: &[f64], p: usize, seed: u64) -> Result<Box<dyn Predictor>> {
        let n = check_shape(x, y, p)?;
        let prm = &self.params;
        if !(prm.learning_rate > 0.0) || !(prm.subsample > 0.0 && prm.subsample <= 1.0) {
            return Err(Error::Validation(format!(
                "gradient boosting needs learning_rate > 0 and subsample in (0, 1], got {} and {}",
                prm.learning_rate, prm.subsample
            )));
        }
        let tree_params =
            TreeParams { max_depth: prm.max_depth, min_samples_leaf: prm.min_samples_leaf, max_features: None };
        let init = y.iter().sum::<f64>() / n as f64;
        let mut pred = vec![init; n];
        let mut resid = vec![0.0; n];
        let m = ((prm.subsample * n as f64).round() as usize).clamp(1, n);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut trees = Vec::with_capacity(prm.n_estimators);

        for round in 0..prm.n_estimators {
            for i in 0..n {
                resid[i] = y[i] - pred[i];
            }
            let rows: Vec<usize> = if m < n { sample(&mut rng, n, m).into_vec() } else { (0..n).collect() };
            let tree = grow_tree(x, &resid, p, rows, &tree_params, seed.wrapping_add(round as u64));
            for (i, row) in x.chunks_exact(p).enumerate() {
                pred[i] += prm.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }
        if pred.iter().any(|v| !v.is_finite()) {
            return Err(Error::Computation("gradient boosting produced non-finite fits".into()));
        }
        Ok(Box::new(BoostedModel { init, learning_rate: prm.learning_rate, trees }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::r_squared;

    #[test]
    fn test_boosting_reduces_training_error() {
        let x: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        let y: Vec<f64> = x.iter().map(|v| v.sin()).collect();
        let few = GradientBoosting::new(GradientBoostingParams { n_estimators: 2, ..Default::default() });
        let many = GradientBoosting::new(GradientBoostingParams { n_estimators: 200, ..Default::default() });
        let r2_few = r_squared(&y, &few.fit(&x, &y, 1, 0).unwrap().predict(&x, 1));
        let r2_many = r_squared(&y, &many.fit(&x, &y, 1, 0).unwrap().predict(&x, 1));
        assert!(r2_many > r2_few);
        assert!(r2_many > 0.95, "r2={r2_many}");
    }

    #[test]
    fn test_subsample_and_validation() {
        let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        let sub = GradientBoosting::new(GradientBoostingParams { subsample: 0.5, ..Default::default() });
        let a = sub.fit(&x, &y, 1, 9).unwrap().predict(&x, 1);
        let b = sub.fit(&x, &y, 1, 9).unwrap().predict(&x, 1);
        assert_eq!(a, b);

        let bad = GradientBoosting::new(GradientBoostingParams { subsample: 0.0, ..Default::default() });
        assert!(bad.fit(&x, &y, 1, 0).is_err());
    }
}
