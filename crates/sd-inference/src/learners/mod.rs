//! Nuisance learners.
//!
//! Every model family implements [`sd_core::Learner`]; [`LearnerSpec`] is the
//! serializable configuration that builds one.

mod boosting;
mod forest;
mod linear;
mod tree;

pub use boosting::{GradientBoosting, GradientBoostingParams};
pub use forest::{RandomForest, RandomForestParams};
pub use linear::{LinearModel, LinearParams, LinearRegression, Penalty, least_squares};
pub use tree::{RegressionTree, TreeLearner, TreeParams, grow_tree};

use sd_core::{Learner, Predictor, Result};
use serde::{Deserialize, Serialize};

/// Learner configuration, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearnerSpec {
    /// Constant (training mean) predictor.
    Mean,
    /// OLS / ridge / lasso with intercept.
    Linear(LinearParams),
    /// Single CART regression tree.
    Tree(TreeParams),
    /// Bagged trees with feature subsampling.
    RandomForest(RandomForestParams),
    /// Least-squares gradient boosting of shallow trees.
    GradientBoosting(GradientBoostingParams),
}

impl Default for LearnerSpec {
    fn default() -> Self {
        LearnerSpec::Linear(LinearParams::default())
    }
}

impl LearnerSpec {
    /// Instantiate the learner.
    pub fn build(&self) -> Box<dyn Learner> {
        match self {
            LearnerSpec::Mean => Box::new(MeanLearner),
            LearnerSpec::Linear(p) => Box::new(LinearRegression::new(p.clone())),
            LearnerSpec::Tree(p) => Box::new(TreeLearner::new(p.clone())),
            LearnerSpec::RandomForest(p) => Box::new(RandomForest::new(p.clone())),
            LearnerSpec::GradientBoosting(p) => Box::new(GradientBoosting::new(p.clone())),
        }
    }
}

/// Predicts the training mean everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanLearner;

struct Constant(f64);

impl Predictor for Constant {
    fn predict_row(&self, _row: &[f64]) -> f64 {
        self.0
    }
}

impl Learner for MeanLearner {
    fn name(&self) -> &str {
        "mean"
    }

    fn fit(&self, _x: &[f64], y: &[f64], _p: usize, _seed: u64) -> Result<Box<dyn Predictor>> {
        if y.is_empty() {
            return Err(sd_core::Error::Validation("cannot fit on zero rows".into()));
        }
        Ok(Box::new(Constant(y.iter().sum::<f64>() / y.len() as f64)))
    }
}

/// Validate the shape of a training set.
pub(crate) fn check_shape(x: &[f64], y: &[f64], p: usize) -> Result<usize> {
    let n = y.len();
    if n == 0 {
        return Err(sd_core::Error::Validation("cannot fit on zero rows".into()));
    }
    if p == 0 {
        return Err(sd_core::Error::Validation("p must be >= 1".into()));
    }
    if x.len() != n * p {
        return Err(sd_core::Error::Validation(format!("x length ({}) != n*p ({})", x.len(), n * p)));
    }
    Ok(n)
}
