//! Core traits for sovdml
//!
//! Nuisance models are a pluggable strategy: the cross-fitting driver in
//! `sd-inference` only sees [`Learner`] and [`Predictor`], never a concrete
//! model family.

use crate::Result;

/// A fitted regression function `x -> y_hat`.
pub trait Predictor: Send + Sync {
    /// Predict a single row of features.
    fn predict_row(&self, row: &[f64]) -> f64;

    /// Predict every row of a row-major `(n, p)` matrix.
    fn predict(&self, x: &[f64], p: usize) -> Vec<f64> {
        if p == 0 {
            return Vec::new();
        }
        x.chunks_exact(p).map(|row| self.predict_row(row)).collect()
    }
}

/// A regression learner that can be trained on a row-major design matrix.
pub trait Learner: Send + Sync {
    /// Short identifier used in logs and artifacts.
    fn name(&self) -> &str;

    /// Fit on `x` (row-major, `y.len()` rows by `p` columns) and `y`.
    ///
    /// `seed` drives any internal randomness (bootstrap, feature sampling).
    fn fit(&self, x: &[f64], y: &[f64], p: usize, seed: u64) -> Result<Box<dyn Predictor>>;
}
