//! Linear nuisance models: OLS, ridge and lasso, all with an unpenalized
//! intercept.

use nalgebra::{DMatrix, DVector};
use sd_core::{Error, Learner, Predictor, Result};
use serde::{Deserialize, Serialize};

use super::check_shape;

/// Regularization of a linear model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Penalty {
    /// Ordinary least squares (minimum-norm solution when collinear).
    #[default]
    None,
    /// L2 penalty `alpha · ||β||²`.
    Ridge,
    /// L1 penalty `alpha · ||β||₁` on standardized features.
    Lasso,
}

/// Linear learner settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinearParams {
    /// Penalty family.
    pub penalty: Penalty,
    /// Penalty strength (ignored for OLS).
    pub alpha: f64,
    /// Lasso coordinate-descent iteration cap.
    pub max_iter: usize,
    /// Lasso convergence tolerance on the largest coefficient change.
    pub tol: f64,
}

impl Default for LinearParams {
    fn default() -> Self {
        Self { penalty: Penalty::None, alpha: 1.0, max_iter: 1000, tol: 1e-7 }
    }
}

/// Fitted `y = intercept + x·β`.
#[derive(Debug, Clone)]
pub struct LinearModel {
    /// Intercept.
    pub intercept: f64,
    /// Slopes.
    pub coefficients: Vec<f64>,
}

impl Predictor for LinearModel {
    fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept + row.iter().zip(&self.coefficients).map(|(a, b)| a * b).sum::<f64>()
    }
}

/// Minimum-norm least-squares solution of `x β ≈ y` through the normal
/// equations and an SVD pseudo-inverse of `X'X`. Rank deficiency (e.g. a
/// full set of dummies next to an intercept) is handled by truncating tiny
/// singular values.
pub fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Result<DVector<f64>> {
    let xtx = x.transpose() * x;
    let xty = x.transpose() * y;
    let svd = xtx.svd(true, true);
    let max_sv = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    let eps = max_sv * 1e-10 * (x.ncols().max(1) as f64);
    svd.solve(&xty, eps).map_err(|e| Error::Computation(format!("least squares: {e}")))
}

/// Column means of a row-major matrix.
fn column_means(x: &[f64], n: usize, p: usize) -> Vec<f64> {
    let mut m = vec![0.0; p];
    for row in x.chunks_exact(p) {
        for (a, b) in m.iter_mut().zip(row) {
            *a += b;
        }
    }
    m.iter_mut().for_each(|v| *v /= n as f64);
    m
}

/// OLS / ridge / lasso learner.
#[derive(Debug, Clone)]
pub struct LinearRegression {
    params: LinearParams,
}

impl LinearRegression {
    /// New learner.
    pub fn new(params: LinearParams) -> Self {
        Self { params }
    }

    fn fit_model(&self, x: &[f64], y: &[f64], p: usize) -> Result<LinearModel> {
        let n = check_shape(x, y, p)?;
        if self.params.penalty != Penalty::None && !(self.params.alpha >= 0.0) {
            return Err(Error::Validation(format!("alpha must be >= 0, got {}", self.params.alpha)));
        }
        let x_mean = column_means(x, n, p);
        let y_mean = y.iter().sum::<f64>() / n as f64;
        let xc = DMatrix::from_fn(n, p, |i, j| x[i * p + j] - x_mean[j]);
        let yc = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

        let beta: Vec<f64> = match self.params.penalty {
            Penalty::None => least_squares(&xc, &yc)?.iter().copied().collect(),
            Penalty::Ridge => {
                let mut xtx = xc.transpose() * &xc;
                for j in 0..p {
                    xtx[(j, j)] += self.params.alpha;
                }
                let xty = xc.transpose() * &yc;
                match xtx.clone().cholesky() {
                    Some(ch) => ch.solve(&xty).iter().copied().collect(),
                    None => {
                        let svd = xtx.svd(true, true);
                        svd.solve(&xty, 1e-12)
                            .map_err(|e| Error::Computation(format!("ridge solve: {e}")))?
                            .iter()
                            .copied()
                            .collect()
                    }
                }
            }
            Penalty::Lasso => lasso_coordinate_descent(&xc, &yc, &self.params)?,
        };
        let intercept = y_mean - beta.iter().zip(&x_mean).map(|(b, m)| b * m).sum::<f64>();
        Ok(LinearModel { intercept, coefficients: beta })
    }
}

/// Cyclic coordinate descent for `(1/2n)||y − Xβ||² + α||β||₁` on centered
/// data; features are standardized internally and coefficients returned on
/// the original scale. Constant columns get a zero coefficient.
fn lasso_coordinate_descent(xc: &DMatrix<f64>, yc: &DVector<f64>, params: &LinearParams) -> Result<Vec<f64>> {
    let (n, p) = xc.shape();
    let nf = n as f64;
    let scale: Vec<f64> = (0..p).map(|j| (xc.column(j).norm_squared() / nf).sqrt()).collect();
    let z = DMatrix::from_fn(n, p, |i, j| if scale[j] > 0.0 { xc[(i, j)] / scale[j] } else { 0.0 });

    let mut beta = vec![0.0_f64; p];
    let mut resid = yc.clone();
    let soft = |v: f64, t: f64| v.signum() * (v.abs() - t).max(0.0);

    for _ in 0..params.max_iter {
        let mut max_delta = 0.0_f64;
        for j in 0..p {
            if scale[j] == 0.0 {
                continue;
            }
            let col = z.column(j);
            // Columns have unit mean square, so the coordinate update has no denominator.
            let rho = col.dot(&resid) / nf + beta[j];
            let new = soft(rho, params.alpha);
            let delta = new - beta[j];
            if delta != 0.0 {
                resid.axpy(-delta, &col, 1.0);
                beta[j] = new;
                max_delta = max_delta.max(delta.abs());
            }
        }
        if max_delta < params.tol {
            return Ok(beta.iter().zip(&scale).map(|(b, s)| if *s > 0.0 { b / s } else { 0.0 }).collect());
        }
    }
    Err(Error::Computation(format!("lasso did not converge in {} iterations", params.max_iter)))
}

impl Learner for LinearRegression {
    fn name(&self) -> &str {
        match self.params.penalty {
            Penalty::None => "ols",
            Penalty::Ridge => "ridge",
            Penalty::Lasso => "lasso",
        }
    }

    fn fit(&self, x: &[f64], y: &[f64], p: usize, _seed: u64) -> Result<Box<dyn Predictor>> {
        Ok(Box::new(self.fit_model(x, y, p)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn design() -> (Vec<f64>, Vec<f64>) {
        // y = 1 + 2 x1 - 3 x2
        let rows = [[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 5.0], [4.0, 2.0], [5.0, 3.0]];
        let x: Vec<f64> = rows.iter().flatten().copied().collect();
        let y = rows.iter().map(|r| 1.0 + 2.0 * r[0] - 3.0 * r[1]).collect();
        (x, y)
    }

    #[test]
    fn test_ols_recovers_coefficients() {
        let (x, y) = design();
        let m = LinearRegression::new(LinearParams::default()).fit_model(&x, &y, 2).unwrap();
        assert_relative_eq!(m.intercept, 1.0, epsilon = 1e-8);
        assert_relative_eq!(m.coefficients[0], 2.0, epsilon = 1e-8);
        assert_relative_eq!(m.coefficients[1], -3.0, epsilon = 1e-8);
    }

    #[test]
    fn test_ols_handles_collinear_dummies() {
        // Two exhaustive dummies plus intercept: rank deficient.
        let x = vec![1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0];
        let y = vec![1.0, 1.2, 5.0, 5.2];
        let m = LinearRegression::new(LinearParams::default()).fit(&x, &y, 2, 0).unwrap();
        let pred = m.predict(&x, 2);
        assert_relative_eq!(pred[0], 1.1, epsilon = 1e-8);
        assert_relative_eq!(pred[2], 5.1, epsilon = 1e-8);
    }

    #[test]
    fn test_ridge_shrinks_and_lasso_selects() {
        let (x, y) = design();
        let ols = LinearRegression::new(LinearParams::default()).fit_model(&x, &y, 2).unwrap();
        let ridge = LinearRegression::new(LinearParams { penalty: Penalty::Ridge, alpha: 50.0, ..Default::default() })
            .fit_model(&x, &y, 2)
            .unwrap();
        assert!(ridge.coefficients[1].abs() < ols.coefficients[1].abs());

        let lasso_small = LinearRegression::new(LinearParams { penalty: Penalty::Lasso, alpha: 1e-6, ..Default::default() })
            .fit_model(&x, &y, 2)
            .unwrap();
        assert_relative_eq!(lasso_small.coefficients[0], 2.0, epsilon = 1e-3);
        let lasso_big = LinearRegression::new(LinearParams { penalty: Penalty::Lasso, alpha: 1e6, ..Default::default() })
            .fit_model(&x, &y, 2)
            .unwrap();
        assert_eq!(lasso_big.coefficients, vec![0.0, 0.0]);
        assert_relative_eq!(lasso_big.intercept, y.iter().sum::<f64>() / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_errors() {
        let l = LinearRegression::new(LinearParams::default());
        assert!(l.fit(&[1.0], &[1.0, 2.0], 1, 0).is_err());
        assert!(l.fit(&[], &[], 1, 0).is_err());
    }
}
