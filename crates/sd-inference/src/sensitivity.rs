//! Omitted-variable sensitivity bounds.
//!
//! - Oster (2019): coefficient stability between the uncontrolled and the
//!   controlled OLS fit, scaled by the movement in R².
//! - Cinelli & Hazlett (2020): partial-R² robustness values of the
//!   orthogonal regression and bias-adjusted estimates on a confounder grid.

use nalgebra::{DMatrix, DVector};
use sd_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::data::DmlData;
use crate::learners::least_squares;
use crate::orthogonal::EffectEstimate;
use crate::stats;

fn default_rmax_multiplier() -> f64 {
    1.3
}

fn default_alpha() -> f64 {
    0.05
}

fn default_grid() -> Vec<f64> {
    vec![0.01, 0.02, 0.05, 0.1, 0.2]
}

/// Sensitivity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensitivityConfig {
    /// R_max = min(multiplier · R̂², 1).
    #[serde(default = "default_rmax_multiplier")]
    pub rmax_multiplier: f64,
    /// Significance level of RV_α and of the adjusted intervals.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Confounder partial R² values; the grid is their cross product.
    #[serde(default = "default_grid")]
    pub r2_grid: Vec<f64>,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self { rmax_multiplier: default_rmax_multiplier(), alpha: default_alpha(), r2_grid: default_grid() }
    }
}

/// Oster δ bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsterBounds {
    /// β̃, y on d.
    pub beta_uncontrolled: f64,
    /// R̃².
    pub r2_uncontrolled: f64,
    /// β̂, y on d and controls.
    pub beta_controlled: f64,
    /// R̂².
    pub r2_controlled: f64,
    /// R_max.
    pub r_max: f64,
    /// δ that drives the coefficient to zero (undefined when the
    /// coefficient or R² does not move).
    pub delta_star: Option<f64>,
    /// Bias-adjusted β at δ = 1.
    pub beta_star: Option<f64>,
}

/// δ* and β*(δ = 1) from the two fits.
pub fn oster_delta(
    beta_u: f64,
    r2_u: f64,
    beta_c: f64,
    r2_c: f64,
    r_max: f64,
) -> (Option<f64>, Option<f64>) {
    let movement = beta_u - beta_c;
    let headroom = r_max - r2_c;
    let gained = r2_c - r2_u;
    let finite = |v: f64| v.is_finite().then_some(v);
    let delta = (movement * headroom != 0.0).then(|| beta_c * gained / (movement * headroom)).and_then(finite);
    let beta = (gained != 0.0).then(|| beta_c - movement * headroom / gained).and_then(finite);
    (delta, beta)
}

fn ols_fit(design: DMatrix<f64>, y: &DVector<f64>) -> Result<(f64, f64)> {
    let beta = least_squares(&design, y)?;
    let fitted = &design * &beta;
    Ok((beta[1], stats::r_squared(y.as_slice(), fitted.as_slice())))
}

/// Oster bounds from OLS fits with an intercept.
pub fn oster_bounds(data: &DmlData, rmax_multiplier: f64) -> Result<OsterBounds> {
    let n = data.n();
    if n <= data.p + 2 {
        return Err(Error::Validation(format!("Oster bounds need more than {} rows, got {n}", data.p + 2)));
    }
    let y = DVector::from_column_slice(&data.y);
    let short = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { data.d[i] });
    let long = DMatrix::from_fn(n, data.p + 2, |i, j| match j {
        0 => 1.0,
        1 => data.d[i],
        _ => data.x_row(i)[j - 2],
    });
    let (beta_u, r2_u) = ols_fit(short, &y)?;
    let (beta_c, r2_c) = ols_fit(long, &y)?;
    if !(r2_c.is_finite() && r2_u.is_finite()) {
        return Err(Error::Computation("outcome has no variance".into()));
    }
    let r_max = (rmax_multiplier * r2_c).min(1.0);
    let (delta_star, beta_star) = oster_delta(beta_u, r2_u, beta_c, r2_c, r_max);
    Ok(OsterBounds {
        beta_uncontrolled: beta_u,
        r2_uncontrolled: r2_u,
        beta_controlled: beta_c,
        r2_controlled: r2_c,
        r_max,
        delta_star,
        beta_star,
    })
}

/// Estimate adjusted for a confounder with the given partial R².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Confounder partial R² with the treatment.
    pub r2_dz: f64,
    /// Confounder partial R² with the outcome.
    pub r2_yz: f64,
    /// Absolute bias.
    pub bias: f64,
    /// Estimate moved towards zero by the bias.
    pub adjusted_theta: f64,
    /// Adjusted standard error.
    pub adjusted_se: f64,
    /// Lower bound of the adjusted interval.
    pub adjusted_lower: f64,
    /// Upper bound of the adjusted interval.
    pub adjusted_upper: f64,
}

/// Cinelli–Hazlett partial-R² summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialR2Bounds {
    /// Residual degrees of freedom (n − 1).
    pub df: f64,
    /// t statistic of the estimate.
    pub t_stat: f64,
    /// Partial R² of the treatment with the outcome, t²/(t² + df).
    pub partial_r2: f64,
    /// Robustness value for reducing the estimate to zero.
    pub rv: f64,
    /// Robustness value for losing significance at `alpha`.
    pub rv_alpha: f64,
    /// Significance level of `rv_alpha`.
    pub alpha: f64,
    /// Adjusted estimates.
    pub grid: Vec<GridPoint>,
}

fn robustness_value(f: f64) -> f64 {
    if f <= 0.0 {
        return 0.0;
    }
    let f2 = f * f;
    0.5 * ((f2 * f2 + 4.0 * f2).sqrt() - f2)
}

/// Adjust `theta` for a confounder with partial R² `r2_dz` and `r2_yz`.
pub fn adjusted_point(theta: f64, se: f64, df: f64, r2_dz: f64, r2_yz: f64, crit: f64) -> Result<GridPoint> {
    if !(0.0..1.0).contains(&r2_dz) || !(0.0..1.0).contains(&r2_yz) {
        return Err(Error::Validation(format!("partial R² must be in [0, 1): ({r2_dz}, {r2_yz})")));
    }
    let bias = se * (r2_yz * r2_dz / (1.0 - r2_dz)).sqrt() * df.sqrt();
    let adjusted_theta = theta.signum() * (theta.abs() - bias);
    let adjusted_se = se * ((1.0 - r2_yz) / (1.0 - r2_dz)).sqrt() * (df / (df - 1.0)).sqrt();
    Ok(GridPoint {
        r2_dz,
        r2_yz,
        bias,
        adjusted_theta,
        adjusted_se,
        adjusted_lower: adjusted_theta - crit * adjusted_se,
        adjusted_upper: adjusted_theta + crit * adjusted_se,
    })
}

/// Partial-R² bounds of an orthogonal-regression estimate.
pub fn partial_r2_bounds(estimate: &EffectEstimate, alpha: f64, r2_grid: &[f64]) -> Result<PartialR2Bounds> {
    let df = estimate.n_obs as f64 - 1.0;
    if df < 3.0 {
        return Err(Error::Validation(format!("partial R² bounds need n >= 4, got {}", estimate.n_obs)));
    }
    if !(estimate.se > 0.0) {
        return Err(Error::Computation("estimate has zero standard error".into()));
    }
    let t = estimate.theta / estimate.se;
    let crit = stats::t_critical(alpha, df - 1.0)?;
    let f = t.abs() / df.sqrt();
    let f_alpha = (f - crit / (df - 1.0).sqrt()).max(0.0);

    let mut grid = Vec::with_capacity(r2_grid.len() * r2_grid.len());
    for &r2_dz in r2_grid {
        for &r2_yz in r2_grid {
            grid.push(adjusted_point(estimate.theta, estimate.se, df, r2_dz, r2_yz, crit)?);
        }
    }
    Ok(PartialR2Bounds {
        df,
        t_stat: t,
        partial_r2: t * t / (t * t + df),
        rv: robustness_value(f),
        rv_alpha: robustness_value(f_alpha),
        alpha,
        grid,
    })
}

/// Both sensitivity analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    /// Oster δ bounds.
    pub oster: OsterBounds,
    /// Cinelli–Hazlett bounds.
    pub partial_r2: PartialR2Bounds,
}

/// One line of `sensitivity.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityRow {
    /// `oster`, `partial_r2` or `grid`.
    pub analysis: &'static str,
    /// Quantity name.
    pub measure: &'static str,
    /// Grid coordinate, for grid rows.
    pub r2_dz: Option<f64>,
    /// Grid coordinate, for grid rows.
    pub r2_yz: Option<f64>,
    /// Value (empty when undefined).
    pub value: Option<f64>,
}

impl SensitivityReport {
    /// Flatten into tabular rows.
    pub fn rows(&self) -> Vec<SensitivityRow> {
        let scalar = |analysis, measure, value| SensitivityRow { analysis, measure, r2_dz: None, r2_yz: None, value };
        let o = &self.oster;
        let p = &self.partial_r2;
        let mut rows = vec![
            scalar("oster", "beta_uncontrolled", Some(o.beta_uncontrolled)),
            scalar("oster", "r2_uncontrolled", Some(o.r2_uncontrolled)),
            scalar("oster", "beta_controlled", Some(o.beta_controlled)),
            scalar("oster", "r2_controlled", Some(o.r2_controlled)),
            scalar("oster", "r_max", Some(o.r_max)),
            scalar("oster", "delta_star", o.delta_star),
            scalar("oster", "beta_star", o.beta_star),
            scalar("partial_r2", "partial_r2", Some(p.partial_r2)),
            scalar("partial_r2", "rv", Some(p.rv)),
            scalar("partial_r2", "rv_alpha", Some(p.rv_alpha)),
        ];
        for g in &p.grid {
            for (measure, value) in [
                ("adjusted_theta", g.adjusted_theta),
                ("adjusted_se", g.adjusted_se),
                ("adjusted_lower", g.adjusted_lower),
                ("adjusted_upper", g.adjusted_upper),
            ] {
                rows.push(SensitivityRow {
                    analysis: "grid",
                    measure,
                    r2_dz: Some(g.r2_dz),
                    r2_yz: Some(g.r2_yz),
                    value: Some(value),
                });
            }
        }
        rows
    }
}

/// Run both analyses.
pub fn sensitivity_analysis(
    data: &DmlData,
    estimate: &EffectEstimate,
    config: &SensitivityConfig,
) -> Result<SensitivityReport> {
    let oster = oster_bounds(data, config.rmax_multiplier)?;
    let partial_r2 = partial_r2_bounds(estimate, config.alpha, &config.r2_grid)?;
    tracing::info!(
        delta_star = ?oster.delta_star,
        beta_star = ?oster.beta_star,
        rv = partial_r2.rv,
        rv_alpha = partial_r2.rv_alpha,
        "sensitivity bounds"
    );
    Ok(SensitivityReport { oster, partial_r2 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::{SyntheticConfig, synthetic_data};
    use crate::stats::Reference;
    use approx::assert_relative_eq;

    #[test]
    fn test_oster_formulas() {
        let (delta, beta) = oster_delta(1.0, 0.2, 0.8, 0.5, 0.65);
        assert_relative_eq!(delta.unwrap(), 8.0, epsilon = 1e-12);
        assert_relative_eq!(beta.unwrap(), 0.7, epsilon = 1e-12);
        assert_eq!(oster_delta(1.0, 0.2, 1.0, 0.5, 0.65).0, None);
        assert_eq!(oster_delta(1.0, 0.5, 0.8, 0.5, 0.65).1, None);
    }

    #[test]
    fn test_oster_on_synthetic_panel() {
        let data = synthetic_data(&SyntheticConfig { n_countries: 20, n_months: 30, noise_sd: 0.5, ..Default::default() }).unwrap();
        let o = oster_bounds(&data, 1.3).unwrap();
        assert!((o.beta_controlled - 2.0).abs() < 0.2, "beta {}", o.beta_controlled);
        assert!(o.r2_controlled >= o.r2_uncontrolled);
        assert_relative_eq!(o.r_max, (1.3 * o.r2_controlled).min(1.0));
    }

    #[test]
    fn test_robustness_value_nullifies_estimate() {
        let est = EffectEstimate::from_parts(0.3, 0.1, None, 100, None, 0.95, Reference::Normal).unwrap();
        let b = partial_r2_bounds(&est, 0.05, &[0.01, 0.1]).unwrap();
        assert_relative_eq!(b.partial_r2, 9.0 / 108.0, epsilon = 1e-12);
        assert!(b.rv_alpha < b.rv);
        let crit = stats::t_critical(0.05, b.df - 1.0).unwrap();
        let at_rv = adjusted_point(est.theta, est.se, b.df, b.rv, b.rv, crit).unwrap();
        assert_relative_eq!(at_rv.adjusted_theta, 0.0, epsilon = 1e-10);
        assert_eq!(b.grid.len(), 4);
        assert!(b.grid.iter().all(|g| g.adjusted_theta < est.theta));
    }

    #[test]
    fn test_insignificant_estimate_has_zero_rv_alpha() {
        let est = EffectEstimate::from_parts(0.1, 0.1, None, 50, None, 0.95, Reference::Normal).unwrap();
        let b = partial_r2_bounds(&est, 0.05, &[]).unwrap();
        assert_eq!(b.rv_alpha, 0.0);
        assert!(b.rv > 0.0);
        assert!(adjusted_point(0.1, 0.1, 49.0, 1.0, 0.1, 2.0).is_err());
    }
}
