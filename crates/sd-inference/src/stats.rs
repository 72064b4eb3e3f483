//! Small numeric helpers: quantiles, moments and reference distributions.

use sd_core::{Error, Result};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

const PROB_EPS: f64 = 1e-12;

/// Below this many clusters a normal reference understates the interval width.
pub const FEW_CLUSTERS: usize = 10;

/// Reference distribution for Wald inference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// Student t with G − 1 degrees of freedom for clustered SEs, standard
    /// normal otherwise. Unresolved, it behaves as `Normal`.
    #[default]
    Auto,
    /// Standard normal.
    Normal,
    /// Student t with the supplied degrees of freedom.
    StudentT,
}

impl Reference {
    /// Concrete distribution for an estimate with or without clustered SEs.
    pub fn resolve(self, clustered: bool) -> Reference {
        match self {
            Reference::Auto if clustered => Reference::StudentT,
            Reference::Auto => Reference::Normal,
            other => other,
        }
    }

    /// Two-sided critical value at `level` (e.g. 1.96 for 0.95, normal).
    pub fn critical_value(self, level: f64, df: f64) -> Result<f64> {
        if !(level > 0.0 && level < 1.0) {
            return Err(Error::Validation(format!("confidence level must be in (0, 1), got {level}")));
        }
        let p = (1.0 - (1.0 - level) / 2.0).clamp(PROB_EPS, 1.0 - PROB_EPS);
        match self {
            Reference::Auto | Reference::Normal => Ok(standard_normal()?.inverse_cdf(p)),
            Reference::StudentT => Ok(student_t(df)?.inverse_cdf(p)),
        }
    }

    /// Two-sided p-value of a t/z statistic.
    pub fn two_sided_p(self, stat: f64, df: f64) -> Result<f64> {
        if !stat.is_finite() {
            return Ok(if stat.is_nan() { f64::NAN } else { 0.0 });
        }
        let upper = match self {
            Reference::Auto | Reference::Normal => standard_normal()?.cdf(-stat.abs()),
            Reference::StudentT => student_t(df)?.cdf(-stat.abs()),
        };
        Ok((2.0 * upper).min(1.0))
    }
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| Error::Computation(format!("normal distribution: {e}")))
}

fn student_t(df: f64) -> Result<StudentsT> {
    if !(df > 0.0) {
        return Err(Error::Computation(format!("Student t needs df > 0, got {df}")));
    }
    StudentsT::new(0.0, 1.0, df).map_err(|e| Error::Computation(format!("Student t distribution: {e}")))
}

/// Two-sided Student-t critical value at significance `alpha`.
pub fn t_critical(alpha: f64, df: f64) -> Result<f64> {
    Reference::StudentT.critical_value(1.0 - alpha, df)
}

/// Arithmetic mean; `NaN` for empty input.
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation (n − 1); `NaN` below two values.
pub fn sample_sd(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return f64::NAN;
    }
    let m = mean(xs);
    let ss: f64 = xs.iter().map(|x| (x - m) * (x - m)).sum();
    (ss / (xs.len() - 1) as f64).sqrt()
}

/// Quantile of sorted data via linear interpolation.
///
/// - `q=0` returns min
/// - `q=1` returns max
/// - empty input returns `NaN`
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let w = pos - lo as f64;
    sorted[lo] * (1.0 - w) + sorted[hi] * w
}

/// Sort a copy of `xs` (NaN last).
pub fn sorted(xs: &[f64]) -> Vec<f64> {
    let mut v = xs.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

/// Median; `NaN` for empty input.
pub fn median(xs: &[f64]) -> f64 {
    quantile_linear_sorted(&sorted(xs), 0.5)
}

/// Out-of-sample R² = 1 − SSE / SST, with SST around the mean of `y`.
/// `NaN` when `y` has no variance.
pub fn r_squared(y: &[f64], y_hat: &[f64]) -> f64 {
    let m = mean(y);
    let sst: f64 = y.iter().map(|v| (v - m) * (v - m)).sum();
    let sse: f64 = y.iter().zip(y_hat).map(|(a, b)| (a - b) * (a - b)).sum();
    if sst > 0.0 { 1.0 - sse / sst } else { f64::NAN }
}
