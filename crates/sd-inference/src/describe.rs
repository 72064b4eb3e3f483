//! Descriptive tables of panel variables: summary statistics, pairwise
//! correlations and variance inflation factors.

use nalgebra::DMatrix;
use sd_core::{Error, Result};
use sd_panel::Panel;
use serde::{Deserialize, Serialize};

use crate::stats;

/// Summary statistics of one variable over its present cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    /// Column name.
    pub variable: String,
    /// Present cells.
    pub n: usize,
    /// Missing cells.
    pub n_missing: usize,
    /// Mean.
    pub mean: Option<f64>,
    /// Sample standard deviation (n − 1).
    pub sd: Option<f64>,
    /// Minimum.
    pub min: Option<f64>,
    /// 25th percentile.
    pub p25: Option<f64>,
    /// Median.
    pub median: Option<f64>,
    /// 75th percentile.
    pub p75: Option<f64>,
    /// Maximum.
    pub max: Option<f64>,
}

/// Pearson correlations over pairwise-complete rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    /// Row and column order.
    pub variables: Vec<String>,
    /// `r[i][j]`; `None` below two shared rows or without variance.
    pub r: Vec<Vec<Option<f64>>>,
    /// Rows where both variables are present.
    pub n: Vec<Vec<usize>>,
}

/// Variance inflation factor of one regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VifRow {
    /// Column name.
    pub variable: String,
    /// 1 / (1 − R²_j); `None` when the regressors are collinear.
    pub vif: Option<f64>,
    /// 1 / VIF.
    pub tolerance: Option<f64>,
    /// R² of the variable on the other regressors.
    pub r_squared: Option<f64>,
}

/// VIF table, computed on rows where every regressor is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VifTable {
    /// Complete rows used.
    pub n_complete: usize,
    /// Sorted by VIF, largest first; collinear variables last.
    pub rows: Vec<VifRow>,
}

/// Smallest eigenvalue of the correlation matrix, relative to the largest,
/// below which the regressors count as collinear.
const COLLINEARITY_TOL: f64 = 1e-10;

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

fn columns<'a>(panel: &'a Panel, variables: &[String]) -> Result<Vec<&'a [Option<f64>]>> {
    if variables.is_empty() {
        return Err(Error::Validation("describe: variable list is empty".into()));
    }
    variables.iter().map(|v| panel.values(v)).collect()
}

/// Count, moments and quartiles of each variable.
pub fn summary_stats(panel: &Panel, variables: &[String]) -> Result<Vec<SummaryRow>> {
    let cols = columns(panel, variables)?;
    Ok(variables
        .iter()
        .zip(cols)
        .map(|(name, col)| {
            let xs: Vec<f64> = col.iter().flatten().copied().collect();
            let s = stats::sorted(&xs);
            let q = |p: f64| finite(stats::quantile_linear_sorted(&s, p));
            SummaryRow {
                variable: name.clone(),
                n: xs.len(),
                n_missing: col.len() - xs.len(),
                mean: finite(stats::mean(&xs)),
                sd: finite(stats::sample_sd(&xs)),
                min: q(0.0),
                p25: q(0.25),
                median: q(0.5),
                p75: q(0.75),
                max: q(1.0),
            }
        })
        .collect())
}

fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> (Option<f64>, usize) {
    let (xs, ys): (Vec<f64>, Vec<f64>) =
        a.iter().zip(b).filter_map(|(x, y)| Some(((*x)?, (*y)?))).unzip();
    let n = xs.len();
    if n < 2 {
        return (None, n);
    }
    let (mx, my) = (stats::mean(&xs), stats::mean(&ys));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx) * (x - mx);
        syy += (y - my) * (y - my);
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return (None, n);
    }
    (Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)), n)
}

/// Pairwise-complete Pearson correlation matrix.
pub fn correlation_matrix(panel: &Panel, variables: &[String]) -> Result<CorrelationMatrix> {
    let cols = columns(panel, variables)?;
    let p = cols.len();
    let mut r = vec![vec![None; p]; p];
    let mut n = vec![vec![0; p]; p];
    for i in 0..p {
        for j in i..p {
            let (rij, nij) = pearson(cols[i], cols[j]);
            r[i][j] = rij;
            r[j][i] = rij;
            n[i][j] = nij;
            n[j][i] = nij;
        }
    }
    Ok(CorrelationMatrix { variables: variables.to_vec(), r, n })
}

/// Variance inflation factors from the inverse correlation matrix of the
/// complete rows: VIF_j = (R⁻¹)_jj.
pub fn vif_table(panel: &Panel, variables: &[String]) -> Result<VifTable> {
    let cols = columns(panel, variables)?;
    let p = cols.len();
    let complete: Vec<usize> =
        (0..panel.n_rows()).filter(|&i| cols.iter().all(|c| c[i].is_some())).collect();
    let n = complete.len();
    if n <= p {
        return Err(Error::Validation(format!(
            "VIF needs more complete rows than variables ({n} rows, {p} variables)"
        )));
    }

    let x = DMatrix::from_fn(n, p, |i, j| cols[j][complete[i]].unwrap_or(f64::NAN));
    let mut z = x.clone();
    for j in 0..p {
        let col: Vec<f64> = x.column(j).iter().copied().collect();
        let (m, sd) = (stats::mean(&col), stats::sample_sd(&col));
        for i in 0..n {
            z[(i, j)] = if sd > 0.0 { (x[(i, j)] - m) / sd } else { f64::NAN };
        }
    }
    let corr = z.transpose() * &z / (n - 1) as f64;
    let well_conditioned = corr.iter().all(|v| v.is_finite()) && {
        let eig = corr.clone().symmetric_eigen().eigenvalues;
        eig.min() > COLLINEARITY_TOL * eig.max().max(1.0)
    };
    let inverse = if well_conditioned { corr.try_inverse() } else { None };
    if inverse.is_none() {
        tracing::warn!(variables = p, rows = n, "VIF: regressors are collinear");
    }

    let mut rows: Vec<VifRow> = variables
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let vif = inverse.as_ref().map(|inv| inv[(j, j)]).filter(|v| v.is_finite());
            VifRow {
                variable: name.clone(),
                vif,
                tolerance: vif.map(|v| 1.0 / v),
                r_squared: vif.map(|v| (1.0 - 1.0 / v).max(0.0)),
            }
        })
        .collect();
    rows.sort_by(|a, b| match (a.vif, b.vif) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    Ok(VifTable { n_complete: n, rows })
}
