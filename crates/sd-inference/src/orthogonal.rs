//! Orthogonal effect regression: outcome residuals on treatment residuals,
//! no intercept, with Liang–Zeger cluster-robust standard errors.
//!
//! # References
//!
//! - Chernozhukov et al. (2018), "Double/debiased machine learning for
//!   treatment and structural parameters."
//! - Cameron & Miller (2015), "A Practitioner's Guide to Cluster-Robust Inference."

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use sd_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::stats::Reference;

/// Which standard error drives inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeKind {
    /// Homoskedastic.
    Naive,
    /// Cluster-robust.
    Clustered,
}

/// Effect estimate with inference. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectEstimate {
    /// Coefficient θ̂.
    pub theta: f64,
    /// Standard error used for inference.
    pub se: f64,
    /// Which SE `se` is.
    pub se_kind: SeKind,
    /// Homoskedastic SE.
    pub se_naive: f64,
    /// Cluster-robust SE, when clustering is on.
    pub se_cluster: Option<f64>,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
    /// Confidence level of the interval.
    pub confidence_level: f64,
    /// θ̂ / se.
    pub t_stat: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Reference distribution actually used (never `Auto`).
    pub reference: Reference,
    /// Degrees of freedom of the t reference (G − 1 clustered, n − 1 naive).
    pub df: f64,
    /// Observations.
    pub n_obs: usize,
    /// Clusters (when clustering is on).
    pub n_clusters: Option<usize>,
}

impl EffectEstimate {
    /// Build the Wald interval and p-value around `theta ± crit·se`.
    pub fn from_parts(
        theta: f64,
        se_naive: f64,
        se_cluster: Option<f64>,
        n_obs: usize,
        n_clusters: Option<usize>,
        level: f64,
        reference: Reference,
    ) -> Result<Self> {
        let (se, se_kind, df) = match (se_cluster, n_clusters) {
            (Some(s), Some(g)) => (s, SeKind::Clustered, g as f64 - 1.0),
            _ => (se_naive, SeKind::Naive, n_obs as f64 - 1.0),
        };
        let reference = reference.resolve(se_kind == SeKind::Clustered);
        let crit = reference.critical_value(level, df)?;
        let t_stat = if se > 0.0 { theta / se } else { f64::NAN };
        Ok(Self {
            theta,
            se,
            se_kind,
            se_naive,
            se_cluster,
            ci_lower: theta - crit * se,
            ci_upper: theta + crit * se,
            confidence_level: level,
            t_stat,
            p_value: reference.two_sided_p(t_stat, df)?,
            reference,
            df,
            n_obs,
            n_clusters,
        })
    }

    /// Whether the interval contains `value`.
    pub fn covers(&self, value: f64) -> bool {
        self.ci_lower <= value && value <= self.ci_upper
    }
}

/// Compute Liang–Zeger cluster-robust (HC0 sandwich) standard errors.
///
/// `V_CR = (X'X)^{-1} B (X'X)^{-1}` where `B = Σ_g X_g' e_g e_g' X_g`,
/// scaled by `G/(G−1) · (N−1)/(N−K)`.
pub fn cluster_robust_se(
    x: &DMatrix<f64>,
    residuals: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    cluster_ids: &[u64],
) -> Result<Vec<f64>> {
    let n = x.nrows();
    let p = x.ncols();
    if cluster_ids.len() != n || residuals.len() != n {
        return Err(Error::Validation(format!(
            "cluster_ids ({}) / residuals ({}) length != n ({n})",
            cluster_ids.len(),
            residuals.len()
        )));
    }

    let mut cluster_map: HashMap<u64, Vec<usize>> = HashMap::new();
    for (i, &cid) in cluster_ids.iter().enumerate() {
        cluster_map.entry(cid).or_default().push(i);
    }
    let g = cluster_map.len() as f64;

    let mut meat = DMatrix::<f64>::zeros(p, p);
    for indices in cluster_map.values() {
        // Score of the cluster: s_g = X_g' e_g
        let mut s_g = DVector::<f64>::zeros(p);
        for &i in indices {
            s_g += x.row(i).transpose() * residuals[i];
        }
        meat += &s_g * s_g.transpose();
    }

    let n_f = n as f64;
    let p_f = p as f64;
    let correction =
        if g > 1.0 && n_f > p_f { (g / (g - 1.0)) * ((n_f - 1.0) / (n_f - p_f)) } else { 1.0 };
    let vcr = (xtx_inv * &meat) * xtx_inv * correction;
    Ok((0..p).map(|j| vcr[(j, j)].max(0.0).sqrt()).collect())
}

/// Regress `y_res` on `d_res` without intercept.
///
/// θ̂ = Σ ṽũ / Σ ṽ². The naive SE is `sqrt(σ̂² / Σ ṽ²)` with σ̂² = RSS/(n − 1).
/// With `cluster_ids`, the clustered SE is reported and drives inference.
pub fn orthogonal_regression(
    y_res: &[f64],
    d_res: &[f64],
    cluster_ids: Option<&[u64]>,
    level: f64,
    reference: Reference,
) -> Result<EffectEstimate> {
    let n = y_res.len();
    if d_res.len() != n {
        return Err(Error::Validation(format!("residual lengths differ: {n} vs {}", d_res.len())));
    }
    if n < 2 {
        return Err(Error::Validation(format!("orthogonal regression needs >= 2 rows, got {n}")));
    }
    let svv: f64 = d_res.iter().map(|v| v * v).sum();
    if !(svv > 0.0) {
        return Err(Error::Computation("treatment residuals have zero variance".into()));
    }
    let theta = d_res.iter().zip(y_res).map(|(v, u)| v * u).sum::<f64>() / svv;
    let resid: Vec<f64> = y_res.iter().zip(d_res).map(|(u, v)| u - theta * v).collect();
    let rss: f64 = resid.iter().map(|e| e * e).sum();
    let se_naive = (rss / (n as f64 - 1.0) / svv).sqrt();

    let (se_cluster, n_clusters) = match cluster_ids {
        Some(ids) => {
            let x = DMatrix::from_column_slice(n, 1, d_res);
            let e = DVector::from_column_slice(&resid);
            let xtx_inv = DMatrix::from_element(1, 1, 1.0 / svv);
            let se = cluster_robust_se(&x, &e, &xtx_inv, ids)?;
            let mut distinct = ids.to_vec();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < 2 {
                return Err(Error::Computation("clustered SE needs at least 2 clusters".into()));
            }
            (Some(se[0]), Some(distinct.len()))
        }
        None => (None, None),
    };
    EffectEstimate::from_parts(theta, se_naive, se_cluster, n, n_clusters, level, reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_exact_slope_without_noise() {
        let v = [1.0, -2.0, 0.5, 3.0];
        let u: Vec<f64> = v.iter().map(|x| 1.5 * x).collect();
        let est = orthogonal_regression(&u, &v, None, 0.95, Reference::Normal).unwrap();
        assert_relative_eq!(est.theta, 1.5, epsilon = 1e-12);
        assert!(est.se < 1e-12);
        assert_eq!(est.se_kind, SeKind::Naive);
    }

    #[test]
    fn test_naive_se_formula() {
        let v = [1.0, 2.0, 3.0, 4.0];
        let u = [1.0, 2.5, 2.5, 4.5];
        let est = orthogonal_regression(&u, &v, None, 0.95, Reference::Normal).unwrap();
        let svv = 30.0;
        let theta = (1.0 + 5.0 + 7.5 + 18.0) / svv;
        let rss: f64 = v.iter().zip(&u).map(|(a, b)| (b - theta * a).powi(2)).sum();
        assert_relative_eq!(est.theta, theta, epsilon = 1e-12);
        assert_relative_eq!(est.se_naive, (rss / 3.0 / svv).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(est.ci_upper - est.theta, 1.959964 * est.se, epsilon = 1e-5);
    }

    #[test]
    fn test_clustered_exceeds_naive_with_cluster_level_noise() {
        let mut rng = StdRng::seed_from_u64(17);
        let (mut u, mut v, mut ids) = (Vec::new(), Vec::new(), Vec::new());
        for g in 0..20u64 {
            let vg: f64 = rng.random_range(-1.0..1.0);
            let eg: f64 = rng.random_range(-1.0..1.0);
            for _ in 0..15 {
                let vi = vg + 0.05 * rng.random_range(-1.0..1.0);
                v.push(vi);
                u.push(0.7 * vi + eg + 0.05 * rng.random_range(-1.0..1.0));
                ids.push(g);
            }
        }
        let est = orthogonal_regression(&u, &v, Some(&ids), 0.95, Reference::StudentT).unwrap();
        let se_cluster = est.se_cluster.unwrap();
        assert!(se_cluster > 2.0 * est.se_naive, "cluster {se_cluster} vs naive {}", est.se_naive);
        assert_eq!(est.se_kind, SeKind::Clustered);
        assert_eq!(est.n_clusters, Some(20));
        assert_relative_eq!(est.df, 19.0);
    }

    #[test]
    fn test_few_clusters_widen_the_default_interval() {
        let v = [1.0, -0.5, 0.8, -1.2, 0.3, 0.9];
        let u = [1.1, -0.2, 0.5, -1.5, 0.6, 0.7];
        let ids = [0, 0, 1, 1, 2, 2];
        let auto = orthogonal_regression(&u, &v, Some(&ids), 0.95, Reference::default()).unwrap();
        let normal = orthogonal_regression(&u, &v, Some(&ids), 0.95, Reference::Normal).unwrap();
        assert_eq!(auto.reference, Reference::StudentT);
        assert_relative_eq!(auto.df, 2.0);
        assert_relative_eq!(auto.theta, normal.theta);
        // t(2) critical value 4.303 vs 1.960.
        let ratio = (auto.ci_upper - auto.theta) / (normal.ci_upper - normal.theta);
        assert_relative_eq!(ratio, 4.302653 / 1.959964, epsilon = 1e-4);
        assert!(auto.p_value > normal.p_value);

        let naive = orthogonal_regression(&u, &v, None, 0.95, Reference::default()).unwrap();
        assert_eq!(naive.reference, Reference::Normal);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(orthogonal_regression(&[1.0, 2.0], &[0.0, 0.0], None, 0.95, Reference::Normal).is_err());
        assert!(orthogonal_regression(&[1.0], &[1.0], None, 0.95, Reference::Normal).is_err());
        assert!(orthogonal_regression(&[1.0, 2.0], &[1.0, 3.0], Some(&[4, 4]), 0.95, Reference::Normal).is_err());
    }
}
