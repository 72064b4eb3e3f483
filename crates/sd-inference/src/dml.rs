//! DML driver: cross-fitting, orthogonal regression and aggregation over
//! repeated sample splits.

use sd_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::crossfit::{CrossFitResult, NuisanceConfig, cross_fit};
use crate::data::{ClusterVar, DmlData};
use crate::orthogonal::{EffectEstimate, orthogonal_regression};
use crate::stats::{self, Reference};

fn default_repetitions() -> usize {
    1
}

fn default_seed() -> u64 {
    42
}

fn default_level() -> f64 {
    0.95
}

fn default_mean_tolerance() -> f64 {
    0.1
}

/// Estimator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DmlConfig {
    /// Nuisance estimation.
    #[serde(default)]
    pub nuisance: NuisanceConfig,
    /// Independent fold draws; seeds are `seed + r`.
    #[serde(default = "default_repetitions")]
    pub n_repetitions: usize,
    /// Seed of the first fold draw.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Confidence level.
    #[serde(default = "default_level")]
    pub confidence_level: f64,
    /// Reference distribution.
    #[serde(default)]
    pub reference: Reference,
    /// Residual means beyond this many standard deviations are flagged.
    #[serde(default = "default_mean_tolerance")]
    pub residual_mean_tolerance: f64,
}

impl Default for DmlConfig {
    fn default() -> Self {
        Self {
            nuisance: NuisanceConfig::default(),
            n_repetitions: default_repetitions(),
            seed: default_seed(),
            confidence_level: default_level(),
            reference: Reference::default(),
            residual_mean_tolerance: default_mean_tolerance(),
        }
    }
}

/// One sample split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repetition {
    /// Repetition index.
    pub repetition: usize,
    /// Estimate of this split.
    pub estimate: EffectEstimate,
    /// Cross-fitting output.
    pub crossfit: CrossFitResult,
}

/// Estimator output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmlFit {
    /// Aggregated estimate (equal to the single split when `n_repetitions == 1`).
    pub estimate: EffectEstimate,
    /// Per-split results.
    pub repetitions: Vec<Repetition>,
    /// Statistical-quality warnings.
    pub warnings: Vec<String>,
}

fn residual_mean_warnings(cf: &CrossFitResult, tolerance: f64, repetition: usize) -> Vec<String> {
    let mut out = Vec::new();
    let y: Vec<f64> = cf.residuals.iter().map(|r| r.y_res).collect();
    let d: Vec<f64> = cf.residuals.iter().map(|r| r.d_res).collect();
    for (label, v) in [("outcome", &y), ("treatment", &d)] {
        let m = stats::mean(v);
        let sd = stats::sample_sd(v);
        if sd.is_finite() && m.abs() > tolerance * sd {
            tracing::warn!(repetition, residual = label, mean = m, sd, "residual mean far from zero");
            out.push(format!(
                "repetition {repetition}: {label} residual mean {m:.4} exceeds {tolerance}·sd ({sd:.4})"
            ));
        }
    }
    out
}

/// Estimate one split with a given seed.
pub fn estimate_split(data: &DmlData, config: &DmlConfig, seed: u64) -> Result<(EffectEstimate, CrossFitResult)> {
    let cf = cross_fit(data, &config.nuisance, seed)?;
    let y_res: Vec<f64> = cf.residuals.iter().map(|r| r.y_res).collect();
    let d_res: Vec<f64> = cf.residuals.iter().map(|r| r.d_res).collect();
    let clusters: Option<Vec<u64>> = (data.cluster != ClusterVar::None)
        .then(|| cf.residuals.iter().map(|r| data.cluster_ids[r.row]).collect());
    let est = orthogonal_regression(
        &y_res,
        &d_res,
        clusters.as_deref(),
        config.confidence_level,
        config.reference,
    )?;
    Ok((est, cf))
}

/// Aggregate split estimates: θ̃ = median θ̂ᵣ and
/// SE = sqrt(median(SEᵣ² + (θ̂ᵣ − θ̃)²)).
pub fn aggregate(estimates: &[EffectEstimate], level: f64, reference: Reference) -> Result<EffectEstimate> {
    let first = estimates
        .first()
        .ok_or_else(|| Error::Validation("no estimates to aggregate".into()))?;
    if estimates.len() == 1 {
        return Ok(first.clone());
    }
    let thetas: Vec<f64> = estimates.iter().map(|e| e.theta).collect();
    let theta = stats::median(&thetas);
    let adj = |se: f64, t: f64| se * se + (t - theta) * (t - theta);
    let se = stats::median(&estimates.iter().map(|e| adj(e.se, e.theta)).collect::<Vec<_>>()).sqrt();
    let se_naive = stats::median(&estimates.iter().map(|e| adj(e.se_naive, e.theta)).collect::<Vec<_>>()).sqrt();
    let se_cluster = first.se_cluster.map(|_| se);
    let n_obs = estimates.iter().map(|e| e.n_obs).min().unwrap_or(first.n_obs);
    let n_clusters = estimates.iter().filter_map(|e| e.n_clusters).min();
    EffectEstimate::from_parts(theta, se_naive, se_cluster, n_obs, n_clusters, level, reference)
}

/// Run the full estimator.
pub fn estimate_dml(data: &DmlData, config: &DmlConfig) -> Result<DmlFit> {
    if config.n_repetitions == 0 {
        return Err(Error::Validation("n_repetitions must be >= 1".into()));
    }
    let mut repetitions = Vec::with_capacity(config.n_repetitions);
    let mut warnings = Vec::new();
    for r in 0..config.n_repetitions {
        let seed = config.seed.wrapping_add(r as u64);
        let (estimate, crossfit) = estimate_split(data, config, seed)?;
        warnings.extend(crossfit.warnings().into_iter().map(|w| format!("repetition {r}, {w}")));
        warnings.extend(residual_mean_warnings(&crossfit, config.residual_mean_tolerance, r));
        tracing::debug!(repetition = r, seed, theta = estimate.theta, se = estimate.se, "split estimated");
        repetitions.push(Repetition { repetition: r, estimate, crossfit });
    }

    let estimates: Vec<EffectEstimate> = repetitions.iter().map(|r| r.estimate.clone()).collect();
    let estimate = aggregate(&estimates, config.confidence_level, config.reference)?;
    if let Some(g) = estimate.n_clusters
        && g < stats::FEW_CLUSTERS
        && estimate.reference == Reference::Normal
    {
        tracing::warn!(clusters = g, "normal reference with few clusters; intervals are too narrow");
        warnings.push(format!(
            "normal reference with only {g} clusters understates the interval; use reference: student_t or auto"
        ));
    }
    if estimates.len() > 1 {
        let lo = estimates.iter().map(|e| e.theta).fold(f64::INFINITY, f64::min);
        let hi = estimates.iter().map(|e| e.theta).fold(f64::NEG_INFINITY, f64::max);
        if hi - lo > estimate.se {
            tracing::warn!(spread = hi - lo, se = estimate.se, "estimates unstable across sample splits");
            warnings.push(format!(
                "estimate spread across {} splits ({:.4}) exceeds the aggregated SE ({:.4})",
                estimates.len(),
                hi - lo,
                estimate.se
            ));
        }
    }
    tracing::info!(
        theta = estimate.theta,
        se = estimate.se,
        p_value = estimate.p_value,
        n = estimate.n_obs,
        warnings = warnings.len(),
        "DML estimate"
    );
    Ok(DmlFit { estimate, repetitions, warnings })
}
