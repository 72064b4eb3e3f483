//! Placebo inference: re-estimate with a treatment that should have no
//! effect and compare the real estimate against the placebo distribution.
//!
//! - Draws run in parallel on the rayon pool.
//! - Randomness is deterministic via per-draw seeding (`seed + draw`),
//!   independent of threading.
//! - Failed draws are counted, never dropped silently.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use sd_core::{Error, Result};
use sd_panel::Panel;
use serde::{Deserialize, Serialize};

use crate::data::DmlData;
use crate::dml::{DmlConfig, estimate_split};
use crate::orthogonal::EffectEstimate;
use crate::stats;

/// How the placebo treatment is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceboKind {
    /// Global shuffle of the treatment.
    #[default]
    Permutation,
    /// Shuffle within each country.
    WithinCountry,
    /// Treatment of the same country `lag_months` earlier.
    Lag,
    /// An unrelated panel column.
    Variable,
}

fn default_draws() -> usize {
    100
}

fn default_seed() -> u64 {
    2024
}

fn default_lag_months() -> u32 {
    12
}

/// Placebo settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaceboConfig {
    /// Placebo construction.
    #[serde(default)]
    pub kind: PlaceboKind,
    /// Number of draws.
    #[serde(default = "default_draws")]
    pub draws: usize,
    /// Seed of draw 0.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Shift for [`PlaceboKind::Lag`].
    #[serde(default = "default_lag_months")]
    pub lag_months: u32,
    /// Column for [`PlaceboKind::Variable`].
    #[serde(default)]
    pub variable: Option<String>,
}

impl Default for PlaceboConfig {
    fn default() -> Self {
        Self {
            kind: PlaceboKind::default(),
            draws: default_draws(),
            seed: default_seed(),
            lag_months: default_lag_months(),
            variable: None,
        }
    }
}

/// Outcome of one placebo draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceboDraw {
    /// Draw index.
    pub draw: usize,
    /// Seed of the draw.
    pub seed: u64,
    /// Placebo estimate, if the draw succeeded.
    pub theta: Option<f64>,
    /// Its standard error.
    pub se: Option<f64>,
    /// Rows used.
    pub n_obs: Option<usize>,
    /// Failure message.
    pub error: Option<String>,
}

/// Placebo distribution compared with the real estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceboSummary {
    /// Placebo construction.
    pub kind: PlaceboKind,
    /// Real estimate θ̂.
    pub real_theta: f64,
    /// Draws attempted.
    pub n_draws: usize,
    /// Draws that produced an estimate.
    pub n_ok: usize,
    /// Draws that failed.
    pub n_failed: usize,
    /// Mean placebo estimate.
    pub mean: f64,
    /// Standard deviation of placebo estimates.
    pub sd: f64,
    /// 2.5 % quantile.
    pub q025: f64,
    /// Median.
    pub q50: f64,
    /// 97.5 % quantile.
    pub q975: f64,
    /// `(1 + #{|θ_p| ≥ |θ̂|}) / (1 + n_ok)`.
    pub p_value: f64,
    /// Share of placebo estimates ≤ θ̂.
    pub percentile: f64,
    /// θ̂ lies outside [q025, q975].
    pub outside_central: bool,
    /// Per-draw results.
    pub draws: Vec<PlaceboDraw>,
    /// Quality warnings.
    pub warnings: Vec<String>,
}

fn shuffle_within(values: &[f64], groups: &[u64], rng: &mut StdRng) -> Vec<f64> {
    let mut members: BTreeMap<u64, Vec<usize>> = BTreeMap::new();
    for (i, &g) in groups.iter().enumerate() {
        members.entry(g).or_default().push(i);
    }
    let mut out = values.to_vec();
    for rows in members.values() {
        let mut vals: Vec<f64> = rows.iter().map(|&i| values[i]).collect();
        vals.shuffle(rng);
        for (&i, v) in rows.iter().zip(vals) {
            out[i] = v;
        }
    }
    out
}

/// Sample with the treatment of the same country `months` earlier; rows
/// without that record drop out.
fn lagged_sample(data: &DmlData, panel: &Panel, treatment: &str, months: u32) -> Result<DmlData> {
    if months == 0 {
        return Err(Error::Validation("placebo lag must be >= 1 month".into()));
    }
    let index = panel.row_index();
    let column = panel.values(treatment)?;
    let mut keep = Vec::new();
    let mut d = Vec::new();
    for (i, &(country, month)) in data.keys.iter().enumerate() {
        let earlier = index.get(&(country, month.shift(-i64::from(months)))).and_then(|&r| column[r]);
        if let Some(v) = earlier {
            keep.push(i);
            d.push(v);
        }
    }
    data.subset(&keep).with_treatment(d)
}

/// Sample with the treatment replaced by `column`, aligned through the
/// panel rows `data` was extracted from; rows where it is missing drop out.
fn variable_sample(data: &DmlData, panel: &Panel, column: &str) -> Result<DmlData> {
    let values = panel.values(column)?;
    let mut keep = Vec::new();
    let mut d = Vec::new();
    for (i, &row) in data.panel_rows.iter().enumerate() {
        if let Some(v) = values.get(row).copied().flatten() {
            keep.push(i);
            d.push(v);
        }
    }
    data.subset(&keep).with_treatment(d)
}

/// Summarize placebo draws against the real estimate.
pub fn summarize(kind: PlaceboKind, real_theta: f64, draws: Vec<PlaceboDraw>) -> Result<PlaceboSummary> {
    let thetas: Vec<f64> = draws.iter().filter_map(|d| d.theta).collect();
    let n_draws = draws.len();
    let n_ok = thetas.len();
    let n_failed = n_draws - n_ok;
    if n_ok == 0 {
        let first = draws.iter().find_map(|d| d.error.clone()).unwrap_or_default();
        return Err(Error::Computation(format!("all {n_draws} placebo draws failed (first error: {first})")));
    }
    let sorted = stats::sorted(&thetas);
    let q025 = stats::quantile_linear_sorted(&sorted, 0.025);
    let q975 = stats::quantile_linear_sorted(&sorted, 0.975);
    let n_extreme = thetas.iter().filter(|t| t.abs() >= real_theta.abs()).count();
    let n_below = thetas.iter().filter(|&&t| t <= real_theta).count();

    let mut warnings = Vec::new();
    if n_failed > 0 {
        tracing::warn!(n_failed, n_draws, "placebo draws failed");
        warnings.push(format!("{n_failed} of {n_draws} placebo draws failed"));
    }
    Ok(PlaceboSummary {
        kind,
        real_theta,
        n_draws,
        n_ok,
        n_failed,
        mean: stats::mean(&thetas),
        sd: stats::sample_sd(&thetas),
        q025,
        q50: stats::quantile_linear_sorted(&sorted, 0.5),
        q975,
        p_value: (1 + n_extreme) as f64 / (1 + n_ok) as f64,
        percentile: n_below as f64 / n_ok as f64,
        outside_central: real_theta < q025 || real_theta > q975,
        draws,
        warnings,
    })
}

/// Run the placebo test.
///
/// `panel` must be the panel `data` was extracted from; it is required by
/// the `lag` and `variable` kinds. Each draw is a single-split DML fit.
pub fn run_placebo(
    data: &DmlData,
    panel: Option<&Panel>,
    treatment: &str,
    real: &EffectEstimate,
    dml: &DmlConfig,
    config: &PlaceboConfig,
) -> Result<PlaceboSummary> {
    if config.draws == 0 {
        return Err(Error::Validation("placebo draws must be >= 1".into()));
    }
    let need_panel = || {
        panel.ok_or_else(|| Error::Validation(format!("placebo kind {:?} needs the panel", config.kind)))
    };
    let fixed = match config.kind {
        PlaceboKind::Permutation | PlaceboKind::WithinCountry => None,
        PlaceboKind::Lag => Some(lagged_sample(data, need_panel()?, treatment, config.lag_months)?),
        PlaceboKind::Variable => {
            let column = config
                .variable
                .as_deref()
                .ok_or_else(|| Error::Validation("variable placebo needs `variable`".into()))?;
            Some(variable_sample(data, need_panel()?, column)?)
        }
    };
    let split = DmlConfig { n_repetitions: 1, ..dml.clone() };
    tracing::info!(kind = ?config.kind, draws = config.draws, seed = config.seed, "placebo test");

    let draws: Vec<PlaceboDraw> = (0..config.draws)
        .into_par_iter()
        .map(|draw| {
            let seed = config.seed.wrapping_add(draw as u64);
            let mut rng = StdRng::seed_from_u64(seed);
            let sample = match (&fixed, config.kind) {
                (Some(s), _) => Ok(s.clone()),
                (None, PlaceboKind::WithinCountry) => {
                    data.with_treatment(shuffle_within(&data.d, &data.country_ids, &mut rng))
                }
                (None, _) => {
                    let mut d = data.d.clone();
                    d.shuffle(&mut rng);
                    data.with_treatment(d)
                }
            };
            match sample.and_then(|s| estimate_split(&s, &split, seed)) {
                Ok((est, _)) => {
                    tracing::debug!(draw, seed, theta = est.theta, "placebo draw");
                    PlaceboDraw {
                        draw,
                        seed,
                        theta: Some(est.theta),
                        se: Some(est.se),
                        n_obs: Some(est.n_obs),
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::debug!(draw, seed, error = %e, "placebo draw failed");
                    PlaceboDraw { draw, seed, theta: None, se: None, n_obs: None, error: Some(e.to_string()) }
                }
            }
        })
        .collect();

    let summary = summarize(config.kind, real.theta, draws)?;
    tracing::info!(
        p_value = summary.p_value,
        percentile = summary.percentile,
        outside_central = summary.outside_central,
        n_failed = summary.n_failed,
        "placebo distribution"
    );
    Ok(summary)
}
