//! Result artifact schema: the JSON summary of key scalars and the flat
//! rows behind the CSV tables of a result bundle.
//!
//! # Schema versioning
//!
//! The `schema_version` field tracks breaking changes. Current: `"1.0.0"`.

use serde::{Deserialize, Serialize};

use crate::data::{ClusterVar, DmlData};
use crate::dml::{DmlConfig, DmlFit};
use crate::orthogonal::EffectEstimate;
use crate::placebo::{PlaceboKind, PlaceboSummary};
use crate::sensitivity::SensitivityReport;

/// Current schema version of `summary.json`.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Per-split scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepetitionSummary {
    /// Repetition index.
    pub repetition: usize,
    /// Fold seed.
    pub seed: u64,
    /// Split estimate.
    pub theta: f64,
    /// Split standard error.
    pub se: f64,
    /// Folds that contributed residuals.
    pub n_usable_folds: usize,
}

/// Placebo scalars (the draws go to `placebo.csv`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceboOverview {
    /// Placebo construction.
    pub kind: PlaceboKind,
    /// Draws attempted.
    pub n_draws: usize,
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
    /// Empirical two-sided p-value.
    pub p_value: f64,
    /// Percentile of the real estimate.
    pub percentile: f64,
    /// Real estimate outside the central 95 % region.
    pub outside_central: bool,
}

impl From<&PlaceboSummary> for PlaceboOverview {
    fn from(s: &PlaceboSummary) -> Self {
        Self {
            kind: s.kind,
            n_draws: s.n_draws,
            n_failed: s.n_failed,
            mean: s.mean,
            sd: s.sd,
            q025: s.q025,
            q50: s.q50,
            q975: s.q975,
            p_value: s.p_value,
            percentile: s.percentile,
            outside_central: s.outside_central,
        }
    }
}

/// Machine-readable summary of a DML run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmlSummary {
    /// Schema version for forward compatibility.
    pub schema_version: String,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_unix_ms: u128,
    /// Outcome column.
    pub outcome: String,
    /// Treatment column.
    pub treatment: String,
    /// Resolved control columns.
    pub controls: Vec<String>,
    /// Cluster variable.
    pub cluster: ClusterVar,
    /// Sample rows.
    pub n_obs: usize,
    /// Distinct countries in the sample.
    pub n_countries: usize,
    /// Estimator settings.
    pub config: DmlConfig,
    /// Final estimate.
    pub estimate: EffectEstimate,
    /// Per-split scalars.
    pub repetitions: Vec<RepetitionSummary>,
    /// Placebo scalars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placebo: Option<PlaceboOverview>,
    /// Sensitivity bounds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<SensitivityReport>,
    /// All statistical-quality warnings.
    pub warnings: Vec<String>,
}

impl DmlSummary {
    /// Collect the scalars of a run.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        created_unix_ms: u128,
        outcome: &str,
        treatment: &str,
        data: &DmlData,
        config: &DmlConfig,
        fit: &DmlFit,
        placebo: Option<&PlaceboSummary>,
        sensitivity: Option<&SensitivityReport>,
    ) -> Self {
        let mut countries: Vec<u64> = data.country_ids.clone();
        countries.sort_unstable();
        countries.dedup();
        let mut warnings = fit.warnings.clone();
        if let Some(p) = placebo {
            warnings.extend(p.warnings.iter().cloned());
        }
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_unix_ms,
            outcome: outcome.to_string(),
            treatment: treatment.to_string(),
            controls: data.control_names.clone(),
            cluster: data.cluster,
            n_obs: data.n(),
            n_countries: countries.len(),
            config: config.clone(),
            estimate: fit.estimate.clone(),
            repetitions: fit
                .repetitions
                .iter()
                .map(|r| RepetitionSummary {
                    repetition: r.repetition,
                    seed: r.crossfit.seed,
                    theta: r.estimate.theta,
                    se: r.estimate.se,
                    n_usable_folds: r.crossfit.n_usable(),
                })
                .collect(),
            placebo: placebo.map(PlaceboOverview::from),
            sensitivity: sensitivity.cloned(),
            warnings,
        }
    }
}

/// One line of `folds.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldRow {
    /// Repetition index.
    pub repetition: usize,
    /// Fold index.
    pub fold: usize,
    /// Training rows.
    pub n_train: usize,
    /// Held-out rows.
    pub n_test: usize,
    /// Out-of-fold R² of the outcome model.
    pub r2_y: Option<f64>,
    /// Out-of-fold R² of the treatment model.
    pub r2_d: Option<f64>,
    /// Whether the fold contributed residuals.
    pub usable: bool,
    /// Fold warnings joined with `; `.
    pub warnings: String,
}

/// Per-fold diagnostics of every split.
pub fn fold_rows(fit: &DmlFit) -> Vec<FoldRow> {
    fit.repetitions
        .iter()
        .flat_map(|r| {
            r.crossfit.folds.iter().map(move |f| FoldRow {
                repetition: r.repetition,
                fold: f.fold,
                n_train: f.n_train,
                n_test: f.n_test,
                r2_y: f.r2_y,
                r2_d: f.r2_d,
                usable: f.usable,
                warnings: f.warnings.join("; "),
            })
        })
        .collect()
}

/// One line of `residuals.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidualCsvRow {
    /// Repetition index.
    pub repetition: usize,
    /// ISO3 code.
    pub country_code: String,
    /// `YYYY-MM`.
    pub date: String,
    /// Fold that held the row out.
    pub fold: usize,
    /// Observed outcome.
    pub y: f64,
    /// Observed treatment.
    pub d: f64,
    /// Out-of-fold outcome prediction.
    pub y_hat: f64,
    /// Out-of-fold treatment prediction.
    pub d_hat: f64,
    /// Outcome residual.
    pub y_res: f64,
    /// Treatment residual.
    pub d_res: f64,
}

/// Residual pairs of every split, keyed by country and month.
pub fn residual_rows(fit: &DmlFit, data: &DmlData) -> Vec<ResidualCsvRow> {
    fit.repetitions
        .iter()
        .flat_map(|r| {
            r.crossfit.residuals.iter().map(move |res| ResidualCsvRow {
                repetition: r.repetition,
                country_code: data.country(res.row).to_string(),
                date: data.month(res.row).to_string(),
                fold: res.fold,
                y: res.y,
                d: res.d,
                y_hat: res.y_hat,
                d_hat: res.d_hat,
                y_res: res.y_res,
                d_res: res.d_res,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dml::estimate_dml;
    use crate::simulate::{SyntheticConfig, synthetic_data};

    #[test]
    fn test_summary_and_rows() {
        let data = synthetic_data(&SyntheticConfig { n_countries: 6, n_months: 10, ..Default::default() }).unwrap();
        let config = DmlConfig { n_repetitions: 2, ..Default::default() };
        let fit = estimate_dml(&data, &config).unwrap();
        let summary = DmlSummary::new(0, "y", "d", &data, &config, &fit, None, None);
        assert_eq!(summary.n_obs, 60);
        assert_eq!(summary.n_countries, 6);
        assert_eq!(summary.repetitions.len(), 2);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["schema_version"], SCHEMA_VERSION);
        assert!(json.get("placebo").is_none());

        assert_eq!(fold_rows(&fit).len(), 2 * config.nuisance.folds);
        let residuals = residual_rows(&fit, &data);
        assert_eq!(residuals.len(), 120);
        assert_eq!(residuals[0].country_code, "AAA");
        assert!(residuals.iter().all(|r| (r.y - r.y_hat - r.y_res).abs() < 1e-12));
    }
}
