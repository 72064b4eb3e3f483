//! Stage orchestration shared by the `dml` and `run` subcommands.

use anyhow::{Context, Result};
use sd_inference::{
    DmlData, DmlFit, DmlSummary, PlaceboSummary, SensitivityReport, SensitivityRow, correlation_matrix,
    estimate_dml, fold_rows, residual_rows, run_placebo, sensitivity_analysis, summary_stats, vif_table,
};
use sd_panel::{
    Panel, assemble, expand_features, missing_report, select_countries, write_panel_csv, write_report_csv,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::bundle::{self, Environment, InputFile};
use crate::config::{EstimationConfig, RunConfig};

/// Everything the estimation stage produced.
pub struct Estimation {
    pub data: DmlData,
    pub fit: DmlFit,
    pub placebo: Option<PlaceboSummary>,
    pub sensitivity: Option<SensitivityReport>,
    /// Diagnostics that could not be computed.
    pub warnings: Vec<String>,
}

/// Estimate the effect and run the configured diagnostics on `panel`.
///
/// A failing placebo test or sensitivity analysis is reported as a warning;
/// only the main estimate can fail the run.
pub fn estimate(panel: &Panel, cfg: &EstimationConfig) -> Result<Estimation> {
    let data = DmlData::from_panel(panel, &cfg.data).context("building the estimation sample")?;
    let fit = estimate_dml(&data, &cfg.dml).context("DML estimation")?;
    let mut warnings = Vec::new();

    let placebo = match &cfg.placebo {
        Some(p) => match run_placebo(&data, Some(panel), &cfg.data.treatment, &fit.estimate, &cfg.dml, p) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "placebo test skipped");
                warnings.push(format!("placebo test failed: {e}"));
                None
            }
        },
        None => None,
    };
    let sensitivity = match &cfg.sensitivity {
        Some(s) => match sensitivity_analysis(&data, &fit.estimate, s) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(error = %e, "sensitivity analysis skipped");
                warnings.push(format!("sensitivity analysis failed: {e}"));
                None
            }
        },
        None => None,
    };
    Ok(Estimation { data, fit, placebo, sensitivity, warnings })
}

/// Write the estimation artifacts into `dir` and return the summary.
pub fn write_estimation(
    dir: &Path,
    cfg: &EstimationConfig,
    est: &Estimation,
    command: &str,
    inputs: Vec<InputFile>,
) -> Result<DmlSummary> {
    let mut summary = DmlSummary::new(
        bundle::now_unix_ms()?,
        &cfg.data.outcome,
        &cfg.data.treatment,
        &est.data,
        &cfg.dml,
        &est.fit,
        est.placebo.as_ref(),
        est.sensitivity.as_ref(),
    );
    summary.warnings.extend(est.warnings.iter().cloned());

    bundle::write_json(&dir.join("summary.json"), &summary)?;
    bundle::write_csv(&dir.join("folds.csv"), &fold_rows(&est.fit))?;
    bundle::write_csv(&dir.join("residuals.csv"), &residual_rows(&est.fit, &est.data))?;
    if let Some(p) = &est.placebo {
        bundle::write_csv(&dir.join("placebo.csv"), &p.draws)?;
    }
    if let Some(s) = &est.sensitivity {
        let rows: Vec<SensitivityRow> = s.rows();
        bundle::write_csv(&dir.join("sensitivity.csv"), &rows)?;
    }
    bundle::write_json(&dir.join("environment.json"), &Environment::capture(command, inputs)?)?;
    Ok(summary)
}

fn cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Write `summary_stats.csv`, `correlation_matrix.csv` and `vif.csv` into
/// `dir`. The VIF regressors default to `variables`.
pub fn write_descriptives(
    dir: &Path,
    panel: &Panel,
    variables: &[String],
    vif_variables: Option<&[String]>,
) -> Result<Vec<PathBuf>> {
    let summary = summary_stats(panel, variables).context("summary statistics")?;
    let corr = correlation_matrix(panel, variables).context("correlation matrix")?;
    let vif = vif_table(panel, vif_variables.unwrap_or(variables)).context("variance inflation factors")?;
    tracing::info!(variables = variables.len(), vif_rows = vif.n_complete, "descriptive tables computed");

    let paths: Vec<PathBuf> =
        ["summary_stats.csv", "correlation_matrix.csv", "vif.csv"].iter().map(|f| dir.join(f)).collect();
    bundle::write_csv(&paths[0], &summary)?;
    let header: Vec<String> = std::iter::once("variable".to_string()).chain(corr.variables.iter().cloned()).collect();
    let rows: Vec<Vec<String>> = corr
        .variables
        .iter()
        .zip(&corr.r)
        .map(|(name, r)| std::iter::once(name.clone()).chain(r.iter().map(|v| cell(*v))).collect())
        .collect();
    bundle::write_table(&paths[1], &header, &rows)?;
    bundle::write_csv(&paths[2], &vif.rows)?;
    Ok(paths)
}

#[derive(Debug, Serialize)]
struct Selection {
    threshold: Option<f64>,
    variables: Option<Vec<String>>,
    countries: Vec<String>,
}

/// Run every stage: assemble → expand → missing → select → describe → dml →
/// diagnostics → bundle.
pub fn run(cfg: &RunConfig, config_path: &Path) -> Result<DmlSummary> {
    let out = &cfg.output_dir;
    bundle::prepare_out_dir(out, cfg.overwrite)?;

    let (panel, report) = assemble(&cfg.assembly).context("assembling the panel")?;
    write_panel_csv(&panel, &out.join("panel.csv"))?;
    bundle::write_json(&out.join("assembly_report.json"), &report)?;

    let (expanded, features) = expand_features(&panel, &cfg.features).context("expanding features")?;
    tracing::info!(
        country_indicators = features.country_indicators.len(),
        time_indicators = features.time_indicators.len(),
        lags = features.lag_columns.len(),
        "features expanded"
    );
    write_panel_csv(&expanded, &out.join("panel_features.csv"))?;

    let missing = &cfg.missing;
    let report = missing_report(&expanded, missing.variables.as_deref(), &missing.groups)?;
    write_report_csv(&report, out)?;
    let keep = select_countries(&report, missing.threshold, missing.variables.as_deref())?;
    if keep.is_empty() {
        anyhow::bail!("no country passes the completeness threshold {:?}", missing.threshold);
    }
    bundle::write_json(
        &out.join("selection.json"),
        &Selection {
            threshold: missing.threshold,
            variables: missing.variables.clone(),
            countries: keep.iter().map(|c| c.to_string()).collect(),
        },
    )?;
    let sample = expanded.filter_countries(&keep)?;
    if let Some(d) = &cfg.describe {
        write_descriptives(out, &sample, &d.variables, d.vif_variables.as_deref())?;
    }

    let estimation = cfg.estimation();
    let est = estimate(&sample, &estimation)?;
    let mut inputs = vec![InputFile::record("config", config_path)?];
    for s in &cfg.assembly.sources {
        inputs.push(InputFile::record(&s.name, &s.path)?);
    }
    if let Some(p) = &cfg.assembly.country_map.path {
        inputs.push(InputFile::record("country_map", p)?);
    }
    let summary = write_estimation(out, &estimation, &est, "run", inputs)?;
    bundle::write_manifest(out)?;
    Ok(summary)
}
