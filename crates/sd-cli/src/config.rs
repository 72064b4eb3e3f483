//! Pipeline configuration files (YAML or JSON, chosen by extension).

use anyhow::{Context, Result};
use sd_inference::{DataSpec, DmlConfig, PlaceboConfig, SensitivityConfig};
use sd_panel::{AssemblyConfig, FeatureConfig};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parse `path` as JSON when it ends in `.json`, YAML otherwise.
pub fn read_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg = if ext == "json" {
        serde_json::from_slice(&bytes).with_context(|| format!("parsing JSON config {}", path.display()))?
    } else {
        // Default: YAML (serde_yaml_ng).
        serde_yaml_ng::from_slice(&bytes).with_context(|| format!("parsing YAML config {}", path.display()))?
    };
    Ok(cfg)
}

/// Directory relative paths in a config file are resolved against.
pub fn config_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn default_placebo() -> Option<PlaceboConfig> {
    Some(PlaceboConfig::default())
}

fn default_sensitivity() -> Option<SensitivityConfig> {
    Some(SensitivityConfig::default())
}

/// Estimation and diagnostics settings (`sovdml dml --config`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimationConfig {
    /// Column roles.
    pub data: DataSpec,
    /// Estimator settings.
    #[serde(default)]
    pub dml: DmlConfig,
    /// Placebo test (`null` skips it).
    #[serde(default = "default_placebo")]
    pub placebo: Option<PlaceboConfig>,
    /// Sensitivity bounds (`null` skips them).
    #[serde(default = "default_sensitivity")]
    pub sensitivity: Option<SensitivityConfig>,
}

/// Completeness report and sample selection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MissingStage {
    /// Keep countries whose completeness is strictly above this.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Variables scored (default: every value and lag column).
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    /// Named variable groups reported per country.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

/// Descriptive tables of the selected sample.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescribeStage {
    /// Variables summarized and correlated.
    pub variables: Vec<String>,
    /// VIF regressors (default: `variables`).
    #[serde(default)]
    pub vif_variables: Option<Vec<String>>,
}

/// End-to-end pipeline settings (`sovdml run --config`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Output directory for this run.
    pub output_dir: PathBuf,
    /// Allow writing into a non-empty `output_dir` (overwrites known filenames).
    #[serde(default)]
    pub overwrite: bool,
    /// Sources and country mapping.
    pub assembly: AssemblyConfig,
    /// Indicators and lags.
    pub features: FeatureConfig,
    /// Completeness report and sample selection.
    #[serde(default)]
    pub missing: MissingStage,
    /// Summary, correlation and VIF tables (omitted: skipped).
    #[serde(default)]
    pub describe: Option<DescribeStage>,
    /// Column roles.
    pub data: DataSpec,
    /// Estimator settings.
    #[serde(default)]
    pub dml: DmlConfig,
    /// Placebo test (`null` skips it).
    #[serde(default = "default_placebo")]
    pub placebo: Option<PlaceboConfig>,
    /// Sensitivity bounds (`null` skips them).
    #[serde(default = "default_sensitivity")]
    pub sensitivity: Option<SensitivityConfig>,
}

impl RunConfig {
    /// Read a run config and resolve its relative paths against the
    /// config file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg: RunConfig = read_config(path)?;
        let base = config_dir(path);
        cfg.assembly.resolve_paths(&base);
        if cfg.output_dir.is_relative() {
            cfg.output_dir = base.join(&cfg.output_dir);
        }
        cfg.validate().with_context(|| format!("invalid run config {}", path.display()))?;
        Ok(cfg)
    }

    /// Reject settings that parse but cannot select a sample.
    pub fn validate(&self) -> Result<()> {
        if self.missing.variables.as_ref().is_some_and(|v| v.is_empty()) {
            anyhow::bail!("missing.variables is empty; omit it to score every value and lag column");
        }
        for (name, members) in &self.missing.groups {
            if members.is_empty() {
                anyhow::bail!("missing.groups.{name} has no variables");
            }
        }
        if let Some(d) = &self.describe {
            if d.variables.is_empty() {
                anyhow::bail!("describe.variables is empty");
            }
            if d.vif_variables.as_ref().is_some_and(|v| v.is_empty()) {
                anyhow::bail!("describe.vif_variables is empty; omit it to use describe.variables");
            }
        }
        Ok(())
    }

    /// The estimation part of the run.
    pub fn estimation(&self) -> EstimationConfig {
        EstimationConfig {
            data: self.data.clone(),
            dml: self.dml.clone(),
            placebo: self.placebo.clone(),
            sensitivity: self.sensitivity.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimation_config_defaults() {
        let cfg: EstimationConfig =
            serde_json::from_str(r#"{"data": {"outcome": "y", "treatment": "d", "controls": ["x"]}}"#).unwrap();
        assert_eq!(cfg.dml.nuisance.folds, 5);
        assert!(cfg.placebo.is_some());
        assert!(cfg.sensitivity.is_some());

        let skip: EstimationConfig = serde_yaml_ng::from_str(
            "data: {outcome: y, treatment: d, controls: [x]}\nplacebo: null\n",
        )
        .unwrap();
        assert!(skip.placebo.is_none());
    }

    const RUN_YAML: &str = "\
output_dir: out
assembly:
  sources:
    - {name: yields, path: y.csv, columns: {Spread: spread}}
features: {outcome: spread}
data: {outcome: spread, treatment: d, controls: [x]}
";

    #[test]
    fn test_run_config_rejects_empty_missing_variables() {
        let ok: RunConfig = serde_yaml_ng::from_str(RUN_YAML).unwrap();
        assert!(ok.validate().is_ok());

        let empty: RunConfig =
            serde_yaml_ng::from_str(&format!("{RUN_YAML}missing: {{threshold: 0.7, variables: []}}\n")).unwrap();
        let err = empty.validate().unwrap_err();
        assert!(err.to_string().contains("missing.variables is empty"), "{err}");

        let group: RunConfig =
            serde_yaml_ng::from_str(&format!("{RUN_YAML}missing: {{groups: {{macro: []}}}}\n")).unwrap();
        assert!(group.validate().is_err());
    }

    #[test]
    fn test_run_config_describe_and_derived_sections() {
        let cfg: RunConfig = serde_yaml_ng::from_str(&format!(
            "{RUN_YAML}describe: {{variables: [spread, x]}}\n"
        ))
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert!(cfg.describe.as_ref().unwrap().vif_variables.is_none());

        let empty: RunConfig =
            serde_yaml_ng::from_str(&format!("{RUN_YAML}describe: {{variables: []}}\n")).unwrap();
        assert!(empty.validate().is_err());

        let derived = RUN_YAML.replace(
            "features:",
            "  derived:\n    - {name: real_yield, minuend: yield, subtrahend: inflation}\nfeatures:",
        );
        let cfg: RunConfig = serde_yaml_ng::from_str(&derived).unwrap();
        assert_eq!(cfg.assembly.derived[0].subtrahend, "inflation");
    }
}
