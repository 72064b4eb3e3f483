//! Complete-case estimation sample extracted from a panel.

use std::collections::BTreeMap;

use sd_core::{CountryCode, Error, Result, YearMonth};
use sd_panel::{Panel, PanelKey};
use serde::{Deserialize, Serialize};

/// Clustering variable for standard errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterVar {
    /// One cluster per country.
    #[default]
    Country,
    /// One cluster per month.
    Date,
    /// No clustering; the naive SE is reported.
    None,
}

/// Which panel columns play which role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSpec {
    /// Outcome column.
    pub outcome: String,
    /// Treatment column.
    pub treatment: String,
    /// Control columns. A trailing `*` matches every column with that prefix
    /// (e.g. `country_*`); outcome and treatment never match a pattern.
    pub controls: Vec<String>,
    /// Cluster variable.
    #[serde(default)]
    pub cluster: ClusterVar,
}

/// Estimation sample: rows with outcome, treatment and every control present.
#[derive(Debug, Clone)]
pub struct DmlData {
    /// Outcome.
    pub y: Vec<f64>,
    /// Treatment.
    pub d: Vec<f64>,
    /// Controls, row-major `(n, p)`.
    pub x: Vec<f64>,
    /// Number of controls.
    pub p: usize,
    /// Control names.
    pub control_names: Vec<String>,
    /// (country, month) of every row.
    pub keys: Vec<PanelKey>,
    /// Source panel row of every sample row.
    pub panel_rows: Vec<usize>,
    /// Dense country id of every row (used for stratification).
    pub country_ids: Vec<u64>,
    /// Cluster id of every row.
    pub cluster_ids: Vec<u64>,
    /// Cluster variable the ids were built from.
    pub cluster: ClusterVar,
}

/// Expand `*` patterns against the panel's columns.
pub fn resolve_controls(panel: &Panel, spec: &DataSpec) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for pat in &spec.controls {
        if let Some(prefix) = pat.strip_suffix('*') {
            let matched: Vec<&str> = panel
                .column_names()
                .into_iter()
                .filter(|n| n.starts_with(prefix) && *n != spec.outcome && *n != spec.treatment)
                .collect();
            if matched.is_empty() {
                return Err(Error::Validation(format!("control pattern '{pat}' matches no column")));
            }
            for m in matched {
                if !out.iter().any(|o| o == m) {
                    out.push(m.to_string());
                }
            }
        } else {
            panel.values(pat)?;
            if pat == &spec.outcome || pat == &spec.treatment {
                return Err(Error::Validation(format!(
                    "'{pat}' cannot be both a control and the outcome or treatment"
                )));
            }
            if !out.contains(pat) {
                out.push(pat.clone());
            }
        }
    }
    Ok(out)
}

fn dense_ids<T: Ord + Copy>(items: impl Iterator<Item = T> + Clone) -> Vec<u64> {
    let mut index: BTreeMap<T, u64> = BTreeMap::new();
    for it in items.clone() {
        index.entry(it).or_insert(0);
    }
    for (i, v) in index.values_mut().enumerate() {
        *v = i as u64;
    }
    items.map(|it| index[&it]).collect()
}

impl DmlData {
    /// Build from raw arrays. Cluster and country ids are derived from `keys`.
    pub fn new(
        y: Vec<f64>,
        d: Vec<f64>,
        x: Vec<f64>,
        control_names: Vec<String>,
        keys: Vec<PanelKey>,
        cluster: ClusterVar,
    ) -> Result<Self> {
        let n = y.len();
        let p = control_names.len();
        if d.len() != n || keys.len() != n {
            return Err(Error::Validation(format!(
                "length mismatch: y={n}, d={}, keys={}",
                d.len(),
                keys.len()
            )));
        }
        if x.len() != n * p {
            return Err(Error::Validation(format!("x length ({}) != n*p ({})", x.len(), n * p)));
        }
        if p == 0 {
            return Err(Error::Validation("at least one control is required".into()));
        }
        if y.iter().chain(&d).chain(&x).any(|v| !v.is_finite()) {
            return Err(Error::Validation("estimation sample contains non-finite values".into()));
        }
        let country_ids = dense_ids(keys.iter().map(|k| k.0));
        let cluster_ids = match cluster {
            ClusterVar::Country => country_ids.clone(),
            ClusterVar::Date => dense_ids(keys.iter().map(|k| k.1)),
            ClusterVar::None => (0..n as u64).collect(),
        };
        Ok(Self {
            y,
            d,
            x,
            p,
            control_names,
            panel_rows: (0..n).collect(),
            keys,
            country_ids,
            cluster_ids,
            cluster,
        })
    }

    /// Extract the complete-case sample described by `spec`.
    pub fn from_panel(panel: &Panel, spec: &DataSpec) -> Result<Self> {
        let controls = resolve_controls(panel, spec)?;
        let y_col = panel.values(&spec.outcome)?;
        let d_col = panel.values(&spec.treatment)?;
        let x_cols: Vec<&[Option<f64>]> =
            controls.iter().map(|c| panel.values(c)).collect::<Result<_>>()?;

        let mut y = Vec::new();
        let mut d = Vec::new();
        let mut x = Vec::new();
        let mut keys = Vec::new();
        let mut rows = Vec::new();
        for row in 0..panel.n_rows() {
            let (Some(yv), Some(dv)) = (y_col[row], d_col[row]) else { continue };
            if x_cols.iter().any(|c| c[row].is_none()) {
                continue;
            }
            y.push(yv);
            d.push(dv);
            x.extend(x_cols.iter().map(|c| c[row].unwrap_or(f64::NAN)));
            keys.push(panel.keys()[row]);
            rows.push(row);
        }
        if y.is_empty() {
            return Err(Error::Validation(format!(
                "no complete rows for outcome '{}', treatment '{}' and {} controls",
                spec.outcome,
                spec.treatment,
                controls.len()
            )));
        }
        tracing::info!(
            rows = y.len(),
            dropped = panel.n_rows() - y.len(),
            controls = controls.len(),
            "estimation sample"
        );
        let mut data = Self::new(y, d, x, controls, keys, spec.cluster)?;
        data.panel_rows = rows;
        Ok(data)
    }

    /// Number of rows.
    pub fn n(&self) -> usize {
        self.y.len()
    }

    /// Number of distinct clusters.
    pub fn n_clusters(&self) -> usize {
        let mut ids = self.cluster_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Control row `i`.
    pub fn x_row(&self, i: usize) -> &[f64] {
        &self.x[i * self.p..(i + 1) * self.p]
    }

    /// Copy with the treatment replaced.
    pub fn with_treatment(&self, d: Vec<f64>) -> Result<Self> {
        if d.len() != self.n() {
            return Err(Error::Validation(format!(
                "replacement treatment has {} values, expected {}",
                d.len(),
                self.n()
            )));
        }
        Ok(Self { d, ..self.clone() })
    }

    /// Copy keeping only rows `idx` (in the given order).
    pub fn subset(&self, idx: &[usize]) -> Self {
        let mut x = Vec::with_capacity(idx.len() * self.p);
        for &i in idx {
            x.extend_from_slice(self.x_row(i));
        }
        let pick = |v: &[u64]| idx.iter().map(|&i| v[i]).collect::<Vec<_>>();
        Self {
            y: idx.iter().map(|&i| self.y[i]).collect(),
            d: idx.iter().map(|&i| self.d[i]).collect(),
            x,
            p: self.p,
            control_names: self.control_names.clone(),
            keys: idx.iter().map(|&i| self.keys[i]).collect(),
            panel_rows: idx.iter().map(|&i| self.panel_rows[i]).collect(),
            country_ids: pick(&self.country_ids),
            cluster_ids: pick(&self.cluster_ids),
            cluster: self.cluster,
        }
    }

    /// Country of row `i`.
    pub fn country(&self, i: usize) -> CountryCode {
        self.keys[i].0
    }

    /// Month of row `i`.
    pub fn month(&self, i: usize) -> YearMonth {
        self.keys[i].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sd_panel::Column;

    fn panel() -> Panel {
        let gha = CountryCode::new("GHA").unwrap();
        let ury = CountryCode::new("URY").unwrap();
        let m = |k| YearMonth::new(2020, k).unwrap();
        let keys = vec![(gha, m(1)), (gha, m(2)), (ury, m(1)), (ury, m(2))];
        let mut p = Panel::new(keys).unwrap();
        p.push_column(Column::value("y", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)])).unwrap();
        p.push_column(Column::value("d", vec![Some(0.5), None, Some(1.5), Some(2.5)])).unwrap();
        p.push_column(Column::value("x_a", vec![Some(1.0), Some(1.0), None, Some(1.0)])).unwrap();
        p.push_column(Column::value("x_b", vec![Some(2.0), Some(2.0), Some(2.0), Some(2.0)])).unwrap();
        p
    }

    fn spec(controls: &[&str]) -> DataSpec {
        DataSpec {
            outcome: "y".into(),
            treatment: "d".into(),
            controls: controls.iter().map(|s| s.to_string()).collect(),
            cluster: ClusterVar::Country,
        }
    }

    #[test]
    fn test_complete_cases_and_wildcards() {
        let data = DmlData::from_panel(&panel(), &spec(&["x_*"])).unwrap();
        assert_eq!(data.control_names, vec!["x_a", "x_b"]);
        assert_eq!(data.n(), 2);
        assert_eq!(data.panel_rows, vec![0, 3]);
        assert_eq!(data.y, vec![1.0, 4.0]);
        assert_eq!(data.x_row(1), &[1.0, 2.0]);
        assert_eq!(data.cluster_ids, vec![0, 1]);
        assert_eq!(data.n_clusters(), 2);
    }

    #[test]
    fn test_control_errors() {
        assert!(DmlData::from_panel(&panel(), &spec(&["z_*"])).is_err());
        assert!(DmlData::from_panel(&panel(), &spec(&["missing"])).is_err());
        assert!(DmlData::from_panel(&panel(), &spec(&["y"])).is_err());
        assert!(DmlData::from_panel(&panel(), &spec(&[])).is_err());
    }

    #[test]
    fn test_date_clusters_and_subset() {
        let mut s = spec(&["x_b"]);
        s.cluster = ClusterVar::Date;
        let data = DmlData::from_panel(&panel(), &s).unwrap();
        assert_eq!(data.n(), 3);
        assert_eq!(data.cluster_ids, vec![0, 0, 1]);
        let sub = data.subset(&[2, 0]);
        assert_eq!(sub.panel_rows, vec![3, 0]);
        assert_eq!(sub.d, vec![2.5, 0.5]);
        assert!(data.with_treatment(vec![0.0]).is_err());
    }
}
