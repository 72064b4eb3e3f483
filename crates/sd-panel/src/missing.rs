//! Missing-Data Reporter: completeness by variable, country and group.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sd_core::{CountryCode, Error, Result};
use serde::{Deserialize, Serialize};

use crate::panel::{ColumnKind, Panel};

/// Completeness of one variable across the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCompleteness {
    /// Column name.
    pub variable: String,
    /// Non-missing cells.
    pub n_present: usize,
    /// Missing cells.
    pub n_missing: usize,
    /// Non-missing fraction.
    pub completeness: f64,
}

/// Completeness of every reported variable within one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryCompleteness {
    /// Country.
    pub country: CountryCode,
    /// Rows of this country.
    pub n_rows: usize,
    /// Non-missing fraction per variable, aligned with
    /// [`MissingReport::variables`].
    pub by_variable: Vec<f64>,
    /// Mean of `by_variable`.
    pub overall_completeness: f64,
}

/// Completeness of a variable group within one country.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCompleteness {
    /// Country.
    pub country: CountryCode,
    /// Group name.
    pub group: String,
    /// Mean completeness of the group's variables.
    pub completeness: f64,
}

/// Completeness statistics of a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingReport {
    /// Panel rows.
    pub n_rows: usize,
    /// Reported variable names, in panel order.
    pub variables: Vec<String>,
    /// Per-variable completeness, most complete first.
    pub by_variable: Vec<VariableCompleteness>,
    /// Per-country completeness, most complete first.
    pub by_country: Vec<CountryCompleteness>,
    /// Per-(country, group) completeness; empty without groups.
    pub by_group: Vec<GroupCompleteness>,
}

fn fraction(present: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { present as f64 / total as f64 }
}

fn mean(xs: impl Iterator<Item = f64>) -> f64 {
    let (s, n) = xs.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
    if n == 0 { 0.0 } else { s / n as f64 }
}

/// Compute completeness of `variables` (default: every value and lag column;
/// indicator columns are complete by construction and are skipped).
///
/// `groups` maps a group name to member variables; every member must be a
/// reported variable.
pub fn missing_report(
    panel: &Panel,
    variables: Option<&[String]>,
    groups: &BTreeMap<String, Vec<String>>,
) -> Result<MissingReport> {
    let variables: Vec<String> = match variables {
        Some([]) => return Err(Error::Validation("missing report: variable list is empty".into())),
        Some(v) => {
            for name in v {
                panel.values(name)?;
            }
            v.to_vec()
        }
        None => panel
            .columns()
            .iter()
            .filter(|c| matches!(c.kind, ColumnKind::Value | ColumnKind::Lag))
            .map(|c| c.name.clone())
            .collect(),
    };
    let columns: Vec<&[Option<f64>]> =
        variables.iter().map(|v| panel.values(v)).collect::<Result<_>>()?;
    let n = panel.n_rows();

    let mut by_variable: Vec<VariableCompleteness> = variables
        .iter()
        .zip(&columns)
        .map(|(name, values)| {
            let n_present = values.iter().filter(|v| v.is_some()).count();
            VariableCompleteness {
                variable: name.clone(),
                n_present,
                n_missing: n - n_present,
                completeness: fraction(n_present, n),
            }
        })
        .collect();
    by_variable.sort_by(|a, b| b.completeness.total_cmp(&a.completeness));

    // Rows of one country are contiguous.
    let mut by_country = Vec::new();
    let keys = panel.keys();
    let mut start = 0;
    while start < n {
        let country = keys[start].0;
        let end = start + keys[start..].iter().take_while(|k| k.0 == country).count();
        let rows = end - start;
        let by_var: Vec<f64> = columns
            .iter()
            .map(|col| fraction(col[start..end].iter().filter(|v| v.is_some()).count(), rows))
            .collect();
        by_country.push(CountryCompleteness {
            country,
            n_rows: rows,
            overall_completeness: mean(by_var.iter().copied()),
            by_variable: by_var,
        });
        start = end;
    }
    by_country.sort_by(|a, b| {
        b.overall_completeness.total_cmp(&a.overall_completeness).then(a.country.cmp(&b.country))
    });

    let mut group_members: Vec<(&String, Vec<usize>)> = Vec::new();
    for (group, members) in groups {
        let idx = members
            .iter()
            .map(|m| {
                variables.iter().position(|v| v == m).ok_or_else(|| {
                    Error::Validation(format!("group '{group}' member '{m}' is not a reported variable"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        group_members.push((group, idx));
    }
    let by_group = by_country
        .iter()
        .flat_map(|c| {
            group_members.iter().map(move |(group, idx)| GroupCompleteness {
                country: c.country,
                group: (*group).clone(),
                completeness: mean(idx.iter().map(|&j| c.by_variable[j])),
            })
        })
        .collect();

    tracing::info!(rows = n, variables = variables.len(), countries = by_country.len(), "missing-data report");
    Ok(MissingReport { n_rows: n, variables, by_variable, by_country, by_group })
}

/// Countries whose completeness is strictly greater than `threshold`.
///
/// Completeness is the mean over `variables` (default: the report's overall
/// completeness). `None` keeps every country. Output is sorted by code.
pub fn select_countries(
    report: &MissingReport,
    threshold: Option<f64>,
    variables: Option<&[String]>,
) -> Result<Vec<CountryCode>> {
    let scored = variables.map_or(report.variables.len(), <[String]>::len);
    if scored == 0 && threshold.is_some() {
        return Err(Error::Validation(
            "country selection: no variables to score completeness against".into(),
        ));
    }
    let idx: Option<Vec<usize>> = variables
        .map(|vars| {
            vars.iter()
                .map(|v| {
                    report.variables.iter().position(|r| r == v).ok_or_else(|| {
                        Error::Validation(format!("'{v}' is not a reported variable"))
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;

    let mut keep: Vec<CountryCode> = report
        .by_country
        .iter()
        .filter(|c| {
            let score = match &idx {
                Some(idx) => mean(idx.iter().map(|&j| c.by_variable[j])),
                None => c.overall_completeness,
            };
            threshold.is_none_or(|t| score > t)
        })
        .map(|c| c.country)
        .collect();
    keep.sort();
    tracing::info!(
        kept = keep.len(),
        total = report.by_country.len(),
        threshold = ?threshold,
        "country selection"
    );
    Ok(keep)
}

/// Write `missing_by_variable.csv`, `missing_by_country.csv` and (with
/// groups) `missing_by_group.csv` into `dir`. Returns the written paths.
pub fn write_report_csv(report: &MissingReport, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let path = dir.join("missing_by_variable.csv");
    let mut w = csv::Writer::from_path(&path)?;
    w.write_record(["variable", "n_present", "n_missing", "completeness"])?;
    for v in &report.by_variable {
        w.write_record([
            v.variable.clone(),
            v.n_present.to_string(),
            v.n_missing.to_string(),
            v.completeness.to_string(),
        ])?;
    }
    w.flush()?;
    written.push(path);

    let path = dir.join("missing_by_country.csv");
    let mut w = csv::Writer::from_path(&path)?;
    let mut header = vec!["country".to_string(), "n_rows".to_string()];
    header.extend(report.variables.iter().cloned());
    header.push("overall_completeness".to_string());
    w.write_record(&header)?;
    for c in &report.by_country {
        let mut rec = vec![c.country.to_string(), c.n_rows.to_string()];
        rec.extend(c.by_variable.iter().map(f64::to_string));
        rec.push(c.overall_completeness.to_string());
        w.write_record(&rec)?;
    }
    w.flush()?;
    written.push(path);

    if !report.by_group.is_empty() {
        let path = dir.join("missing_by_group.csv");
        let mut w = csv::Writer::from_path(&path)?;
        w.write_record(["country", "group", "completeness"])?;
        for g in &report.by_group {
            w.write_record([g.country.to_string(), g.group.clone(), g.completeness.to_string()])?;
        }
        w.flush()?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{Column, PanelKey};
    use approx::assert_relative_eq;
    use sd_core::YearMonth;

    fn key(c: &str, m: u32) -> PanelKey {
        (CountryCode::new(c).unwrap(), YearMonth::new(2020, m).unwrap())
    }

    fn sample() -> Panel {
        let keys = vec![key("GHA", 1), key("GHA", 2), key("URY", 1), key("URY", 2)];
        let mut p = Panel::new(keys).unwrap();
        p.push_column(Column::value("y", vec![Some(1.0), Some(1.0), Some(1.0), None])).unwrap();
        p.push_column(Column::value("x", vec![Some(1.0), None, None, None])).unwrap();
        p.push_column(Column {
            name: "country_GHA".into(),
            kind: ColumnKind::CountryIndicator,
            values: vec![Some(1.0), Some(1.0), Some(0.0), Some(0.0)],
        })
        .unwrap();
        p
    }

    #[test]
    fn test_report_by_variable_and_country() {
        let r = missing_report(&sample(), None, &BTreeMap::new()).unwrap();
        assert_eq!(r.variables, vec!["y", "x"]);
        assert_eq!(r.by_variable[0].variable, "y");
        assert_relative_eq!(r.by_variable[0].completeness, 0.75);
        assert_eq!(r.by_variable[1].n_missing, 3);

        assert_eq!(r.by_country[0].country.as_str(), "GHA");
        assert_relative_eq!(r.by_country[0].overall_completeness, 0.75);
        assert_relative_eq!(r.by_country[1].overall_completeness, 0.25);
        assert!(r.by_group.is_empty());
    }

    #[test]
    fn test_select_countries_strict_threshold() {
        let r = missing_report(&sample(), None, &BTreeMap::new()).unwrap();
        assert_eq!(select_countries(&r, None, None).unwrap().len(), 2);
        assert_eq!(select_countries(&r, Some(0.25), None).unwrap().len(), 1);
        assert_eq!(select_countries(&r, Some(0.75), None).unwrap().len(), 0);
        let y_only = ["y".to_string()];
        let kept = select_countries(&r, Some(0.5), Some(&y_only)).unwrap();
        assert_eq!(kept, vec![CountryCode::new("GHA").unwrap()]);
        assert!(select_countries(&r, Some(0.5), Some(&["nope".to_string()])).is_err());
    }

    #[test]
    fn test_empty_variable_list_is_rejected() {
        let r = missing_report(&sample(), None, &BTreeMap::new()).unwrap();
        let err = select_countries(&r, Some(0.5), Some(&[])).unwrap_err();
        assert!(err.to_string().contains("no variables"), "{err}");
        // Without a threshold nothing is scored, so every country stays.
        assert_eq!(select_countries(&r, None, Some(&[])).unwrap().len(), 2);
        assert!(missing_report(&sample(), Some(&[]), &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_groups_and_csv_output() {
        let mut groups = BTreeMap::new();
        groups.insert("macro".to_string(), vec!["x".to_string()]);
        let r = missing_report(&sample(), None, &groups).unwrap();
        assert_eq!(r.by_group.len(), 2);
        assert_relative_eq!(r.by_group[0].completeness, 0.5);

        let dir = tempfile::tempdir().unwrap();
        let files = write_report_csv(&r, dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        let text = std::fs::read_to_string(dir.path().join("missing_by_country.csv")).unwrap();
        assert!(text.starts_with("country,n_rows,y,x,overall_completeness\nGHA,2,1,0.5,0.75\n"));

        let bad = [("g".to_string(), vec!["country_GHA".to_string()])].into_iter().collect();
        assert!(missing_report(&sample(), None, &bad).is_err());
    }
}
