//! Panel Assembler: full outer join of source tables on (country, month).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use sd_core::{CountryCode, Error, Result, YearMonth};
use serde::{Deserialize, Serialize};

use crate::country::CountryMap;
use crate::panel::{Column, Panel, PanelKey};
use crate::source::{SourceReport, SourceSpec, SourceTable, read_source};

fn default_true() -> bool {
    true
}

/// Country-mapping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountryMapConfig {
    /// Optional two-column CSV (`name,iso3`).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Inline name → ISO3 entries; these override the CSV.
    #[serde(default)]
    pub entries: BTreeMap<String, String>,
    /// Identifiers whose rows are dropped.
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Accept identifiers that already are ISO3 codes.
    #[serde(default = "default_true")]
    pub passthrough_iso3: bool,
    /// Start from the built-in name table.
    #[serde(default = "default_true")]
    pub use_defaults: bool,
}

impl Default for CountryMapConfig {
    fn default() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            ignore: Vec::new(),
            passthrough_iso3: true,
            use_defaults: true,
        }
    }
}

impl CountryMapConfig {
    /// Build the lookup table.
    pub fn build(&self) -> Result<CountryMap> {
        let base = if self.use_defaults { CountryMap::with_defaults() } else { CountryMap::new() };
        let mut map = base.with_passthrough(self.passthrough_iso3);
        if let Some(path) = &self.path {
            let n = map.extend_from_csv(path)?;
            tracing::debug!(path = %path.display(), entries = n, "loaded country map");
        }
        for (name, code) in &self.entries {
            map.insert(name, CountryCode::new(code)?);
        }
        for name in &self.ignore {
            map.ignore(name);
        }
        Ok(map)
    }
}

/// A column computed after the join as `minuend - subtrahend`, e.g. a real
/// yield from a nominal yield and inflation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivedColumn {
    /// Name of the new column.
    pub name: String,
    /// Column subtracted from.
    pub minuend: String,
    /// Column subtracted.
    pub subtrahend: String,
}

/// Assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssemblyConfig {
    /// Source tables, joined in this order.
    pub sources: Vec<SourceSpec>,
    /// Country mapping.
    #[serde(default)]
    pub country_map: CountryMapConfig,
    /// First month kept (inclusive).
    #[serde(default)]
    pub start: Option<YearMonth>,
    /// Last month kept (inclusive).
    #[serde(default)]
    pub end: Option<YearMonth>,
    /// Columns derived from the joined panel, computed in this order.
    #[serde(default)]
    pub derived: Vec<DerivedColumn>,
}

impl AssemblyConfig {
    /// Resolve relative file paths against `base` (the config file's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        for s in &mut self.sources {
            s.resolve_path(base);
        }
        if let Some(p) = &self.country_map.path
            && p.is_relative()
        {
            self.country_map.path = Some(base.join(p));
        }
    }
}

/// Completeness report of an assembly run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyReport {
    /// One entry per source, in configuration order.
    pub sources: Vec<SourceReport>,
    /// Rows of the joined panel.
    pub n_rows: usize,
    /// Distinct countries of the joined panel.
    pub n_countries: usize,
    /// Distinct months of the joined panel.
    pub n_months: usize,
}

/// Check that no canonical column is provided twice.
pub fn check_collisions(specs: &[SourceSpec]) -> Result<()> {
    let mut owner: HashMap<String, &str> = HashMap::new();
    for s in specs {
        for c in s.canonical_columns() {
            if let Some(first) = owner.get(&c) {
                return Err(Error::ColumnCollision {
                    column: c,
                    first: first.to_string(),
                    second: s.name.clone(),
                });
            }
            owner.insert(c, &s.name);
        }
    }
    Ok(())
}

/// Full outer join of already-read tables on (country, month).
///
/// Output rows are the union of all keys in (country, month) order; a cell
/// with no source row is missing.
pub fn join_tables(tables: &[SourceTable]) -> Result<Panel> {
    let union: BTreeSet<PanelKey> =
        tables.iter().flat_map(|t| t.panel.keys().iter().copied()).collect();
    let keys: Vec<PanelKey> = union.into_iter().collect();
    let mut panel = Panel::new(keys)?;
    let index = panel.row_index();
    let n = panel.n_rows();

    let mut owner: HashMap<String, &str> = HashMap::new();
    for t in tables {
        for col in t.panel.columns() {
            if let Some(first) = owner.get(&col.name) {
                return Err(Error::ColumnCollision {
                    column: col.name.clone(),
                    first: first.to_string(),
                    second: t.name.clone(),
                });
            }
            owner.insert(col.name.clone(), &t.name);

            let mut values = vec![None; n];
            for (k, v) in t.panel.keys().iter().zip(&col.values) {
                if let Some(&row) = index.get(k) {
                    values[row] = *v;
                }
            }
            panel.push_column(Column { name: col.name.clone(), kind: col.kind, values })?;
        }
    }
    Ok(panel)
}

/// Append each derived column to `panel`. A cell is missing unless both
/// operands are present; a derived column may feed a later one.
pub fn derive_columns(panel: &mut Panel, derived: &[DerivedColumn]) -> Result<()> {
    for d in derived {
        if panel.column(&d.name).is_some() {
            return Err(Error::ColumnCollision {
                column: d.name.clone(),
                first: "sources".into(),
                second: "derived".into(),
            });
        }
        let operand = |name: &str| {
            panel.values(name).map_err(|_| {
                Error::Validation(format!("derived column '{}': unknown operand '{name}'", d.name))
            })
        };
        let values: Vec<Option<f64>> = operand(&d.minuend)?
            .iter()
            .zip(operand(&d.subtrahend)?)
            .map(|(a, b)| Some((*a)? - (*b)?))
            .collect();
        let n_present = values.iter().flatten().count();
        panel.push_column(Column::value(d.name.clone(), values))?;
        tracing::debug!(column = %d.name, present = n_present, "derived column");
    }
    Ok(())
}

/// Read every configured source and join them into one panel.
pub fn assemble(config: &AssemblyConfig) -> Result<(Panel, AssemblyReport)> {
    if config.sources.is_empty() {
        return Err(Error::Validation("assembly needs at least one source".into()));
    }
    if let (Some(s), Some(e)) = (config.start, config.end)
        && s > e
    {
        return Err(Error::Validation(format!("start {s} is after end {e}")));
    }
    check_collisions(&config.sources)?;
    let map = config.country_map.build()?;

    let tables = config
        .sources
        .iter()
        .map(|s| read_source(s, &map, config.start, config.end))
        .collect::<Result<Vec<_>>>()?;
    let mut panel = join_tables(&tables)?;
    derive_columns(&mut panel, &config.derived)?;

    let report = AssemblyReport {
        sources: tables.into_iter().map(|t| t.report).collect(),
        n_rows: panel.n_rows(),
        n_countries: panel.countries().len(),
        n_months: panel.months().len(),
    };
    tracing::info!(
        rows = report.n_rows,
        countries = report.n_countries,
        months = report.n_months,
        columns = panel.n_columns(),
        "panel assembled"
    );
    Ok((panel, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Frequency, Layout};
    use std::io::Write;

    fn spec(name: &str, path: &Path, cols: &[(&str, &str)]) -> SourceSpec {
        SourceSpec {
            name: name.into(),
            path: path.to_path_buf(),
            layout: Layout::Long,
            frequency: Frequency::Monthly,
            country_column: "iso3".into(),
            date_column: "date".into(),
            date_format: None,
            columns: cols.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect(),
            value_name: None,
            agency_column: "agency".into(),
            rating_column: "rating".into(),
            country_from_series_code: false,
            filter: BTreeMap::new(),
        }
    }

    fn tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_full_outer_join() {
        let a = tmp("iso3,date,y\nGHA,2020-01,1\nGHA,2020-02,2\n");
        let b = tmp("iso3,date,x\nGHA,2020-02,20\nURY,2020-01,30\n");
        let config = AssemblyConfig {
            sources: vec![spec("a", a.path(), &[("y", "y")]), spec("b", b.path(), &[("x", "x")])],
            country_map: CountryMapConfig::default(),
            start: None,
            end: None,
            derived: Vec::new(),
        };
        let (panel, report) = assemble(&config).unwrap();
        assert_eq!(panel.n_rows(), 3);
        assert_eq!(panel.values("y").unwrap(), &[Some(1.0), Some(2.0), None]);
        assert_eq!(panel.values("x").unwrap(), &[None, Some(20.0), Some(30.0)]);
        assert_eq!(report.n_countries, 2);
        assert_eq!(report.sources.len(), 2);
    }

    #[test]
    fn test_column_collision_across_sources() {
        let a = tmp("iso3,date,y\nGHA,2020-01,1\n");
        let b = tmp("iso3,date,yield\nGHA,2020-01,1\n");
        let config = AssemblyConfig {
            sources: vec![spec("a", a.path(), &[("y", "y")]), spec("b", b.path(), &[("yield", "y")])],
            country_map: CountryMapConfig::default(),
            start: None,
            end: None,
            derived: Vec::new(),
        };
        match assemble(&config).unwrap_err() {
            Error::ColumnCollision { column, first, second } => {
                assert_eq!((column.as_str(), first.as_str(), second.as_str()), ("y", "a", "b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_country_map_config_entries_and_ignore() {
        let cfg = CountryMapConfig {
            entries: [("Cote d'Ivoire".to_string(), "CIV".to_string())].into_iter().collect(),
            ignore: vec!["World".into()],
            ..Default::default()
        };
        let map = cfg.build().unwrap();
        assert_eq!(map.normalize("cote d'ivoire", "s", 1).unwrap().unwrap().as_str(), "CIV");
        assert_eq!(map.normalize("WORLD", "s", 1).unwrap(), None);
        assert_eq!(map.normalize("IVORY COAST", "s", 1).unwrap().unwrap().as_str(), "CIV");
    }

    #[test]
    fn test_resolve_paths() {
        let mut cfg = AssemblyConfig {
            sources: vec![spec("a", Path::new("data/a.csv"), &[("y", "y")])],
            country_map: CountryMapConfig { path: Some("map.csv".into()), ..Default::default() },
            start: None,
            end: None,
            derived: Vec::new(),
        };
        cfg.resolve_paths(Path::new("/cfg"));
        assert_eq!(cfg.sources[0].path, PathBuf::from("/cfg/data/a.csv"));
        assert_eq!(cfg.country_map.path, Some(PathBuf::from("/cfg/map.csv")));
    }

    #[test]
    fn test_real_yield_is_derived_after_the_join() {
        let a = tmp("iso3,date,yield\nGHA,2020-01,12.5\nGHA,2020-02,13.0\nURY,2020-01,6.0\n");
        let b = tmp("iso3,date,cpi\nGHA,2020-01,9.5\nURY,2020-01,8.5\nURY,2020-02,8.0\n");
        let mut config = AssemblyConfig {
            sources: vec![spec("a", a.path(), &[("yield", "yield")]), spec("b", b.path(), &[("cpi", "inflation")])],
            country_map: CountryMapConfig::default(),
            start: None,
            end: None,
            derived: vec![DerivedColumn {
                name: "real_yield".into(),
                minuend: "yield".into(),
                subtrahend: "inflation".into(),
            }],
        };
        let (panel, _) = assemble(&config).unwrap();
        assert_eq!(panel.values("real_yield").unwrap(), &[Some(3.0), None, Some(-2.5), None]);

        config.derived[0].subtrahend = "cpi".into();
        assert!(matches!(assemble(&config), Err(Error::Validation(_))));
        config.derived[0].name = "yield".into();
        config.derived[0].subtrahend = "inflation".into();
        assert!(matches!(assemble(&config), Err(Error::ColumnCollision { .. })));
    }
}
