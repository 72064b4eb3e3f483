//! Source-table ingest: one CSV file → one keyed, monthly [`Panel`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use sd_core::{CountryCode, Error, Result, YearMonth};
use serde::{Deserialize, Serialize};

use crate::country::CountryMap;
use crate::panel::{Column, Panel};
use crate::ratings::{self, RatingEvent};
use crate::reshape::{self, Row};

/// Tokens read as a missing cell (compared case-insensitively).
const MISSING_TOKENS: &[&str] = &["", "na", "n/a", "nan", "null", "..", "-"];

/// Physical layout of a source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// One row per (country, date); one column per variable.
    #[default]
    Long,
    /// One row per country; one column per year.
    WideYears,
    /// One row per rating action (country, date, agency, letter grade);
    /// carried forward to a monthly series per agency.
    Ratings,
}

/// Sampling frequency of a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Used as-is; the day of month is dropped.
    #[default]
    Monthly,
    /// Step-expanded to every month of the year.
    Annual,
}

fn default_country_column() -> String {
    "country".to_string()
}

fn default_date_column() -> String {
    "date".to_string()
}

fn default_agency_column() -> String {
    "agency".to_string()
}

fn default_rating_column() -> String {
    "rating".to_string()
}

/// Description of one input table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Name used in reports and error messages.
    pub name: String,
    /// CSV file path.
    pub path: PathBuf,
    /// File layout.
    #[serde(default)]
    pub layout: Layout,
    /// Frequency of the observations.
    #[serde(default)]
    pub frequency: Frequency,
    /// Header of the country identifier column.
    #[serde(default = "default_country_column")]
    pub country_column: String,
    /// Header of the date column (`long` and `ratings` layouts).
    #[serde(default = "default_date_column")]
    pub date_column: String,
    /// Explicit chrono format of the date column (e.g. `%m/%d/%Y`).
    #[serde(default)]
    pub date_format: Option<String>,
    /// Raw header → canonical panel column (`long` layout), or agency
    /// label → canonical column (`ratings` layout).
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
    /// Canonical name of the single variable of a `wide_years` table.
    #[serde(default)]
    pub value_name: Option<String>,
    /// Header of the agency column (`ratings` layout).
    #[serde(default = "default_agency_column")]
    pub agency_column: String,
    /// Header of the letter-grade column (`ratings` layout).
    #[serde(default = "default_rating_column")]
    pub rating_column: String,
    /// Read the country as the prefix of a dotted series code.
    #[serde(default)]
    pub country_from_series_code: bool,
    /// Keep only rows where each header equals the given value
    /// (case-insensitive), e.g. `FREQUENCY: Annual`.
    #[serde(default)]
    pub filter: BTreeMap<String, String>,
}

impl SourceSpec {
    /// Canonical column names this source provides, in panel order.
    pub fn canonical_columns(&self) -> Vec<String> {
        match self.layout {
            Layout::Long | Layout::Ratings => self.columns.values().cloned().collect(),
            Layout::WideYears => self.value_name.iter().cloned().collect(),
        }
    }

    fn parse_date(&self, raw: &str, line: u64) -> Result<chrono::NaiveDate> {
        sd_core::parse_date(raw, self.date_format.as_deref()).map_err(|_| Error::Parse {
            context: format!("{} line {line}, column {}", self.name, self.date_column),
            value: raw.to_string(),
        })
    }

    /// Resolve a relative `path` against `base`.
    pub fn resolve_path(&mut self, base: &Path) {
        if self.path.is_relative() {
            self.path = base.join(&self.path);
        }
    }
}

/// Non-missing count of one column in a source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCount {
    /// Canonical column name.
    pub column: String,
    /// Non-missing cells.
    pub n_present: usize,
    /// Non-missing fraction of the table's rows.
    pub fraction: f64,
}

/// Completeness report of one source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    /// Source name.
    pub source: String,
    /// Data records read (after row filters).
    pub rows_read: usize,
    /// Records dropped because of an ignorable country identifier.
    pub rows_ignored: usize,
    /// Monthly rows after frequency expansion and windowing.
    pub rows_out: usize,
    /// Distinct countries.
    pub n_countries: usize,
    /// First month present.
    pub first_month: Option<YearMonth>,
    /// Last month present.
    pub last_month: Option<YearMonth>,
    /// Per-column completeness.
    pub columns: Vec<ColumnCount>,
}

/// A source table read into panel form.
#[derive(Debug, Clone)]
pub struct SourceTable {
    /// Source name.
    pub name: String,
    /// Keyed monthly rows.
    pub panel: Panel,
    /// Completeness report.
    pub report: SourceReport,
}

/// Parse one numeric cell. Missing tokens and non-finite numbers are `None`.
pub fn parse_cell(raw: &str, context: impl FnOnce() -> String) -> Result<Option<f64>> {
    let t = raw.trim();
    if MISSING_TOKENS.iter().any(|m| t.eq_ignore_ascii_case(m)) {
        return Ok(None);
    }
    let v: f64 = t
        .parse()
        .map_err(|_| Error::Parse { context: context(), value: raw.to_string() })?;
    Ok(v.is_finite().then_some(v))
}

fn find_column(headers: &csv::StringRecord, name: &str, source: &str) -> Result<usize> {
    headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
        Error::Validation(format!("source '{source}': column '{name}' not found in header"))
    })
}

struct Ingest<'a> {
    spec: &'a SourceSpec,
    map: &'a CountryMap,
    rows_read: usize,
    rows_ignored: usize,
    logged_ignored: HashSet<String>,
}

impl<'a> Ingest<'a> {
    fn country(&mut self, raw: &str, line: u64) -> Result<Option<CountryCode>> {
        let id = if self.spec.country_from_series_code {
            reshape::series_code_country(raw)
        } else {
            raw
        };
        let code = self.map.normalize(id, &self.spec.name, line)?;
        if code.is_none() {
            self.rows_ignored += 1;
            if self.logged_ignored.insert(id.to_string()) {
                tracing::debug!(source = %self.spec.name, identifier = id, "ignoring country identifier");
            }
        }
        Ok(code)
    }

    fn filters(&self, headers: &csv::StringRecord) -> Result<Vec<(usize, String)>> {
        self.spec
            .filter
            .iter()
            .map(|(col, want)| Ok((find_column(headers, col, &self.spec.name)?, want.clone())))
            .collect()
    }

    fn read_long(&mut self, rdr: &mut csv::Reader<std::fs::File>) -> Result<Vec<Row>> {
        let spec = self.spec;
        let headers = rdr.headers()?.clone();
        let country_idx = find_column(&headers, &spec.country_column, &spec.name)?;
        let date_idx = find_column(&headers, &spec.date_column, &spec.name)?;
        let value_idx: Vec<(usize, &str)> = spec
            .columns
            .keys()
            .map(|raw| Ok((find_column(&headers, raw, &spec.name)?, raw.as_str())))
            .collect::<Result<_>>()?;
        let filters = self.filters(&headers)?;

        let mut last: HashMap<CountryCode, YearMonth> = HashMap::new();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if !passes(&record, &filters) {
                continue;
            }
            self.rows_read += 1;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let Some(country) = self.country(record.get(country_idx).unwrap_or(""), line)? else {
                continue;
            };

            let mut month = YearMonth::from_date(spec.parse_date(record.get(date_idx).unwrap_or(""), line)?);
            if spec.frequency == Frequency::Annual {
                month = YearMonth::new(month.year(), 1)?;
            }

            if let Some(prev) = last.get(&country) {
                if month == *prev {
                    return Err(Error::DuplicateKey {
                        source_name: spec.name.clone(),
                        country: country.to_string(),
                        month: month.to_string(),
                    });
                }
                if month < *prev {
                    return Err(Error::NonMonotonicDates {
                        source_name: spec.name.clone(),
                        country: country.to_string(),
                        previous: prev.to_string(),
                        offending: month.to_string(),
                        line,
                    });
                }
            }
            last.insert(country, month);

            let values = value_idx
                .iter()
                .map(|&(i, raw)| {
                    parse_cell(record.get(i).unwrap_or(""), || {
                        format!("{} line {line}, column {raw}", spec.name)
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(((country, month), values));
        }
        rows.sort_by_key(|(k, _)| *k);
        Ok(rows)
    }

    fn read_wide(&mut self, rdr: &mut csv::Reader<std::fs::File>) -> Result<Vec<Row>> {
        let spec = self.spec;
        let headers = rdr.headers()?.clone();
        let country_idx = find_column(&headers, &spec.country_column, &spec.name)?;
        let years = reshape::year_columns(headers.iter());
        if years.is_empty() {
            return Err(Error::Validation(format!(
                "source '{}': no year columns in a wide_years table",
                spec.name
            )));
        }
        let filters = self.filters(&headers)?;

        let mut seen: HashSet<(CountryCode, i32)> = HashSet::new();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if !passes(&record, &filters) {
                continue;
            }
            self.rows_read += 1;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let Some(country) = self.country(record.get(country_idx).unwrap_or(""), line)? else {
                continue;
            };
            for &(i, year) in &years {
                let cell = parse_cell(record.get(i).unwrap_or(""), || {
                    format!("{} line {line}, column {year}", spec.name)
                })?;
                let Some(v) = cell else { continue };
                if !seen.insert((country, year)) {
                    return Err(Error::DuplicateKey {
                        source_name: spec.name.clone(),
                        country: country.to_string(),
                        month: YearMonth::new(year, 1)?.to_string(),
                    });
                }
                rows.push(((country, YearMonth::new(year, 1)?), vec![Some(v)]));
            }
        }
        rows.sort_by_key(|(k, _)| *k);
        Ok(rows)
    }
}

impl Ingest<'_> {
    /// Rating actions → monthly rows, carried forward to `end` (or to the
    /// latest action month of the table).
    fn read_ratings(&mut self, rdr: &mut csv::Reader<std::fs::File>, end: Option<YearMonth>) -> Result<Vec<Row>> {
        let spec = self.spec;
        let headers = rdr.headers()?.clone();
        let country_idx = find_column(&headers, &spec.country_column, &spec.name)?;
        let date_idx = find_column(&headers, &spec.date_column, &spec.name)?;
        let agency_idx = find_column(&headers, &spec.agency_column, &spec.name)?;
        let rating_idx = find_column(&headers, &spec.rating_column, &spec.name)?;
        let agencies: Vec<String> = spec.columns.keys().map(|a| a.trim().to_lowercase()).collect();
        let filters = self.filters(&headers)?;

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if !passes(&record, &filters) {
                continue;
            }
            self.rows_read += 1;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let label = record.get(agency_idx).unwrap_or("").trim().to_lowercase();
            let Some(agency) = agencies.iter().position(|a| *a == label) else {
                continue;
            };
            let raw_grade = record.get(rating_idx).unwrap_or("").trim();
            if raw_grade.is_empty() {
                continue;
            }
            let Some(country) = self.country(record.get(country_idx).unwrap_or(""), line)? else {
                continue;
            };
            let date = spec.parse_date(record.get(date_idx).unwrap_or(""), line)?;
            let grade = ratings::parse_grade(raw_grade).ok_or_else(|| Error::Parse {
                context: format!("{} line {line}, column {}", spec.name, spec.rating_column),
                value: raw_grade.to_string(),
            })?;
            if !seen.insert((country, date, agency)) {
                return Err(Error::DuplicateKey {
                    source_name: spec.name.clone(),
                    country: country.to_string(),
                    month: format!("{date} ({label})"),
                });
            }
            events.push(RatingEvent { country, date, agency, grade });
        }
        let Some(horizon) = end.or_else(|| events.iter().map(|e| YearMonth::from_date(e.date)).max()) else {
            return Ok(Vec::new());
        };
        Ok(ratings::carry_forward(events, agencies.len(), horizon))
    }
}

fn passes(record: &csv::StringRecord, filters: &[(usize, String)]) -> bool {
    filters
        .iter()
        .all(|(i, want)| record.get(*i).is_some_and(|v| v.trim().eq_ignore_ascii_case(want)))
}

/// Read one source table, normalize its countries, expand it to monthly
/// frequency and restrict it to the inclusive `[start, end]` window.
pub fn read_source(
    spec: &SourceSpec,
    map: &CountryMap,
    start: Option<YearMonth>,
    end: Option<YearMonth>,
) -> Result<SourceTable> {
    let canonical = spec.canonical_columns();
    if canonical.is_empty() {
        return Err(Error::Validation(format!(
            "source '{}' defines no value columns",
            spec.name
        )));
    }
    let mut distinct = HashSet::new();
    for c in &canonical {
        if !distinct.insert(c.as_str()) {
            return Err(Error::ColumnCollision {
                column: c.clone(),
                first: spec.name.clone(),
                second: spec.name.clone(),
            });
        }
    }

    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(&spec.path)?;
    let mut ingest =
        Ingest { spec, map, rows_read: 0, rows_ignored: 0, logged_ignored: HashSet::new() };
    if spec.layout == Layout::Ratings && spec.frequency == Frequency::Annual {
        return Err(Error::Validation(format!(
            "source '{}': a ratings table is carried forward monthly and cannot be annual",
            spec.name
        )));
    }
    let mut rows = match spec.layout {
        Layout::Long => ingest.read_long(&mut rdr)?,
        Layout::WideYears => ingest.read_wide(&mut rdr)?,
        Layout::Ratings => ingest.read_ratings(&mut rdr, end)?,
    };
    if spec.frequency == Frequency::Annual {
        rows = reshape::expand_annual(rows);
    }
    let rows = reshape::apply_window(rows, start, end);
    let n_countries = reshape::row_countries(&rows).len();

    let keys = rows.iter().map(|(k, _)| *k).collect();
    let mut panel = Panel::new(keys)?;
    for (j, name) in canonical.iter().enumerate() {
        let values = rows.iter().map(|(_, v)| v[j]).collect();
        panel.push_column(Column::value(name.clone(), values))?;
    }

    let n = panel.n_rows();
    let columns = panel
        .columns()
        .iter()
        .map(|c| {
            let n_present = c.n_present();
            ColumnCount {
                column: c.name.clone(),
                n_present,
                fraction: if n == 0 { 0.0 } else { n_present as f64 / n as f64 },
            }
        })
        .collect();
    let report = SourceReport {
        source: spec.name.clone(),
        rows_read: ingest.rows_read,
        rows_ignored: ingest.rows_ignored,
        rows_out: n,
        n_countries,
        first_month: panel.keys().iter().map(|k| k.1).min(),
        last_month: panel.keys().iter().map(|k| k.1).max(),
        columns,
    };
    tracing::info!(
        source = %spec.name,
        rows_read = report.rows_read,
        rows_ignored = report.rows_ignored,
        rows_out = n,
        countries = n_countries,
        "source loaded"
    );
    Ok(SourceTable { name: spec.name.clone(), panel, report })
}
