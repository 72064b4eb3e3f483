//! Columnar country × month panel.

use std::collections::{BTreeSet, HashMap, HashSet};

use sd_core::{CountryCode, Error, Result, YearMonth};
use serde::{Deserialize, Serialize};

/// Panel key: one country in one month.
pub type PanelKey = (CountryCode, YearMonth);

/// Reserved name of the country key column in CSV form.
pub const COUNTRY_COLUMN: &str = "country_code";
/// Reserved name of the month key column in CSV form.
pub const DATE_COLUMN: &str = "date";

/// Role of a column in the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Observed variable from a source table.
    Value,
    /// One-hot country fixed effect.
    CountryIndicator,
    /// One-hot year-month fixed effect.
    TimeIndicator,
    /// Calendar lag of another column.
    Lag,
}

impl ColumnKind {
    /// Recover the kind of a column from its name (used when re-reading a
    /// panel CSV, where kinds are not stored).
    pub fn infer(name: &str, country_prefix: &str, time_prefix: &str) -> Self {
        if let Some(rest) = name.strip_prefix(country_prefix)
            && CountryCode::try_parse(rest).is_some_and(|c| c.as_str() == rest)
        {
            return Self::CountryIndicator;
        }
        if let Some(rest) = name.strip_prefix(time_prefix)
            && rest.len() == 7
            && YearMonth::parse(rest).is_ok()
        {
            return Self::TimeIndicator;
        }
        if let Some((_, k)) = name.rsplit_once("_lag")
            && !k.is_empty()
            && k.bytes().all(|b| b.is_ascii_digit())
        {
            return Self::Lag;
        }
        Self::Value
    }
}

/// One named column; `None` marks a missing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column role.
    pub kind: ColumnKind,
    /// One entry per panel row.
    pub values: Vec<Option<f64>>,
}

impl Column {
    /// Observed-value column.
    pub fn value(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self { name: name.into(), kind: ColumnKind::Value, values }
    }

    /// Number of non-missing cells.
    pub fn n_present(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Long-format panel keyed by (country, month).
///
/// Rows are sorted by country then month and keys are unique, so rows of one
/// country form a contiguous, strictly increasing run of months.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    keys: Vec<PanelKey>,
    columns: Vec<Column>,
}

impl Panel {
    /// Panel with keys only. Keys must be strictly increasing.
    pub fn new(keys: Vec<PanelKey>) -> Result<Self> {
        for w in keys.windows(2) {
            if w[0] == w[1] {
                return Err(Error::DuplicateKey {
                    source_name: "panel".to_string(),
                    country: w[0].0.to_string(),
                    month: w[0].1.to_string(),
                });
            }
            if w[0] > w[1] {
                return Err(Error::Validation(format!(
                    "panel keys must be sorted: ({}, {}) precedes ({}, {})",
                    w[0].0, w[0].1, w[1].0, w[1].1
                )));
            }
        }
        Ok(Self { keys, columns: Vec::new() })
    }

    /// Build from rows in arbitrary order. Rows are sorted by key; duplicate
    /// keys are rejected.
    pub fn from_unsorted(keys: Vec<PanelKey>, columns: Vec<Column>) -> Result<Self> {
        let n = keys.len();
        for c in &columns {
            if c.values.len() != n {
                return Err(Error::Validation(format!(
                    "column '{}' has {} values, expected {}",
                    c.name,
                    c.values.len(),
                    n
                )));
            }
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| keys[i]);

        let sorted_keys: Vec<PanelKey> = order.iter().map(|&i| keys[i]).collect();
        let mut panel = Self::new(sorted_keys)?;
        for c in columns {
            let values = order.iter().map(|&i| c.values[i]).collect();
            panel.push_column(Column { name: c.name, kind: c.kind, values })?;
        }
        Ok(panel)
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.keys.len()
    }

    /// Number of data columns (keys excluded).
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Row keys in panel order.
    pub fn keys(&self) -> &[PanelKey] {
        &self.keys
    }

    /// All columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in panel order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Values of a column, or a validation error naming the missing column.
    pub fn values(&self, name: &str) -> Result<&[Option<f64>]> {
        self.column(name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| Error::Validation(format!("panel has no column '{name}'")))
    }

    /// Append a column. Names must be unique and must not shadow the key columns.
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if column.values.len() != self.keys.len() {
            return Err(Error::Validation(format!(
                "column '{}' has {} values, expected {}",
                column.name,
                column.values.len(),
                self.keys.len()
            )));
        }
        if column.name == COUNTRY_COLUMN || column.name == DATE_COLUMN {
            return Err(Error::Validation(format!("column name '{}' is reserved", column.name)));
        }
        if self.column(&column.name).is_some() {
            return Err(Error::ColumnCollision {
                column: column.name,
                first: "panel".to_string(),
                second: "new column".to_string(),
            });
        }
        self.columns.push(column);
        Ok(())
    }

    /// Distinct countries, sorted.
    pub fn countries(&self) -> Vec<CountryCode> {
        let set: BTreeSet<CountryCode> = self.keys.iter().map(|k| k.0).collect();
        set.into_iter().collect()
    }

    /// Distinct months, sorted.
    pub fn months(&self) -> Vec<YearMonth> {
        let set: BTreeSet<YearMonth> = self.keys.iter().map(|k| k.1).collect();
        set.into_iter().collect()
    }

    /// Map from key to row index.
    pub fn row_index(&self) -> HashMap<PanelKey, usize> {
        self.keys.iter().enumerate().map(|(i, k)| (*k, i)).collect()
    }

    /// Keep rows where `mask[i]` is true.
    pub fn retain_rows(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_rows() {
            return Err(Error::Validation(format!(
                "row mask has {} entries, expected {}",
                mask.len(),
                self.n_rows()
            )));
        }
        let keep = |i: &usize| mask[*i];
        let idx: Vec<usize> = (0..self.n_rows()).filter(keep).collect();
        let keys = idx.iter().map(|&i| self.keys[i]).collect();
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                kind: c.kind,
                values: idx.iter().map(|&i| c.values[i]).collect(),
            })
            .collect();
        Ok(Self { keys, columns })
    }

    /// Keep only rows of the given countries.
    pub fn filter_countries(&self, keep: &[CountryCode]) -> Result<Self> {
        let set: HashSet<CountryCode> = keep.iter().copied().collect();
        let mask: Vec<bool> = self.keys.iter().map(|k| set.contains(&k.0)).collect();
        self.retain_rows(&mask)
    }

    /// Keep only rows with `start <= month <= end`.
    pub fn filter_months(&self, start: Option<YearMonth>, end: Option<YearMonth>) -> Result<Self> {
        let mask: Vec<bool> = self
            .keys
            .iter()
            .map(|k| start.is_none_or(|s| k.1 >= s) && end.is_none_or(|e| k.1 <= e))
            .collect();
        self.retain_rows(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(c: &str, y: i32, m: u32) -> PanelKey {
        (CountryCode::new(c).unwrap(), YearMonth::new(y, m).unwrap())
    }

    #[test]
    fn test_new_rejects_duplicates_and_disorder() {
        let dup = vec![key("GHA", 2020, 1), key("GHA", 2020, 1)];
        assert!(matches!(Panel::new(dup), Err(Error::DuplicateKey { .. })));
        let unsorted = vec![key("GHA", 2020, 2), key("GHA", 2020, 1)];
        assert!(matches!(Panel::new(unsorted), Err(Error::Validation(_))));
    }

    #[test]
    fn test_from_unsorted_reorders_columns_with_keys() {
        let keys = vec![key("URY", 2020, 1), key("GHA", 2020, 2), key("GHA", 2020, 1)];
        let col = Column::value("y", vec![Some(3.0), Some(2.0), None]);
        let p = Panel::from_unsorted(keys, vec![col]).unwrap();
        assert_eq!(p.keys()[0], key("GHA", 2020, 1));
        assert_eq!(p.values("y").unwrap(), &[None, Some(2.0), Some(3.0)]);
        assert_eq!(p.countries().len(), 2);
        assert_eq!(p.months().len(), 2);
    }

    #[test]
    fn test_push_column_checks_length_and_names() {
        let mut p = Panel::new(vec![key("GHA", 2020, 1)]).unwrap();
        assert!(p.push_column(Column::value("y", vec![])).is_err());
        assert!(p.push_column(Column::value("date", vec![Some(1.0)])).is_err());
        p.push_column(Column::value("y", vec![Some(1.0)])).unwrap();
        assert!(matches!(
            p.push_column(Column::value("y", vec![Some(2.0)])),
            Err(Error::ColumnCollision { .. })
        ));
    }

    #[test]
    fn test_filters() {
        let keys = vec![key("GHA", 2020, 1), key("GHA", 2020, 2), key("URY", 2020, 1)];
        let mut p = Panel::new(keys).unwrap();
        p.push_column(Column::value("y", vec![Some(1.0), Some(2.0), Some(3.0)])).unwrap();

        let ury = p.filter_countries(&[CountryCode::new("URY").unwrap()]).unwrap();
        assert_eq!(ury.n_rows(), 1);
        assert_eq!(ury.values("y").unwrap(), &[Some(3.0)]);

        let feb = p.filter_months(Some(YearMonth::new(2020, 2).unwrap()), None).unwrap();
        assert_eq!(feb.n_rows(), 1);
    }

    #[test]
    fn test_infer_kind_from_name() {
        assert_eq!(ColumnKind::infer("country_GHA", "country_", "time_"), ColumnKind::CountryIndicator);
        assert_eq!(ColumnKind::infer("time_2020-01", "country_", "time_"), ColumnKind::TimeIndicator);
        assert_eq!(ColumnKind::infer("spread_lag2", "country_", "time_"), ColumnKind::Lag);
        assert_eq!(ColumnKind::infer("country_risk", "country_", "time_"), ColumnKind::Value);
        assert_eq!(ColumnKind::infer("cpi_yoy", "country_", "time_"), ColumnKind::Value);
    }
}
