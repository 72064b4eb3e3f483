//! Panel CSV I/O.
//!
//! The first two columns are always `country_code` and `date` (`YYYY-MM`).
//! Missing cells are written empty.

use std::path::Path;

use sd_core::{CountryCode, Error, Result, YearMonth};

use crate::panel::{COUNTRY_COLUMN, Column, ColumnKind, DATE_COLUMN, Panel, PanelKey};
use crate::source::parse_cell;

/// Write a panel to CSV.
pub fn write_panel_csv(panel: &Panel, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut w = csv::Writer::from_path(path)?;
    let mut header = vec![COUNTRY_COLUMN.to_string(), DATE_COLUMN.to_string()];
    header.extend(panel.column_names().into_iter().map(String::from));
    w.write_record(&header)?;

    let mut record = Vec::with_capacity(header.len());
    for (row, (country, month)) in panel.keys().iter().enumerate() {
        record.clear();
        record.push(country.to_string());
        record.push(month.to_string());
        for c in panel.columns() {
            record.push(c.values[row].map(|v| v.to_string()).unwrap_or_default());
        }
        w.write_record(&record)?;
    }
    w.flush()?;
    tracing::debug!(path = %path.display(), rows = panel.n_rows(), "panel written");
    Ok(())
}

/// Read a panel written by [`write_panel_csv`]. Column kinds are recovered
/// from the names using the given indicator prefixes.
pub fn read_panel_csv(path: &Path, country_prefix: &str, time_prefix: &str) -> Result<Panel> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = rdr.headers()?.clone();
    if headers.get(0) != Some(COUNTRY_COLUMN) || headers.get(1) != Some(DATE_COLUMN) {
        return Err(Error::Validation(format!(
            "{}: panel CSV must start with '{COUNTRY_COLUMN},{DATE_COLUMN}'",
            path.display()
        )));
    }
    let names: Vec<String> = headers.iter().skip(2).map(String::from).collect();
    let mut keys: Vec<PanelKey> = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];

    for record in rdr.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let raw_country = record.get(0).unwrap_or("");
        let country = CountryCode::try_parse(raw_country).ok_or_else(|| Error::Parse {
            context: format!("{} line {line}, column {COUNTRY_COLUMN}", path.display()),
            value: raw_country.to_string(),
        })?;
        let raw_date = record.get(1).unwrap_or("");
        let month = YearMonth::parse(raw_date).map_err(|_| Error::Parse {
            context: format!("{} line {line}, column {DATE_COLUMN}", path.display()),
            value: raw_date.to_string(),
        })?;
        keys.push((country, month));
        for (j, name) in names.iter().enumerate() {
            let v = parse_cell(record.get(j + 2).unwrap_or(""), || {
                format!("{} line {line}, column {name}", path.display())
            })?;
            values[j].push(v);
        }
    }

    let columns = names
        .into_iter()
        .zip(values)
        .map(|(name, values)| {
            let kind = ColumnKind::infer(&name, country_prefix, time_prefix);
            Column { name, kind, values }
        })
        .collect();
    Panel::from_unsorted(keys, columns).map_err(|e| match e {
        Error::DuplicateKey { country, month, .. } => Error::DuplicateKey {
            source_name: path.display().to_string(),
            country,
            month,
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_preserves_cells_and_kinds() {
        let gha = CountryCode::new("GHA").unwrap();
        let keys = vec![(gha, YearMonth::new(2020, 1).unwrap()), (gha, YearMonth::new(2020, 2).unwrap())];
        let mut p = Panel::new(keys).unwrap();
        p.push_column(Column::value("spread", vec![Some(1.25), None])).unwrap();
        p.push_column(Column {
            name: "country_GHA".into(),
            kind: ColumnKind::CountryIndicator,
            values: vec![Some(1.0), Some(1.0)],
        })
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("panel.csv");
        write_panel_csv(&p, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "country_code,date,spread,country_GHA\nGHA,2020-01,1.25,1\nGHA,2020-02,,1\n");

        let back = read_panel_csv(&path, "country_", "time_").unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn test_read_rejects_bad_header_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.csv");
        std::fs::write(&bad, "iso3,date,y\nGHA,2020-01,1\n").unwrap();
        assert!(matches!(read_panel_csv(&bad, "country_", "time_"), Err(Error::Validation(_))));

        let dup = dir.path().join("dup.csv");
        std::fs::write(&dup, "country_code,date,y\nGHA,2020-01,1\nGHA,2020-01,2\n").unwrap();
        assert!(matches!(read_panel_csv(&dup, "country_", "time_"), Err(Error::DuplicateKey { .. })));
    }
}
