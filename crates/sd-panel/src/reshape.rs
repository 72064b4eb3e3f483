//! Layout and frequency conversions applied while reading a source table.

use sd_core::{CountryCode, YearMonth};

use crate::panel::PanelKey;

/// One parsed source row: key plus one value per configured column.
pub type Row = (PanelKey, Vec<Option<f64>>);

/// Find the year columns of a wide table.
///
/// A header is a year column when it is exactly four digits, or four digits
/// followed by a space (`"2019 [YR2019]"`). Returns `(column index, year)`.
pub fn year_columns<'a>(headers: impl IntoIterator<Item = &'a str>) -> Vec<(usize, i32)> {
    headers
        .into_iter()
        .enumerate()
        .filter_map(|(i, h)| {
            let h = h.trim();
            let digits = h.get(..4)?;
            if !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let rest = &h[4..];
            if !(rest.is_empty() || rest.starts_with(' ')) {
                return None;
            }
            digits.parse().ok().map(|y| (i, y))
        })
        .collect()
}

/// Country prefix of a dotted series code (`"GHA.GGXWDG_NGDP"` → `"GHA"`).
pub fn series_code_country(code: &str) -> &str {
    code.split('.').next().unwrap_or(code).trim()
}

/// Step-expand annual rows (dated January) to all twelve months of their
/// year. Row order is preserved, so sorted input stays sorted.
pub fn expand_annual(rows: Vec<Row>) -> Vec<Row> {
    let mut out = Vec::with_capacity(rows.len() * 12);
    for ((country, month), values) in rows {
        let january = month.shift(-(month.month() as i64 - 1));
        for m in 0..12 {
            out.push(((country, january.shift(m)), values.clone()));
        }
    }
    out
}

/// Keep rows whose month lies in the inclusive window.
pub fn apply_window(rows: Vec<Row>, start: Option<YearMonth>, end: Option<YearMonth>) -> Vec<Row> {
    rows.into_iter()
        .filter(|((_, m), _)| start.is_none_or(|s| *m >= s) && end.is_none_or(|e| *m <= e))
        .collect()
}

/// Countries present in a set of rows, sorted and de-duplicated.
pub fn row_countries(rows: &[Row]) -> Vec<CountryCode> {
    let mut out: Vec<CountryCode> = rows.iter().map(|((c, _), _)| *c).collect();
    out.sort();
    out.dedup();
    out
}
