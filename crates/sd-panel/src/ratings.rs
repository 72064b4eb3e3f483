//! Sovereign credit ratings: letter grades on a numeric scale, carried
//! forward from each rating action to a monthly series per agency.

use chrono::NaiveDate;
use sd_core::{CountryCode, YearMonth};

use crate::reshape::Row;

/// Score of AAA / Aaa.
pub const TOP_SCORE: f64 = 21.0;

/// S&P and Fitch grades, lowest first (C = 1 … AAA = 21).
const SP_FITCH: [&str; 21] = [
    "C", "CC", "CCC-", "CCC", "CCC+", "B-", "B", "B+", "BB-", "BB", "BB+", "BBB-", "BBB", "BBB+",
    "A-", "A", "A+", "AA-", "AA", "AA+", "AAA",
];

/// Moody's grades (upper-cased), aligned notch for notch with [`SP_FITCH`].
const MOODYS: [&str; 21] = [
    "C", "CA", "CAA3", "CAA2", "CAA1", "B3", "B2", "B1", "BA3", "BA2", "BA1", "BAA3", "BAA2", "BAA1",
    "A3", "A2", "A1", "AA3", "AA2", "AA1", "AAA",
];

/// Default and selective-default grades, scored 0.
const DEFAULT_GRADES: &[&str] = &["SD", "D", "RD", "DD", "DDD", "SD/D"];

/// Tokens that end an agency's running rating.
const WITHDRAWN: &[&str] = &["NR", "N.R.", "WD", "WR", "NOT RATED", "SUSPENDED"];

/// One parsed rating token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Grade {
    /// Numeric score: 21 for AAA / Aaa down to 1 for C, 0 in default.
    Score(f64),
    /// Not rated or withdrawn.
    Withdrawn,
}

/// Map an S&P, Fitch or Moody's letter grade to the numeric scale.
///
/// Matching ignores case, a `(P)` prefix, a `(u)` suffix and watch markers
/// (`*+`, `*-`). Returns `None` for an unrecognized token.
pub fn parse_grade(raw: &str) -> Option<Grade> {
    let mut t = raw.trim().to_ascii_uppercase();
    if let Some(rest) = t.strip_prefix("(P)") {
        t = rest.trim().to_string();
    }
    for suffix in ["(U)", "*+", "*-", "*"] {
        if let Some(rest) = t.strip_suffix(suffix) {
            t = rest.trim().to_string();
            break;
        }
    }
    if WITHDRAWN.contains(&t.as_str()) {
        return Some(Grade::Withdrawn);
    }
    if DEFAULT_GRADES.contains(&t.as_str()) {
        return Some(Grade::Score(0.0));
    }
    SP_FITCH
        .iter()
        .position(|g| *g == t)
        .or_else(|| MOODYS.iter().position(|g| *g == t))
        .map(|i| Grade::Score(i as f64 + 1.0))
}

/// A dated rating action of one agency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingEvent {
    /// Rated sovereign.
    pub country: CountryCode,
    /// Action date.
    pub date: NaiveDate,
    /// Index of the agency's output column.
    pub agency: usize,
    /// New grade.
    pub grade: Grade,
}

/// Carry rating actions forward to one row per (country, month).
///
/// Each country spans from the month of its first action to `horizon`. An
/// agency's column is missing before its first action and after a
/// withdrawal; when an agency acts twice in one month the later action
/// holds. Output is sorted by (country, month).
pub fn carry_forward(mut events: Vec<RatingEvent>, n_agencies: usize, horizon: YearMonth) -> Vec<Row> {
    events.sort_by_key(|e| (e.country, e.date));
    let mut out = Vec::new();
    let mut start = 0;
    while start < events.len() {
        let country = events[start].country;
        let end = events[start..]
            .iter()
            .position(|e| e.country != country)
            .map_or(events.len(), |k| start + k);
        let group = &events[start..end];

        let mut state: Vec<Option<f64>> = vec![None; n_agencies];
        let mut next = 0;
        let mut month = YearMonth::from_date(group[0].date);
        while month <= horizon {
            while let Some(e) = group.get(next).filter(|e| YearMonth::from_date(e.date) <= month) {
                state[e.agency] = match e.grade {
                    Grade::Score(s) => Some(s),
                    Grade::Withdrawn => None,
                };
                next += 1;
            }
            out.push(((country, month), state.clone()));
            month = month.shift(1);
        }
        start = end;
    }
    out
}
