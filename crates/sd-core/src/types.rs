//! Common domain types: ISO3 country codes and calendar months.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// ISO 3166-1 alpha-3 country code (three upper-case ASCII letters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode([u8; 3]);

impl CountryCode {
    /// Validate and build a code. Surrounding whitespace is ignored and
    /// lower-case letters are upper-cased.
    pub fn new(code: &str) -> Result<Self> {
        Self::try_parse(code).ok_or_else(|| Error::Parse {
            context: "ISO3 country code".to_string(),
            value: code.to_string(),
        })
    }

    /// Like [`CountryCode::new`] but without an error payload.
    pub fn try_parse(code: &str) -> Option<Self> {
        let bytes = code.trim().as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return None;
        }
        Some(Self([
            bytes[0].to_ascii_uppercase(),
            bytes[1].to_ascii_uppercase(),
            bytes[2].to_ascii_uppercase(),
        ]))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        // Constructed from ASCII letters only.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountryCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for CountryCode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<CountryCode> for String {
    fn from(c: CountryCode) -> Self {
        c.as_str().to_string()
    }
}

/// A calendar month. Ordered chronologically, displayed as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Build from year and 1-based month.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::Validation(format!("month must be in 1..=12, got {month}")));
        }
        Ok(Self { year, month })
    }

    /// Calendar year.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// 1-based month.
    pub fn month(&self) -> u32 {
        self.month
    }

    /// Months since year 0, January.
    pub fn index(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    /// Inverse of [`YearMonth::index`].
    pub fn from_index(index: i64) -> Self {
        let year = index.div_euclid(12) as i32;
        let month = index.rem_euclid(12) as u32 + 1;
        Self { year, month }
    }

    /// Shift by `delta` months (negative = earlier).
    pub fn shift(&self, delta: i64) -> Self {
        Self::from_index(self.index() + delta)
    }

    /// Signed number of months from `self` to `other`.
    pub fn months_until(&self, other: &YearMonth) -> i64 {
        other.index() - self.index()
    }

    /// The month containing a calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    /// Parse a date-like token into its month.
    ///
    /// Accepted: `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYY-MM-DD HH:MM:SS`,
    /// `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM`, `YYYYMmm` (e.g. `2020M03`) and a bare
    /// `YYYY`, which maps to January. Day-first and month-first slash dates
    /// are ambiguous and need an explicit format, see [`YearMonth::parse_with_format`].
    pub fn parse(s: &str) -> Result<Self> {
        parse_date(s, None).map(Self::from_date)
    }

    /// Parse with an explicit chrono format (e.g. `%m/%d/%Y`).
    pub fn parse_with_format(s: &str, format: &str) -> Result<Self> {
        parse_date(s, Some(format)).map(Self::from_date)
    }
}

/// Parse a date-like token into a calendar day.
///
/// With `format`, only that chrono format is tried. Without it the
/// [`YearMonth::parse`] formats apply; month-only tokens map to the first day
/// of the month and a bare year to January 1.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let t = s.trim();
    let fail = || Error::Parse { context: "date".to_string(), value: s.to_string() };

    if let Some(fmt) = format {
        return NaiveDate::parse_from_str(t, fmt)
            .or_else(|_| NaiveDateTime::parse_from_str(t, fmt).map(|dt| dt.date()))
            .map_err(|_| fail());
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return Ok(d);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(dt.date());
        }
    }

    let digits = |x: &str| !x.is_empty() && x.bytes().all(|b| b.is_ascii_digit());
    let first_day = |year: i32, month: u32| NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(fail);
    if t.len() == 4 && digits(t) {
        let year: i32 = t.parse().map_err(|_| fail())?;
        return first_day(year, 1);
    }
    if let Some((y, m)) = t.split_once('-').or_else(|| t.split_once('M'))
        && y.len() == 4
        && digits(y)
        && (1..=2).contains(&m.len())
        && digits(m)
    {
        let year: i32 = y.parse().map_err(|_| fail())?;
        let month: u32 = m.parse().map_err(|_| fail())?;
        return first_day(year, month);
    }
    Err(fail())
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<YearMonth> for String {
    fn from(m: YearMonth) -> Self {
        m.to_string()
    }
}
