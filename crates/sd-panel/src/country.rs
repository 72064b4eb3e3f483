//! Country identifier normalization (name → ISO3).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use sd_core::{CountryCode, Error, Result};

/// Names that appear verbatim in the raw yield exports instead of ISO3 codes.
const DEFAULT_NAMES: &[(&str, &str)] = &[
    ("ESTONIA", "EST"),
    ("ETHIOPIA", "ETH"),
    ("IVORY COAST", "CIV"),
    ("GHANA", "GHA"),
    ("KUWAIT", "KWT"),
    ("MOROCCO", "MAR"),
    ("SAUDI ARABIA", "SAU"),
    ("UKRAINE", "UKR"),
    ("UNITED ARAB EMIRATES", "ARE"),
    ("URUGUAY", "URY"),
];

/// Outcome of resolving one raw identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Identifier maps to this code.
    Code(CountryCode),
    /// Identifier is explicitly ignorable; its rows are dropped.
    Ignored,
    /// No mapping.
    Unmapped,
}

/// Explicit mapping table from raw country identifiers to ISO3 codes.
///
/// Lookup is case-insensitive and collapses internal whitespace. Explicit
/// entries win over the ignore list, which wins over ISO3 passthrough.
#[derive(Debug, Clone)]
pub struct CountryMap {
    names: HashMap<String, CountryCode>,
    ignore: HashSet<String>,
    passthrough_iso3: bool,
}

impl Default for CountryMap {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_key(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

impl CountryMap {
    /// Empty map with ISO3 passthrough enabled.
    pub fn new() -> Self {
        Self { names: HashMap::new(), ignore: HashSet::new(), passthrough_iso3: true }
    }

    /// Map pre-loaded with the names found in the raw yield exports.
    pub fn with_defaults() -> Self {
        let mut map = Self::new();
        for (name, code) in DEFAULT_NAMES {
            if let Some(code) = CountryCode::try_parse(code) {
                map.names.insert(normalize_key(name), code);
            }
        }
        map
    }

    /// Enable or disable passing valid ISO3 identifiers through unchanged.
    pub fn with_passthrough(mut self, enabled: bool) -> Self {
        self.passthrough_iso3 = enabled;
        self
    }

    /// Add (or replace) a mapping.
    pub fn insert(&mut self, name: &str, code: CountryCode) {
        self.names.insert(normalize_key(name), code);
    }

    /// Mark an identifier as ignorable.
    pub fn ignore(&mut self, name: &str) {
        self.ignore.insert(normalize_key(name));
    }

    /// Number of explicit mappings.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when there are no explicit mappings.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Merge mappings from a CSV file with a header and two columns
    /// (`name`, `iso3`). A blank `iso3` marks the name as ignorable.
    pub fn extend_from_csv(&mut self, path: &Path) -> Result<usize> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;
        let mut added = 0;
        for record in rdr.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let name = record.get(0).unwrap_or("");
            let code = record.get(1).unwrap_or("");
            if name.is_empty() {
                continue;
            }
            if code.is_empty() {
                self.ignore(name);
                continue;
            }
            let code = CountryCode::try_parse(code).ok_or_else(|| Error::Parse {
                context: format!("{} line {line}, iso3", path.display()),
                value: code.to_string(),
            })?;
            self.insert(name, code);
            added += 1;
        }
        Ok(added)
    }

    /// Resolve an identifier without failing.
    pub fn resolve(&self, identifier: &str) -> Resolution {
        let key = normalize_key(identifier);
        if let Some(code) = self.names.get(&key) {
            return Resolution::Code(*code);
        }
        if self.ignore.contains(&key) {
            return Resolution::Ignored;
        }
        if self.passthrough_iso3
            && let Some(code) = CountryCode::try_parse(&key)
        {
            return Resolution::Code(code);
        }
        Resolution::Unmapped
    }

    /// Resolve an identifier read from `source_name` at `line`.
    ///
    /// Returns `Ok(None)` for ignorable identifiers and
    /// [`Error::UnmappedCountry`] for anything without a mapping.
    pub fn normalize(
        &self,
        identifier: &str,
        source_name: &str,
        line: u64,
    ) -> Result<Option<CountryCode>> {
        match self.resolve(identifier) {
            Resolution::Code(c) => Ok(Some(c)),
            Resolution::Ignored => Ok(None),
            Resolution::Unmapped => Err(Error::UnmappedCountry {
                source_name: source_name.to_string(),
                line,
                identifier: identifier.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_cover_raw_export_names() {
        let map = CountryMap::with_defaults();
        assert_eq!(map.len(), DEFAULT_NAMES.len());
        let civ = CountryCode::new("CIV").unwrap();
        assert_eq!(map.resolve("IVORY COAST"), Resolution::Code(civ));
        assert_eq!(map.resolve("  ivory   coast "), Resolution::Code(civ));
    }

    #[test]
    fn test_passthrough_and_unmapped() {
        let map = CountryMap::with_defaults();
        assert_eq!(map.resolve("gha"), Resolution::Code(CountryCode::new("GHA").unwrap()));
        assert_eq!(map.resolve("Atlantis"), Resolution::Unmapped);

        let strict = CountryMap::with_defaults().with_passthrough(false);
        assert_eq!(strict.resolve("BRA"), Resolution::Unmapped);

        let err = map.normalize("Atlantis", "yields", 7).unwrap_err();
        match err {
            Error::UnmappedCountry { source_name, line, identifier } => {
                assert_eq!(source_name, "yields");
                assert_eq!(line, 7);
                assert_eq!(identifier, "Atlantis");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ignore_and_explicit_precedence() {
        let mut map = CountryMap::new();
        map.ignore("Euro Area");
        map.insert("UAE", CountryCode::new("ARE").unwrap());
        assert_eq!(map.normalize("EURO AREA", "s", 1).unwrap(), None);
        // "UAE" is three letters but the explicit entry wins over passthrough.
        assert_eq!(map.resolve("UAE"), Resolution::Code(CountryCode::new("ARE").unwrap()));
    }

    #[test]
    fn test_extend_from_csv() {
        let mut g = tempfile::NamedTempFile::new().unwrap();
        writeln!(g, "name,iso3").unwrap();
        writeln!(g, "\"Korea, Rep.\",KOR").unwrap();
        writeln!(g, "World,").unwrap();
        g.flush().unwrap();
        let mut map = CountryMap::new();
        assert_eq!(map.extend_from_csv(g.path()).unwrap(), 1);
        assert_eq!(map.resolve("korea, rep."), Resolution::Code(CountryCode::new("KOR").unwrap()));
        assert_eq!(map.resolve("World"), Resolution::Ignored);
    }
}
