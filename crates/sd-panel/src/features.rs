//! Feature Expander: fixed-effect indicators and calendar lags.

use sd_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::panel::{Column, ColumnKind, Panel};

fn default_lags() -> Vec<u32> {
    vec![1, 2]
}

/// Default name prefix of country indicator columns.
pub const DEFAULT_COUNTRY_PREFIX: &str = "country_";

/// Default name prefix of year-month indicator columns.
pub const DEFAULT_TIME_PREFIX: &str = "time_";

fn default_country_prefix() -> String {
    DEFAULT_COUNTRY_PREFIX.to_string()
}

fn default_time_prefix() -> String {
    DEFAULT_TIME_PREFIX.to_string()
}

fn default_true() -> bool {
    true
}

/// Feature expansion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureConfig {
    /// Outcome column; always lagged.
    pub outcome: String,
    /// Lag orders in months.
    #[serde(default = "default_lags")]
    pub lags: Vec<u32>,
    /// Further columns lagged with the same orders.
    #[serde(default)]
    pub lag_variables: Vec<String>,
    /// Emit one indicator per country.
    #[serde(default = "default_true")]
    pub country_indicators: bool,
    /// Emit one indicator per year-month.
    #[serde(default = "default_true")]
    pub time_indicators: bool,
    /// Prefix of country indicator names.
    #[serde(default = "default_country_prefix")]
    pub country_prefix: String,
    /// Prefix of time indicator names.
    #[serde(default = "default_time_prefix")]
    pub time_prefix: String,
}

impl FeatureConfig {
    /// Defaults for an outcome column.
    pub fn new(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            lags: default_lags(),
            lag_variables: Vec::new(),
            country_indicators: true,
            time_indicators: true,
            country_prefix: default_country_prefix(),
            time_prefix: default_time_prefix(),
        }
    }
}

/// What [`expand_features`] added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    /// Country indicator columns.
    pub country_indicators: Vec<String>,
    /// Time indicator columns.
    pub time_indicators: Vec<String>,
    /// Lag columns.
    pub lag_columns: Vec<String>,
}

impl FeatureSummary {
    /// Total number of columns added.
    pub fn n_added(&self) -> usize {
        self.country_indicators.len() + self.time_indicators.len() + self.lag_columns.len()
    }
}

fn indicator(flags: impl Iterator<Item = bool>) -> Vec<Option<f64>> {
    flags.map(|b| Some(if b { 1.0 } else { 0.0 })).collect()
}

/// Add indicator and lag columns to a panel. Row count is unchanged.
///
/// A lag of order `k` at (country, month) is the source value at
/// (country, month − k). It is missing when that record is absent, so a gap
/// in a country's series never borrows an older observation.
pub fn expand_features(panel: &Panel, config: &FeatureConfig) -> Result<(Panel, FeatureSummary)> {
    panel.values(&config.outcome)?;
    if config.lags.contains(&0) {
        return Err(Error::Validation("lag orders must be >= 1".into()));
    }

    let mut out = panel.clone();
    let mut summary = FeatureSummary::default();

    if config.country_indicators {
        for country in panel.countries() {
            let name = format!("{}{}", config.country_prefix, country);
            let values = indicator(panel.keys().iter().map(|k| k.0 == country));
            out.push_column(Column { name: name.clone(), kind: ColumnKind::CountryIndicator, values })?;
            summary.country_indicators.push(name);
        }
    }
    if config.time_indicators {
        for month in panel.months() {
            let name = format!("{}{}", config.time_prefix, month);
            let values = indicator(panel.keys().iter().map(|k| k.1 == month));
            out.push_column(Column { name: name.clone(), kind: ColumnKind::TimeIndicator, values })?;
            summary.time_indicators.push(name);
        }
    }

    let index = panel.row_index();
    let mut lagged: Vec<&str> = vec![config.outcome.as_str()];
    for v in &config.lag_variables {
        if !lagged.contains(&v.as_str()) {
            lagged.push(v);
        }
    }
    let mut lags = config.lags.clone();
    lags.sort_unstable();
    lags.dedup();
    for var in lagged {
        let source = panel.values(var)?;
        for &k in &lags {
            let name = format!("{var}_lag{k}");
            let values = panel
                .keys()
                .iter()
                .map(|&(c, m)| index.get(&(c, m.shift(-(k as i64)))).and_then(|&i| source[i]))
                .collect();
            out.push_column(Column { name: name.clone(), kind: ColumnKind::Lag, values })?;
            summary.lag_columns.push(name);
        }
    }

    tracing::info!(
        country_indicators = summary.country_indicators.len(),
        time_indicators = summary.time_indicators.len(),
        lags = summary.lag_columns.len(),
        "features expanded"
    );
    Ok((out, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelKey;
    use proptest::prelude::*;
    use sd_core::{CountryCode, YearMonth};

    fn key(c: &str, y: i32, m: u32) -> PanelKey {
        (CountryCode::new(c).unwrap(), YearMonth::new(y, m).unwrap())
    }

    fn sample() -> Panel {
        // GHA has a gap at 2020-03.
        let keys = vec![
            key("GHA", 2020, 1),
            key("GHA", 2020, 2),
            key("GHA", 2020, 4),
            key("URY", 2020, 2),
            key("URY", 2020, 3),
        ];
        let mut p = Panel::new(keys).unwrap();
        p.push_column(Column::value("y", vec![Some(1.0), Some(2.0), Some(4.0), None, Some(30.0)]))
            .unwrap();
        p
    }

    #[test]
    fn test_column_count_and_names() {
        let p = sample();
        let (out, summary) = expand_features(&p, &FeatureConfig::new("y")).unwrap();
        assert_eq!(out.n_rows(), p.n_rows());
        // 2 countries + 4 months + 2 lags
        assert_eq!(summary.n_added(), 8);
        assert_eq!(out.n_columns(), p.n_columns() + 8);
        assert!(out.column("country_GHA").is_some());
        assert!(out.column("time_2020-04").is_some());
        assert_eq!(summary.lag_columns, vec!["y_lag1", "y_lag2"]);
    }

    #[test]
    fn test_calendar_lags_respect_gaps() {
        let (out, _) = expand_features(&sample(), &FeatureConfig::new("y")).unwrap();
        let lag1 = out.values("y_lag1").unwrap();
        let lag2 = out.values("y_lag2").unwrap();
        assert_eq!(lag1, &[None, Some(1.0), None, None, None]);
        assert_eq!(lag2, &[None, None, Some(2.0), None, None]);
    }

    #[test]
    fn test_rejects_bad_config() {
        let p = sample();
        assert!(expand_features(&p, &FeatureConfig::new("missing")).is_err());
        let mut cfg = FeatureConfig::new("y");
        cfg.lags = vec![0];
        assert!(expand_features(&p, &cfg).is_err());

        let mut clash = sample();
        clash.push_column(Column::value("y_lag1", vec![None; 5])).unwrap();
        assert!(matches!(
            expand_features(&clash, &FeatureConfig::new("y")),
            Err(Error::ColumnCollision { .. })
        ));
    }

    fn arb_panel() -> impl Strategy<Value = Panel> {
        prop::collection::btree_set((0usize..4, 0i64..18), 1..40).prop_flat_map(|set| {
            let n = set.len();
            (Just(set), prop::collection::vec(prop::option::of(-10.0f64..10.0), n))
        })
        .prop_map(|(set, ys)| {
            let codes = ["ARE", "GHA", "MAR", "URY"];
            let base = YearMonth::new(2019, 11).unwrap();
            let keys: Vec<PanelKey> = set
                .into_iter()
                .map(|(c, t)| (CountryCode::new(codes[c]).unwrap(), base.shift(t)))
                .collect();
            let mut p = Panel::new(keys).unwrap();
            p.push_column(Column::value("y", ys)).unwrap();
            p
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_indicators_are_one_hot(p in arb_panel()) {
            let (out, summary) = expand_features(&p, &FeatureConfig::new("y")).unwrap();
            for row in 0..out.n_rows() {
                let sum = |names: &[String]| -> f64 {
                    names.iter().map(|n| out.values(n).unwrap()[row].unwrap()).sum()
                };
                prop_assert_eq!(sum(&summary.country_indicators), 1.0);
                prop_assert_eq!(sum(&summary.time_indicators), 1.0);
            }
        }

        #[test]
        fn prop_lag1_matches_previous_month(p in arb_panel()) {
            let (out, _) = expand_features(&p, &FeatureConfig::new("y")).unwrap();
            let index = p.row_index();
            let y = p.values("y").unwrap();
            let lag1 = out.values("y_lag1").unwrap();
            for (row, &(c, m)) in p.keys().iter().enumerate() {
                match index.get(&(c, m.shift(-1))) {
                    Some(&prev) => prop_assert_eq!(lag1[row], y[prev]),
                    None => prop_assert!(lag1[row].is_none()),
                }
            }
        }
    }
}
