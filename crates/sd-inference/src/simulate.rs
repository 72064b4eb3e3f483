//! Synthetic country × month panels with a known treatment effect.
//!
//! `y = θ·d + β·x + α_g + ε`, `d = γ·x + λ·α_g + η`, with country offsets
//! `α_g ~ N(0, σ_α²)` and i.i.d. normal `x`, `η`, `ε`.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use sd_core::{CountryCode, Error, Result, YearMonth};
use sd_panel::{Column, FeatureConfig, Panel, expand_features};
use serde::{Deserialize, Serialize};

use crate::data::{ClusterVar, DataSpec, DmlData};

/// Synthetic panel parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyntheticConfig {
    /// Countries G.
    pub n_countries: usize,
    /// Months per country T.
    pub n_months: usize,
    /// True effect θ.
    pub theta: f64,
    /// β, effect of the control on the outcome.
    pub control_coef: f64,
    /// γ, effect of the control on the treatment.
    pub treatment_control_coef: f64,
    /// σ_α, sd of the country offsets.
    pub country_offset_sd: f64,
    /// λ, loading of the treatment on the country offset.
    pub treatment_country_loading: f64,
    /// sd of η.
    pub treatment_noise_sd: f64,
    /// sd of ε.
    pub noise_sd: f64,
    /// Add `country_<ISO3>` indicators to the controls of [`synthetic_data`].
    pub country_dummies: bool,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_countries: 10,
            n_months: 12,
            theta: 2.0,
            control_coef: 0.5,
            treatment_control_coef: 0.5,
            country_offset_sd: 1.0,
            treatment_country_loading: 0.0,
            treatment_noise_sd: 1.0,
            noise_sd: 1.0,
            country_dummies: false,
            seed: 0,
        }
    }
}

/// Synthetic ISO3-shaped code for country `i` (`AAA`, `AAB`, …).
pub fn synthetic_country(i: usize) -> Result<CountryCode> {
    let letter = |k: usize| (b'A' + (k % 26) as u8) as char;
    let code: String = [letter(i / 676), letter(i / 26), letter(i)].iter().collect();
    CountryCode::new(&code)
}

fn normal(sd: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, sd).map_err(|e| Error::Validation(format!("invalid standard deviation {sd}: {e}")))
}

/// Panel with columns `y`, `d` and `x`, starting January 2010.
pub fn synthetic_panel(config: &SyntheticConfig) -> Result<Panel> {
    if config.n_countries == 0 || config.n_months == 0 {
        return Err(Error::Validation("synthetic panel needs countries and months".into()));
    }
    let mut rng = StdRng::seed_from_u64(config.seed);
    let offset = normal(config.country_offset_sd)?;
    let eta = normal(config.treatment_noise_sd)?;
    let eps = normal(config.noise_sd)?;
    let std = normal(1.0)?;
    let start = YearMonth::new(2010, 1)?;

    let n = config.n_countries * config.n_months;
    let mut keys = Vec::with_capacity(n);
    let (mut y, mut d, mut x) = (Vec::with_capacity(n), Vec::with_capacity(n), Vec::with_capacity(n));
    for g in 0..config.n_countries {
        let country = synthetic_country(g)?;
        let alpha = offset.sample(&mut rng);
        for t in 0..config.n_months {
            let xv = std.sample(&mut rng);
            let dv = config.treatment_control_coef * xv
                + config.treatment_country_loading * alpha
                + eta.sample(&mut rng);
            let yv = config.theta * dv + config.control_coef * xv + alpha + eps.sample(&mut rng);
            keys.push((country, start.shift(t as i64)));
            y.push(Some(yv));
            d.push(Some(dv));
            x.push(Some(xv));
        }
    }
    let mut panel = Panel::new(keys)?;
    panel.push_column(Column::value("y", y))?;
    panel.push_column(Column::value("d", d))?;
    panel.push_column(Column::value("x", x))?;
    Ok(panel)
}

/// Estimation sample of a synthetic panel, clustered by country.
pub fn synthetic_data(config: &SyntheticConfig) -> Result<DmlData> {
    let panel = synthetic_panel(config)?;
    let mut controls = vec!["x".to_string()];
    let panel = if config.country_dummies {
        let features = FeatureConfig { lags: Vec::new(), time_indicators: false, ..FeatureConfig::new("y") };
        controls.push(format!("{}*", features.country_prefix));
        expand_features(&panel, &features)?.0
    } else {
        panel
    };
    let spec = DataSpec { outcome: "y".into(), treatment: "d".into(), controls, cluster: ClusterVar::Country };
    DmlData::from_panel(&panel, &spec)
}
