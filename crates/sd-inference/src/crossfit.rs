//! Nuisance estimation with K-fold cross-fitting.
//!
//! For each fold the outcome and treatment models are trained on the other
//! folds only, and predict the held-out rows. Folds run on the rayon pool;
//! each fold copies its own training rows and fills its own result slot, so
//! the output does not depend on the number of threads.

use rayon::prelude::*;
use sd_core::{Error, Learner, Result};
use serde::{Deserialize, Serialize};

use crate::data::DmlData;
use crate::folds::{FoldAssignment, FoldStrategy, assign_folds};
use crate::learners::LearnerSpec;
use crate::stats::r_squared;

fn default_folds() -> usize {
    5
}

fn default_min_fold_rows() -> usize {
    2
}

fn default_min_train_rows() -> usize {
    3
}

fn default_true() -> bool {
    true
}

/// Cross-fitting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NuisanceConfig {
    /// Number of folds K.
    #[serde(default = "default_folds")]
    pub folds: usize,
    /// Fold strategy.
    #[serde(default)]
    pub strategy: FoldStrategy,
    /// Learner for E[y | x].
    #[serde(default)]
    pub learner_y: LearnerSpec,
    /// Learner for E[d | x].
    #[serde(default)]
    pub learner_d: LearnerSpec,
    /// Folds with fewer held-out rows are excluded.
    #[serde(default = "default_min_fold_rows")]
    pub min_fold_rows: usize,
    /// Folds with fewer training rows are excluded.
    #[serde(default = "default_min_train_rows")]
    pub min_train_rows: usize,
    /// Out-of-fold R² below this is reported as a warning.
    #[serde(default)]
    pub r2_warning_threshold: f64,
    /// Fit folds on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for NuisanceConfig {
    fn default() -> Self {
        Self {
            folds: default_folds(),
            strategy: FoldStrategy::default(),
            learner_y: LearnerSpec::default(),
            learner_d: LearnerSpec::default(),
            min_fold_rows: default_min_fold_rows(),
            min_train_rows: default_min_train_rows(),
            r2_warning_threshold: 0.0,
            parallel: true,
        }
    }
}

/// Diagnostics of one fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldDiagnostics {
    /// Fold index.
    pub fold: usize,
    /// Training rows.
    pub n_train: usize,
    /// Held-out rows.
    pub n_test: usize,
    /// Out-of-fold R² of the outcome model.
    pub r2_y: Option<f64>,
    /// Out-of-fold R² of the treatment model.
    pub r2_d: Option<f64>,
    /// Whether the fold contributes residuals.
    pub usable: bool,
    /// Warnings raised for this fold.
    pub warnings: Vec<String>,
}

/// Residual pair of one sample row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualRow {
    /// Sample row index.
    pub row: usize,
    /// Fold that held the row out.
    pub fold: usize,
    /// Observed outcome.
    pub y: f64,
    /// Observed treatment.
    pub d: f64,
    /// Out-of-fold outcome prediction.
    pub y_hat: f64,
    /// Out-of-fold treatment prediction.
    pub d_hat: f64,
    /// `y − y_hat`.
    pub y_res: f64,
    /// `d − d_hat`.
    pub d_res: f64,
}

/// Output of one cross-fitting pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossFitResult {
    /// Fold partition.
    pub assignment: FoldAssignment,
    /// Residuals of rows in usable folds, in sample order.
    pub residuals: Vec<ResidualRow>,
    /// Per-fold diagnostics.
    pub folds: Vec<FoldDiagnostics>,
    /// Seed used for the partition and learners.
    pub seed: u64,
}

impl CrossFitResult {
    /// Number of folds that contributed residuals.
    pub fn n_usable(&self) -> usize {
        self.folds.iter().filter(|f| f.usable).count()
    }

    /// All fold warnings, prefixed with the fold index.
    pub fn warnings(&self) -> Vec<String> {
        self.folds
            .iter()
            .flat_map(|f| f.warnings.iter().map(move |w| format!("fold {}: {w}", f.fold)))
            .collect()
    }
}

struct FoldOutput {
    diagnostics: FoldDiagnostics,
    rows: Vec<usize>,
    y_hat: Vec<f64>,
    d_hat: Vec<f64>,
}

fn gather(data: &DmlData, rows: &[usize]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mut x = Vec::with_capacity(rows.len() * data.p);
    for &i in rows {
        x.extend_from_slice(data.x_row(i));
    }
    let y = rows.iter().map(|&i| data.y[i]).collect();
    let d = rows.iter().map(|&i| data.d[i]).collect();
    (x, y, d)
}

fn fit_fold(
    data: &DmlData,
    assignment: &FoldAssignment,
    k: usize,
    learners: (&dyn Learner, &dyn Learner),
    config: &NuisanceConfig,
    seed: u64,
) -> FoldOutput {
    let test = assignment.test_rows(k);
    let train = assignment.train_rows(k);
    let mut diagnostics = FoldDiagnostics {
        fold: k,
        n_train: train.len(),
        n_test: test.len(),
        r2_y: None,
        r2_d: None,
        usable: false,
        warnings: Vec::new(),
    };
    let excluded = |mut diagnostics: FoldDiagnostics, why: String| {
        tracing::warn!(fold = k, reason = %why, "fold excluded");
        diagnostics.warnings.push(format!("excluded: {why}"));
        FoldOutput { diagnostics, rows: Vec::new(), y_hat: Vec::new(), d_hat: Vec::new() }
    };

    if test.len() < config.min_fold_rows {
        let why = format!("{} held-out rows < min_fold_rows {}", test.len(), config.min_fold_rows);
        return excluded(diagnostics, why);
    }
    if train.len() < config.min_train_rows {
        let why = format!("{} training rows < min_train_rows {}", train.len(), config.min_train_rows);
        return excluded(diagnostics, why);
    }

    let (x_train, y_train, d_train) = gather(data, &train);
    let (x_test, y_test, d_test) = gather(data, &test);
    let fold_seed = seed.wrapping_add(1 + 2 * k as u64);
    let model_y = match learners.0.fit(&x_train, &y_train, data.p, fold_seed) {
        Ok(m) => m,
        Err(e) => return excluded(diagnostics, format!("outcome model ({}) failed: {e}", learners.0.name())),
    };
    let model_d = match learners.1.fit(&x_train, &d_train, data.p, fold_seed.wrapping_add(1)) {
        Ok(m) => m,
        Err(e) => return excluded(diagnostics, format!("treatment model ({}) failed: {e}", learners.1.name())),
    };
    let y_hat = model_y.predict(&x_test, data.p);
    let d_hat = model_d.predict(&x_test, data.p);
    if y_hat.iter().chain(&d_hat).any(|v| !v.is_finite()) {
        return excluded(diagnostics, "non-finite out-of-fold predictions".to_string());
    }

    let r2_y = r_squared(&y_test, &y_hat);
    let r2_d = r_squared(&d_test, &d_hat);
    for (label, r2) in [("outcome", r2_y), ("treatment", r2_d)] {
        if r2.is_nan() {
            diagnostics.warnings.push(format!("{label} out-of-fold R² undefined (no variance in held-out rows)"));
        } else if r2 < config.r2_warning_threshold {
            tracing::warn!(fold = k, model = label, r2, threshold = config.r2_warning_threshold, "low out-of-fold R²");
            diagnostics.warnings.push(format!(
                "{label} out-of-fold R² {r2:.4} below threshold {}",
                config.r2_warning_threshold
            ));
        }
    }
    diagnostics.r2_y = r2_y.is_finite().then_some(r2_y);
    diagnostics.r2_d = r2_d.is_finite().then_some(r2_d);
    diagnostics.usable = true;
    tracing::debug!(fold = k, n_train = train.len(), n_test = test.len(), r2_y, r2_d, "fold fitted");
    FoldOutput { diagnostics, rows: test, y_hat, d_hat }
}

/// Cross-fit outcome and treatment nuisance models.
///
/// Fails with [`Error::InsufficientFolds`] when fewer than two folds remain
/// usable after exclusions.
pub fn cross_fit(data: &DmlData, config: &NuisanceConfig, seed: u64) -> Result<CrossFitResult> {
    let assignment = assign_folds(&data.country_ids, config.folds, config.strategy, seed)?;
    cross_fit_with(data, &assignment, config, seed)
}

/// Cross-fit over a given fold partition.
pub fn cross_fit_with(
    data: &DmlData,
    assignment: &FoldAssignment,
    config: &NuisanceConfig,
    seed: u64,
) -> Result<CrossFitResult> {
    if assignment.n() != data.n() {
        return Err(Error::Validation(format!(
            "fold assignment covers {} rows, sample has {}",
            assignment.n(),
            data.n()
        )));
    }
    let learner_y = config.learner_y.build();
    let learner_d = config.learner_d.build();
    let learners = (learner_y.as_ref(), learner_d.as_ref());

    let run = |k: usize| fit_fold(data, assignment, k, learners, config, seed);
    let outputs: Vec<FoldOutput> = if config.parallel {
        (0..assignment.k()).into_par_iter().map(run).collect()
    } else {
        (0..assignment.k()).map(run).collect()
    };

    let usable = outputs.iter().filter(|o| o.diagnostics.usable).count();
    if usable < 2 {
        return Err(Error::InsufficientFolds { usable, required: 2 });
    }

    let mut residuals = Vec::with_capacity(data.n());
    let mut folds = Vec::with_capacity(outputs.len());
    for out in outputs {
        for (j, &row) in out.rows.iter().enumerate() {
            let (y, d) = (data.y[row], data.d[row]);
            residuals.push(ResidualRow {
                row,
                fold: out.diagnostics.fold,
                y,
                d,
                y_hat: out.y_hat[j],
                d_hat: out.d_hat[j],
                y_res: y - out.y_hat[j],
                d_res: d - out.d_hat[j],
            });
        }
        folds.push(out.diagnostics);
    }
    residuals.sort_by_key(|r| r.row);
    tracing::info!(folds = assignment.k(), usable, rows = residuals.len(), "cross-fitting done");
    Ok(CrossFitResult { assignment: assignment.clone(), residuals, folds, seed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ClusterVar;
    use crate::learners::{LinearParams, TreeParams};
    use sd_core::{CountryCode, Predictor, YearMonth};
    use std::sync::Mutex;

    fn data(n_countries: usize, n_months: usize) -> DmlData {
        let codes = ["ARE", "CIV", "GHA", "MAR", "URY", "UKR"];
        let mut y = Vec::new();
        let mut d = Vec::new();
        let mut x = Vec::new();
        let mut keys = Vec::new();
        for (g, code) in codes.iter().take(n_countries).enumerate() {
            for t in 0..n_months {
                let xv = ((g * 7 + t * 3) % 11) as f64 - 5.0;
                let dv = 0.8 * xv + ((t * 5 + g) % 3) as f64;
                d.push(dv);
                y.push(2.0 * dv + 0.5 * xv + g as f64);
                x.push(xv);
                keys.push((CountryCode::new(code).unwrap(), YearMonth::new(2020, 1).unwrap().shift(t as i64)));
            }
        }
        DmlData::new(y, d, x, vec!["x".into()], keys, ClusterVar::Country).unwrap()
    }

    /// Records which rows each fit saw.
    struct Spy {
        seen: Mutex<Vec<Vec<u64>>>,
    }

    struct Zero;

    impl Predictor for Zero {
        fn predict_row(&self, _row: &[f64]) -> f64 {
            0.0
        }
    }

    impl Learner for Spy {
        fn name(&self) -> &str {
            "spy"
        }

        fn fit(&self, x: &[f64], _y: &[f64], _p: usize, _seed: u64) -> Result<Box<dyn Predictor>> {
            // x carries the row id in this test.
            self.seen.lock().unwrap().push(x.iter().map(|v| *v as u64).collect());
            Ok(Box::new(Zero))
        }
    }

    #[test]
    fn test_out_of_fold_predictions_never_see_their_row() {
        let n = 20;
        let keys: Vec<_> = (0..n)
            .map(|i| (CountryCode::new("GHA").unwrap(), YearMonth::new(2000, 1).unwrap().shift(i)))
            .collect();
        let ids: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let data = DmlData::new(ids.clone(), ids.clone(), ids, vec!["id".into()], keys, ClusterVar::None).unwrap();
        let assignment = assign_folds(&data.country_ids, 4, FoldStrategy::Random, 3).unwrap();
        let spy = Spy { seen: Mutex::new(Vec::new()) };
        for k in 0..4 {
            let out = fit_fold(&data, &assignment, k, (&spy, &spy), &NuisanceConfig::default(), 0);
            assert!(out.diagnostics.usable);
            let seen = spy.seen.lock().unwrap().pop().unwrap();
            for row in &out.rows {
                assert!(!seen.contains(&(*row as u64)));
            }
        }
    }

    #[test]
    fn test_linear_cross_fit_covers_every_row() {
        let data = data(3, 8);
        let result = cross_fit(&data, &NuisanceConfig { folds: 4, ..Default::default() }, 1).unwrap();
        assert_eq!(result.residuals.len(), data.n());
        assert_eq!(result.n_usable(), 4);
        assert!(result.residuals.windows(2).all(|w| w[0].row < w[1].row));
        for r in &result.residuals {
            assert_eq!(r.fold, result.assignment.labels()[r.row]);
            assert!((r.y_res - (r.y - r.y_hat)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let data = data(4, 10);
        let tree = LearnerSpec::Tree(TreeParams { min_samples_leaf: 2, ..Default::default() });
        let par = NuisanceConfig { learner_y: tree.clone(), learner_d: tree, ..Default::default() };
        let seq = NuisanceConfig { parallel: false, ..par.clone() };
        let a = cross_fit(&data, &par, 9).unwrap();
        let b = cross_fit(&data, &seq, 9).unwrap();
        assert_eq!(a.residuals, b.residuals);
    }

    #[test]
    fn test_small_folds_are_excluded_then_fail() {
        let data = data(2, 3);
        // 6 rows in 5 folds: every fold has 1 or 2 held-out rows.
        let cfg = NuisanceConfig { folds: 5, strategy: FoldStrategy::Random, min_fold_rows: 2, ..Default::default() };
        match cross_fit(&data, &cfg, 0) {
            Err(Error::InsufficientFolds { usable, required }) => {
                assert_eq!(usable, 1);
                assert_eq!(required, 2);
            }
            other => panic!("expected InsufficientFolds, got {other:?}"),
        }

        let cfg = NuisanceConfig { folds: 3, strategy: FoldStrategy::Random, min_fold_rows: 3, ..Default::default() };
        assert!(matches!(cross_fit(&data, &cfg, 0), Err(Error::InsufficientFolds { usable: 0, .. })));

        let ok = NuisanceConfig {
            folds: 3,
            learner_y: LearnerSpec::Linear(LinearParams::default()),
            ..Default::default()
        };
        assert!(cross_fit(&data, &ok, 0).is_ok());
    }

    #[test]
    fn test_low_r2_is_a_warning() {
        let data = data(3, 8);
        let cfg = NuisanceConfig {
            folds: 3,
            learner_y: LearnerSpec::Mean,
            learner_d: LearnerSpec::Mean,
            r2_warning_threshold: 0.5,
            ..Default::default()
        };
        let result = cross_fit(&data, &cfg, 2).unwrap();
        assert_eq!(result.n_usable(), 3);
        assert!(result.warnings().iter().any(|w| w.contains("below threshold")));
    }
}
