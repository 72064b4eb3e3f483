//! # sd-inference
//!
//! Double machine learning for country × month panels.
//!
//! This crate provides:
//! - Nuisance learners (linear, tree, random forest, gradient boosting)
//! - Fold assignment and cross-fitting of the outcome and treatment models
//! - Orthogonal residual regression with cluster-robust inference
//! - Repeated sample splitting, placebo tests and sensitivity bounds
//! - Descriptive tables: summary statistics, correlations, VIF
//!
//! ## Architecture
//!
//! Learners plug in through the `Learner` trait from sd-core; the estimator
//! never names a concrete model family.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Result artifact schema
pub mod artifacts;
/// Cross-fitted nuisance estimation
pub mod crossfit;
/// Estimation sample
pub mod data;
/// Descriptive statistics
pub mod describe;
/// DML driver
pub mod dml;
/// Fold assignment
pub mod folds;
/// Nuisance learners
pub mod learners;
/// Orthogonal effect regression
pub mod orthogonal;
/// Placebo tests
pub mod placebo;
/// Omitted-variable sensitivity
pub mod sensitivity;
/// Synthetic panels with a known effect
pub mod simulate;
/// Numeric helpers
pub mod stats;

pub use artifacts::{DmlSummary, FoldRow, ResidualCsvRow, SCHEMA_VERSION, fold_rows, residual_rows};
pub use crossfit::{CrossFitResult, FoldDiagnostics, NuisanceConfig, ResidualRow, cross_fit, cross_fit_with};
pub use data::{ClusterVar, DataSpec, DmlData};
pub use describe::{
    CorrelationMatrix, SummaryRow, VifRow, VifTable, correlation_matrix, summary_stats, vif_table,
};
pub use dml::{DmlConfig, DmlFit, Repetition, aggregate, estimate_dml, estimate_split};
pub use folds::{FoldAssignment, FoldStrategy, assign_folds};
pub use learners::LearnerSpec;
pub use orthogonal::{EffectEstimate, SeKind, orthogonal_regression};
pub use placebo::{PlaceboConfig, PlaceboDraw, PlaceboKind, PlaceboSummary, run_placebo};
pub use sensitivity::{SensitivityConfig, SensitivityReport, SensitivityRow, sensitivity_analysis};
pub use simulate::{SyntheticConfig, synthetic_data, synthetic_panel};
pub use stats::Reference;
