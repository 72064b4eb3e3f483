//! # sd-panel
//!
//! Country × month panel construction for sovdml.
//!
//! - [`source`]: read one CSV source (long, wide-year or ratings layout) into monthly rows
//! - [`ratings`]: letter grades on a numeric scale, carried forward monthly
//! - [`assemble`]: full outer join of sources on (country, month)
//! - [`features`]: country / year-month indicators and calendar lags
//! - [`missing`]: completeness reports and explicit sample selection

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Panel Assembler.
pub mod assemble;
/// Country identifier normalization.
pub mod country;
/// Feature Expander.
pub mod features;
/// Panel CSV I/O.
pub mod io;
/// Credit-rating scales.
pub mod ratings;
/// Missing-Data Reporter.
pub mod missing;
/// Columnar panel type.
pub mod panel;
/// Layout and frequency conversions.
pub mod reshape;
/// Source-table ingest.
pub mod source;

pub use assemble::{
    AssemblyConfig, AssemblyReport, CountryMapConfig, DerivedColumn, assemble, derive_columns,
    join_tables,
};
pub use country::{CountryMap, Resolution};
pub use features::{
    DEFAULT_COUNTRY_PREFIX, DEFAULT_TIME_PREFIX, FeatureConfig, FeatureSummary, expand_features,
};
pub use io::{read_panel_csv, write_panel_csv};
pub use missing::{MissingReport, missing_report, select_countries, write_report_csv};
pub use panel::{Column, ColumnKind, Panel, PanelKey};
pub use ratings::{Grade, parse_grade};
pub use source::{Frequency, Layout, SourceReport, SourceSpec, SourceTable, read_source};
