//! # sd-core
//!
//! Core types, traits and errors shared by the sovdml crates.
//!
//! - [`CountryCode`] / [`YearMonth`]: the (country, month) panel key
//! - [`Learner`] / [`Predictor`]: pluggable nuisance-model strategy
//! - [`Error`] / [`Result`]: error type used by every library crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{Learner, Predictor};
pub use types::{CountryCode, YearMonth, parse_date};

/// Version of the sovdml crates.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
