//! Error types for sovdml

use thiserror::Error;

/// sovdml error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV reading/writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A cell or token that could not be parsed.
    #[error("cannot parse {context}: {value:?}")]
    Parse {
        /// Where the value came from (e.g. `"yields.csv line 12, column date"`).
        context: String,
        /// The raw text.
        value: String,
    },

    /// A country identifier with no mapping that is not marked ignorable.
    #[error("unmapped country identifier {identifier:?} in source '{source_name}' (line {line})")]
    UnmappedCountry {
        /// Source table name.
        source_name: String,
        /// 1-based line number in the source file.
        line: u64,
        /// Raw identifier as read.
        identifier: String,
    },

    /// Two records share the same (country, month) key.
    #[error("duplicate key ({country}, {month}) in source '{source_name}'")]
    DuplicateKey {
        /// Source table name.
        source_name: String,
        /// ISO3 country code.
        country: String,
        /// Month (`YYYY-MM`).
        month: String,
    },

    /// Dates go backwards within one country of a source table.
    #[error(
        "non-monotonic dates for {country} in source '{source_name}': {offending} follows {previous} (line {line})"
    )]
    NonMonotonicDates {
        /// Source table name.
        source_name: String,
        /// ISO3 country code.
        country: String,
        /// Last month seen for the country.
        previous: String,
        /// Month that broke the ordering.
        offending: String,
        /// 1-based line number of the offending record.
        line: u64,
    },

    /// The same canonical column is provided twice.
    #[error("column '{column}' provided by both '{first}' and '{second}'")]
    ColumnCollision {
        /// Canonical column name.
        column: String,
        /// First provider.
        first: String,
        /// Second provider.
        second: String,
    },

    /// Too few cross-fitting folds survived to aggregate an estimate.
    #[error("only {usable} usable folds remain (need at least {required})")]
    InsufficientFolds {
        /// Folds that fitted successfully.
        usable: usize,
        /// Minimum required.
        required: usize,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
