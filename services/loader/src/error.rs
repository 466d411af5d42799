//! Error kinds raised by the loader.
//!
//! Two families live here. `LoadError` aborts the run. `FieldIssue` never
//! does: the Normalizer replaces the offending value with the variant's
//! fallback and keeps the row.

use thiserror::Error;

/// Fatal conditions detected by the loader itself. Database and I/O errors
/// travel as `anyhow::Error` with context attached at the call site.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported input file type: {path} (expected .csv, .xls or .xlsx)")]
    UnsupportedInput { path: String },

    #[error("workbook has no sheets: {path}")]
    EmptyWorkbook { path: String },

    #[error("sheet '{sheet}' not found in workbook (available: {available})")]
    MissingSheet { sheet: String, available: String },

    #[error("date {date} is outside the calendar dimension's year range")]
    YearOutOfRange { date: chrono::NaiveDate },
}

/// Row-level degrade kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Error)]
pub enum FieldIssue {
    #[error("timestamp matches no known format")]
    UnparsableTimestamp,

    #[error("no leading numeral in measure")]
    NonNumericMeasure,

    #[error("state code is not exactly two letters")]
    InvalidStateCode,

    #[error("quantity is not an integer")]
    InvalidQuantity,
}

/// The value a degraded field takes instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Null,
    Value(i32),
}

impl FieldIssue {
    pub const ALL: [FieldIssue; 4] = [
        FieldIssue::UnparsableTimestamp,
        FieldIssue::NonNumericMeasure,
        FieldIssue::InvalidStateCode,
        FieldIssue::InvalidQuantity,
    ];

    /// Timestamps, measures and state codes become null; quantity becomes 1.
    pub fn fallback(self) -> Fallback {
        match self {
            FieldIssue::UnparsableTimestamp
            | FieldIssue::NonNumericMeasure
            | FieldIssue::InvalidStateCode => Fallback::Null,
            FieldIssue::InvalidQuantity => Fallback::Value(1),
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            FieldIssue::UnparsableTimestamp => "unparsable_timestamp",
            FieldIssue::NonNumericMeasure => "non_numeric_measure",
            FieldIssue::InvalidStateCode => "invalid_state_code",
            FieldIssue::InvalidQuantity => "invalid_quantity",
        }
    }
}
