//! Persistence targets for a capture: the raw snapshot ledger and the two
//! tabular views (local workbook, shared cloud sheet).

pub mod gsheet;
pub mod ledger;
pub mod tabular;
pub mod workbook;
pub mod xlsx;

use std::path::PathBuf;

use thiserror::Error;

pub use crate::chain::CaptureBatch;
pub use gsheet::GoogleSheetBackend;
pub use ledger::{Ledger, LedgerPolicy};
pub use tabular::{TabularBackend, append_dedup};
pub use xlsx::XlsxBackend;

/// What a sink did with a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Same capture slot already recorded.
    Skipped,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("spreadsheet `{name}` not found or not shared with the service account")]
    SpreadsheetNotFound { name: String },

    #[error("worksheet `{title}` not found in spreadsheet `{spreadsheet}`")]
    WorksheetNotFound { title: String, spreadsheet: String },

    #[error("unusable credentials file {path}: {reason}")]
    Credentials { path: PathBuf, reason: String },
}
