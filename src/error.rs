//! Error types for the statement ingestion library.

use rust_decimal::Decimal;
use std::io;
use thiserror::Error;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while configuring, parsing, or persisting statements.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error occurred during read or write operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error reading a tab-delimited export.
    #[error("TAB parsing error: {0}")]
    CsvError(#[from] csv::Error),

    /// Error extracting text from a PDF statement.
    #[error("PDF extraction error: {0}")]
    PdfError(String),

    /// Error parsing MT940 format.
    #[error("MT940 parsing error at line {line}: {message}")]
    Mt940ParseError { line: usize, message: String },

    /// Invalid date format.
    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    /// Invalid amount format.
    #[error("Invalid amount format: {0}")]
    InvalidAmount(String),

    /// Missing required field.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// General parsing error.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The running balance of a bank message does not end on its declared closing balance.
    #[error("Balance integrity error for {account}: computed closing balance {computed}, declared {declared}")]
    BalanceIntegrity {
        account: String,
        computed: Decimal,
        declared: Decimal,
    },

    /// Statement execution, constraint violation, or connection failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A table or column name that cannot be quoted safely.
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Invalid format specified.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl Error {
    /// True for errors raised while turning a file into rows, as opposed to
    /// persisting them. I/O errors are not included: a file that cannot be
    /// read says nothing about its content.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Error::CsvError(_)
                | Error::PdfError(_)
                | Error::Mt940ParseError { .. }
                | Error::InvalidDate(_)
                | Error::InvalidAmount(_)
                | Error::MissingField(_)
                | Error::ParseError(_)
                | Error::BalanceIntegrity { .. }
        )
    }
}
