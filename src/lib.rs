//! Statement Ingest Library
//!
//! Ingests bank and credit-card statement files from watched directories,
//! normalizes them into a common transaction schema, and idempotently
//! persists the rows into a relational store.
//!
//! # Supported Formats
//!
//! - **TAB**: tab-delimited ABN AMRO debit exports
//! - **MT940**: SWIFT bank statements (bunq debit accounts)
//! - **ICS PDF**: International Card Services credit-card statements
//!
//! # Pipeline
//!
//! A pass lists each watched directory, parses every matching file with the
//! processor registered for it, writes the rows in one transaction per file,
//! and renames the file with a `.success` suffix once the transaction has
//! committed. A file that fails to parse or persist is left in place.
//!
//! # Examples
//!
//! ## Parsing an MT940 file
//!
//! ```no_run
//! use std::fs::File;
//! use statement_ingest::mt940_format::Mt940Statement;
//!
//! let mut file = File::open("statement.STA")?;
//! for statement in Mt940Statement::from_read(&mut file)? {
//!     let rows = statement.to_debit_transactions()?;
//!     println!("{}: {} rows", statement.account_identification, rows.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Running one discovery pass
//!
//! ```no_run
//! use std::path::Path;
//! use statement_ingest::{config::Config, dispatch, registry::ProcessorRegistry, store::Store};
//!
//! let config = Config::from_path(Path::new("config.yaml"))?;
//! let registry = ProcessorRegistry::from_config(&config)?;
//! let mut store = Store::open(&config.database)?;
//! let report = dispatch::run_pass(&registry, &mut store);
//! println!("{} files done", report.done());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod types;
pub mod description;
pub mod tab_format;
pub mod mt940_format;
pub mod ics_format;
pub mod upsert;
pub mod processor;
pub mod registry;
pub mod config;
pub mod store;
pub mod dispatch;

use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::{CreditCardTransaction, DebitTransaction, NormalizedBatch, RawStatementFile};

/// Supported statement formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Tab-delimited debit export
    Tab,
    /// MT940 SWIFT debit statement
    Mt940,
    /// ICS credit-card PDF statement
    IcsPdf,
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tab" | "abn" => Ok(Format::Tab),
            "mt940" | "mt-940" | "bunq" => Ok(Format::Mt940),
            "ics" | "pdf" | "credit_card" => Ok(Format::IcsPdf),
            _ => Err(Error::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Tab => "tab",
            Format::Mt940 => "mt940",
            Format::IcsPdf => "ics",
        };
        f.write_str(name)
    }
}
