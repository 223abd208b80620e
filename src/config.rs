//! YAML configuration.
//!
//! ```yaml
//! database:
//!   path: /var/lib/finance/transactions.db
//! statement_services:
//!   abn_stmt_input:         { input_dir: /data/abn,  file_glob: "*.TAB" }
//!   bunq_stmt_input:        { input_dir: /data/bunq, file_glob: "*.STA" }
//!   credit_card_stmt_input: { input_dir: /data/ics,  file_glob: "Statement-*.pdf" }
//! polling:
//!   interval_secs: 60
//! ```
//!
//! Every problem found here is a [`Error::Config`] and aborts startup.

use crate::error::{Error, Result};
use crate::Format;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default bound on how long a database call waits for a lock.
pub const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 30;

/// Default delay between discovery passes.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Where rows are persisted.
    pub database: DatabaseConfig,

    /// Watched directories, one per statement source.
    pub statement_services: StatementServices,

    /// Polling loop settings.
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Location and limits of the transaction store.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// SQLite database file.
    pub path: PathBuf,

    /// Seconds a statement may wait on a locked database before failing.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

/// Input directories for the three statement sources.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatementServices {
    /// Tab-delimited debit exports.
    pub abn_stmt_input: StmtInputFileConfig,

    /// MT940 debit statements.
    pub bunq_stmt_input: StmtInputFileConfig,

    /// PDF credit-card statements.
    pub credit_card_stmt_input: StmtInputFileConfig,

    /// Create missing input directories instead of refusing to start.
    #[serde(default)]
    pub create_missing_dirs: bool,
}

/// One watched directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StmtInputFileConfig {
    /// Directory scanned on every pass.
    pub input_dir: PathBuf,

    /// Pattern file names must match, e.g. `*.TAB`.
    pub file_glob: String,
}

/// Polling loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    /// Seconds between the end of one pass and the start of the next.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

fn default_busy_timeout_secs() -> u64 {
    DEFAULT_BUSY_TIMEOUT_SECS
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Input settings for each format.
    pub fn inputs(&self) -> [(Format, &StmtInputFileConfig); 3] {
        let services = &self.statement_services;
        [
            (Format::Tab, &services.abn_stmt_input),
            (Format::Mt940, &services.bunq_stmt_input),
            (Format::IcsPdf, &services.credit_card_stmt_input),
        ]
    }

    fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(Error::Config("database.path is empty".to_string()));
        }
        if self.polling.interval_secs == 0 {
            return Err(Error::Config("polling.interval_secs must be positive".to_string()));
        }

        for (format, input) in self.inputs() {
            if input.input_dir.as_os_str().is_empty() {
                return Err(Error::Config(format!("{}: input_dir is empty", format)));
            }
            if input.file_glob.trim().is_empty() {
                return Err(Error::Config(format!("{}: file_glob is empty", format)));
            }
            glob::Pattern::new(&input.file_glob).map_err(|e| {
                Error::Config(format!("{}: invalid file_glob {:?}: {}", format, input.file_glob, e))
            })?;
        }

        Ok(())
    }
}
