//! Statement processor - watches input directories and ingests statement files.

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::time::Duration;
use statement_ingest::{
    config::Config,
    dispatch::{self, RunMode},
    registry::ProcessorRegistry,
    Error, Result,
};

#[derive(Parser)]
#[command(name = "statement_processor")]
#[command(about = "Ingest ABN TAB, bunq MT940 and ICS PDF statements into the transaction store", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(long = "config-file")]
    config_file: PathBuf,

    /// Run a single discovery pass and exit
    #[arg(long)]
    once: bool,

    /// Seconds between passes (overrides polling.interval_secs)
    #[arg(long)]
    interval: Option<u64>,

    /// Log level (off, error, warn, info, debug, trace); RUST_LOG overrides
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let level: LevelFilter = cli
        .log_level
        .parse()
        .map_err(|_| Error::Config(format!("unknown log level {:?}", cli.log_level)))?;
    SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
        .map_err(|e| Error::Config(format!("cannot install logger: {}", e)))?;

    let config = Config::from_path(&cli.config_file)?;
    let registry = ProcessorRegistry::from_config(&config)?;
    log::debug!("Loaded {} bindings from {}", registry.bindings().len(), cli.config_file.display());

    let mode = if cli.once {
        RunMode::Once
    } else {
        let secs = cli.interval.unwrap_or(config.polling.interval_secs);
        if secs == 0 {
            return Err(Error::Config("--interval must be positive".to_string()));
        }
        RunMode::Poll {
            interval: Duration::from_secs(secs),
        }
    };

    dispatch::run(&config, &registry, mode)
}
