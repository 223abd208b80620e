//! File discovery and the dispatch loop.
//!
//! One pass walks every binding of the registry in order, and every matching
//! file of a binding one at a time:
//!
//! ```text
//! discovered -> parsing -> persisting -> done (renamed to <name>.success)
//!                  |            |
//!                  |            +-> persist failed (rolled back, file untouched)
//!                  +-> parse failed (file untouched)
//! ```
//!
//! Untouched files are simply picked up again by the next pass. Nothing that
//! happens to a single file stops the pass.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::{ProcessorBinding, ProcessorRegistry};
use crate::store::Store;
use crate::types::RawStatementFile;
use crate::Format;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Appended to a file name once its rows are committed.
pub const SUCCESS_SUFFIX: &str = ".success";

/// Terminal state of one file within one pass.
#[derive(Debug)]
pub enum FileOutcome {
    /// Committed and renamed. `written` excludes rows dropped as duplicates.
    Done { rows: usize, written: usize },
    /// The file could not be read or parsed. Nothing was written.
    ParseFailed(Error),
    /// Parsed, but the transaction did not commit. Nothing was written.
    PersistFailed(Error),
    /// Committed, but the rename failed. The next pass re-ingests it, which
    /// the conflict policies make harmless.
    MarkFailed(Error),
}

impl FileOutcome {
    /// True when the file was committed and renamed.
    pub fn is_done(&self) -> bool {
        matches!(self, FileOutcome::Done { .. })
    }
}

/// What one pass did.
#[derive(Debug, Default)]
pub struct PassReport {
    /// Every file attempted, in processing order.
    pub files: Vec<(PathBuf, FileOutcome)>,
    /// Bindings whose directory could not be listed.
    pub unlisted: Vec<(Format, Error)>,
}

impl PassReport {
    /// Files committed and renamed.
    pub fn done(&self) -> usize {
        self.count(|outcome| outcome.is_done())
    }

    /// Files that could not be read or parsed.
    pub fn parse_failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::ParseFailed(_)))
    }

    /// Files whose transaction did not commit.
    pub fn persist_failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::PersistFailed(_)))
    }

    /// Files committed but left unrenamed.
    pub fn mark_failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, FileOutcome::MarkFailed(_)))
    }

    /// Outcome recorded for a path, if it was attempted.
    pub fn outcome(&self, path: &Path) -> Option<&FileOutcome> {
        self.files
            .iter()
            .find(|(attempted, _)| attempted == path)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|(_, outcome)| pred(outcome)).count()
    }
}

/// Regular files in the binding's directory whose name matches its glob.
///
/// Order follows the directory listing and is not meaningful.
pub fn discover(binding: &ProcessorBinding) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(&binding.input_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            log::warn!("skipping non UTF-8 file name {:?}", entry.path());
            continue;
        };
        if name.ends_with(SUCCESS_SUFFIX) || !binding.matches(name) {
            continue;
        }
        found.push(entry.path());
    }
    Ok(found)
}

/// Rename `path` to `<path>.success`.
pub fn mark_success(path: &Path) -> Result<PathBuf> {
    let mut marked = path.as_os_str().to_os_string();
    marked.push(SUCCESS_SUFFIX);
    let marked = PathBuf::from(marked);
    fs::rename(path, &marked)?;
    Ok(marked)
}

/// Parse, persist and mark one file.
pub fn process_file(binding: &ProcessorBinding, path: &Path, store: &mut Store) -> FileOutcome {
    let processor = &binding.processor;

    let batch = match RawStatementFile::read(path, binding.format)
        .and_then(|file| processor.parse(&file))
    {
        Ok(batch) => batch,
        Err(e) => return FileOutcome::ParseFailed(e),
    };
    log::debug!("{}: parsed {} rows: {:?}", path.display(), batch.len(), batch);

    let written = match processor
        .upsert_statement()
        .and_then(|statement| store.persist(&statement, &batch.sql_rows()))
    {
        Ok(written) => written,
        Err(e) => return FileOutcome::PersistFailed(e),
    };

    match mark_success(path) {
        Ok(_) => FileOutcome::Done {
            rows: batch.len(),
            written,
        },
        Err(e) => FileOutcome::MarkFailed(e),
    }
}

fn log_outcome(path: &Path, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Done { rows, written } => {
            log::info!("processed {}: {} rows ({} new or updated)", path.display(), rows, written)
        }
        FileOutcome::ParseFailed(e) => log::error!("{} {}: {}", failure_stage(e), path.display(), e),
        FileOutcome::PersistFailed(e) => log::error!("persist {}: {}", path.display(), e),
        FileOutcome::MarkFailed(e) => {
            log::error!("rows of {} committed but marking failed: {}", path.display(), e)
        }
    }
}

/// Log prefix for a file that produced no rows: `parse` for malformed
/// content, `read` when the file itself could not be opened.
fn failure_stage(err: &Error) -> &'static str {
    if err.is_parse_error() {
        "parse"
    } else {
        "read"
    }
}

/// One discovery pass over every binding.
pub fn run_pass(registry: &ProcessorRegistry, store: &mut Store) -> PassReport {
    let mut report = PassReport::default();

    for binding in registry.bindings() {
        let paths = match discover(binding) {
            Ok(paths) => paths,
            Err(e) => {
                log::error!("cannot list {} ({}): {}", binding.input_dir.display(), binding.format, e);
                report.unlisted.push((binding.format, e));
                continue;
            }
        };
        log::debug!("{}: {} candidate files in {}", binding.format, paths.len(), binding.input_dir.display());

        for path in paths {
            let outcome = process_file(binding, &path, store);
            log_outcome(&path, &outcome);
            report.files.push((path, outcome));
        }
    }

    report
}

/// How often passes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Exactly one pass, for external schedulers.
    Once,
    /// Passes forever, `interval` apart.
    Poll { interval: Duration },
}

/// Open a fresh store, run one pass, close the store.
pub fn run_single_pass(config: &Config, registry: &ProcessorRegistry) -> Result<PassReport> {
    let mut store = Store::open(&config.database)?;
    log::info!("starting pass");
    let report = run_pass(registry, &mut store);
    log::info!(
        "pass finished: {} done, {} parse failed, {} persist failed, {} mark failed",
        report.done(),
        report.parse_failed(),
        report.persist_failed(),
        report.mark_failed()
    );
    Ok(report)
}

/// Drive passes according to `mode`.
///
/// In [`RunMode::Once`] a database that cannot be opened is returned as an
/// error. In [`RunMode::Poll`] it is logged and retried after the interval,
/// and this function never returns.
pub fn run(config: &Config, registry: &ProcessorRegistry, mode: RunMode) -> Result<()> {
    match mode {
        RunMode::Once => run_single_pass(config, registry).map(|_| ()),
        RunMode::Poll { interval } => loop {
            if let Err(e) = run_single_pass(config, registry) {
                log::error!("cannot open database {}: {}", config.database.path.display(), e);
            }
            thread::sleep(interval);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use tempfile::TempDir;

    const TAB_ROW: &str =
        "123456789\tEUR\t20240105\t100,00\t75,50\t20240105\t-24,50\tBEA, Betaalpas   Albert Heijn 1234,PAS123\n";

    fn registry(root: &Path) -> ProcessorRegistry {
        let yaml = format!(
            r#"
database:
  path: {root}/db.sqlite
statement_services:
  abn_stmt_input: {{ input_dir: {root}/abn, file_glob: "*.TAB" }}
  bunq_stmt_input: {{ input_dir: {root}/bunq, file_glob: "*.STA" }}
  credit_card_stmt_input: {{ input_dir: {root}/ics, file_glob: "Statement-*.pdf" }}
  create_missing_dirs: true
"#,
            root = root.display()
        );
        ProcessorRegistry::from_config(&Config::from_yaml_str(&yaml).unwrap()).unwrap()
    }

    fn store() -> Store {
        let store = Store::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        store
            .connection()
            .execute_batch(include_str!("../sql/schema.sql"))
            .unwrap();
        store
    }

    #[test]
    fn test_discover_skips_marked_and_unmatched_files() {
        let root = TempDir::new().unwrap();
        let registry = registry(root.path());
        let abn = root.path().join("abn");
        fs::write(abn.join("a.TAB"), TAB_ROW).unwrap();
        fs::write(abn.join("b.TAB.success"), TAB_ROW).unwrap();
        fs::write(abn.join("notes.txt"), "").unwrap();
        fs::create_dir(abn.join("dir.TAB")).unwrap();

        let found = discover(registry.resolve(Format::Tab).unwrap()).unwrap();
        assert_eq!(found, vec![abn.join("a.TAB")]);
    }

    #[test]
    fn test_failure_stage_separates_content_from_io() {
        assert_eq!(failure_stage(&Error::InvalidDate("2024-13-01".into())), "parse");
        let missing = RawStatementFile::read(Path::new("/nonexistent/a.TAB"), Format::Tab).unwrap_err();
        assert_eq!(failure_stage(&missing), "read");
    }

    #[test]
    fn test_mark_success_appends_suffix() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("x.STA");
        fs::write(&path, "").unwrap();

        let marked = mark_success(&path).unwrap();
        assert_eq!(marked, root.path().join("x.STA.success"));
        assert!(!path.exists());
        assert!(marked.exists());
    }

    #[test]
    fn test_pass_reports_each_outcome() {
        let root = TempDir::new().unwrap();
        let registry = registry(root.path());
        let good = root.path().join("abn").join("good.TAB");
        let bad = root.path().join("abn").join("bad.TAB");
        fs::write(&good, TAB_ROW).unwrap();
        fs::write(&bad, "only\tthree\tfields\n").unwrap();

        let mut store = store();
        let report = run_pass(&registry, &mut store);

        assert_eq!(report.done(), 1);
        assert_eq!(report.parse_failed(), 1);
        assert!(matches!(
            report.outcome(&good),
            Some(FileOutcome::Done { rows: 1, written: 1 })
        ));
        assert!(matches!(report.outcome(&bad), Some(FileOutcome::ParseFailed(_))));
        assert!(bad.exists());
    }

    #[test]
    fn test_persist_failure_leaves_file_untouched() {
        let root = TempDir::new().unwrap();
        let registry = registry(root.path());
        let path = root.path().join("abn").join("a.TAB");
        fs::write(&path, TAB_ROW).unwrap();

        // No schema: the insert fails.
        let mut store = Store::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        let outcome = process_file(registry.resolve(Format::Tab).unwrap(), &path, &mut store);

        assert!(matches!(outcome, FileOutcome::PersistFailed(Error::Database(_))));
        assert!(path.exists());
    }

    #[test]
    fn test_missing_directory_is_reported_not_fatal() {
        let root = TempDir::new().unwrap();
        let registry = registry(root.path());
        fs::remove_dir(root.path().join("bunq")).unwrap();
        fs::write(root.path().join("abn").join("a.TAB"), TAB_ROW).unwrap();

        let report = run_pass(&registry, &mut store());
        assert_eq!(report.done(), 1);
        assert_eq!(report.unlisted.len(), 1);
        assert_eq!(report.unlisted[0].0, Format::Mt940);
    }
}
