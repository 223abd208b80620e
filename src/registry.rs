//! Processor registry: format tag to parser, upsert policy, directory and glob.
//!
//! Built once from validated configuration and read-only afterwards.

use crate::config::{Config, StmtInputFileConfig};
use crate::error::{Error, Result};
use crate::processor::{processor_for, StatementProcessor};
use crate::Format;
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};

/// One watched source.
pub struct ProcessorBinding {
    /// Format tag of the source.
    pub format: Format,
    /// Parser and upsert policy for the format.
    pub processor: Box<dyn StatementProcessor>,
    /// Directory scanned on every pass.
    pub input_dir: PathBuf,
    /// Pattern file names must match.
    pub pattern: Pattern,
}

impl ProcessorBinding {
    fn new(format: Format, input: &StmtInputFileConfig, create_missing: bool) -> Result<Self> {
        ensure_directory(&input.input_dir, create_missing)?;
        let pattern = Pattern::new(&input.file_glob).map_err(|e| {
            Error::Config(format!("{}: invalid file_glob {:?}: {}", format, input.file_glob, e))
        })?;

        Ok(ProcessorBinding {
            format,
            processor: processor_for(format),
            input_dir: input.input_dir.clone(),
            pattern,
        })
    }

    /// True when a bare file name is picked up by this binding.
    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern.matches(file_name)
    }
}

impl std::fmt::Debug for ProcessorBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorBinding")
            .field("format", &self.format)
            .field("input_dir", &self.input_dir)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

fn ensure_directory(dir: &Path, create_missing: bool) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {
            fs::read_dir(dir).map_err(|e| {
                Error::Config(format!("input directory {} is unreadable: {}", dir.display(), e))
            })?;
            Ok(())
        }
        Ok(_) => Err(Error::Config(format!(
            "input path {} is not a directory",
            dir.display()
        ))),
        Err(_) if create_missing => {
            log::info!("creating missing input directory {}", dir.display());
            fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("cannot create input directory {}: {}", dir.display(), e))
            })
        }
        Err(e) => Err(Error::Config(format!(
            "input directory {} is missing: {}",
            dir.display(),
            e
        ))),
    }
}

/// All bindings, in configuration order.
#[derive(Debug)]
pub struct ProcessorRegistry {
    bindings: Vec<ProcessorBinding>,
}

impl ProcessorRegistry {
    /// Build the registry, checking every input directory up front.
    ///
    /// Missing directories are a [`Error::Config`] unless
    /// `statement_services.create_missing_dirs` is set, in which case they
    /// are created.
    pub fn from_config(config: &Config) -> Result<Self> {
        let create_missing = config.statement_services.create_missing_dirs;
        let bindings = config
            .inputs()
            .into_iter()
            .map(|(format, input)| ProcessorBinding::new(format, input, create_missing))
            .collect::<Result<Vec<_>>>()?;

        Ok(ProcessorRegistry { bindings })
    }

    /// Binding for a format tag.
    pub fn resolve(&self, format: Format) -> Option<&ProcessorBinding> {
        self.bindings.iter().find(|binding| binding.format == format)
    }

    /// Every binding, in configuration order.
    pub fn bindings(&self) -> &[ProcessorBinding] {
        &self.bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(root: &Path, create_missing: bool) -> Config {
        let yaml = format!(
            r#"
database:
  path: {root}/db.sqlite
statement_services:
  abn_stmt_input: {{ input_dir: {root}/abn, file_glob: "*.TAB" }}
  bunq_stmt_input: {{ input_dir: {root}/bunq, file_glob: "*.STA" }}
  credit_card_stmt_input: {{ input_dir: {root}/ics, file_glob: "Statement-*.pdf" }}
  create_missing_dirs: {create_missing}
"#,
            root = root.display(),
            create_missing = create_missing
        );
        Config::from_yaml_str(&yaml).unwrap()
    }

    #[test]
    fn test_strict_registry_rejects_missing_directory() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("abn")).unwrap();
        fs::create_dir(root.path().join("bunq")).unwrap();

        let err = ProcessorRegistry::from_config(&config(root.path(), false)).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("ics")));
    }

    #[test]
    fn test_lenient_registry_creates_directories() {
        let root = TempDir::new().unwrap();
        let registry = ProcessorRegistry::from_config(&config(root.path(), true)).unwrap();

        assert_eq!(registry.bindings().len(), 3);
        for name in ["abn", "bunq", "ics"] {
            assert!(root.path().join(name).is_dir());
        }
    }

    #[test]
    fn test_file_in_place_of_directory_is_rejected() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("abn"), b"").unwrap();
        let err = ProcessorRegistry::from_config(&config(root.path(), true)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_resolve_by_format() {
        let root = TempDir::new().unwrap();
        let registry = ProcessorRegistry::from_config(&config(root.path(), true)).unwrap();

        let bunq = registry.resolve(Format::Mt940).unwrap();
        assert_eq!(bunq.input_dir, root.path().join("bunq"));
        assert_eq!(bunq.processor.format(), Format::Mt940);
        assert!(bunq.matches("2024-01.STA"));
        assert!(!bunq.matches("2024-01.STA.success"));

        let ics = registry.resolve(Format::IcsPdf).unwrap();
        assert!(ics.matches("Statement-2024-01.pdf"));
        assert!(!ics.matches("invoice.pdf"));
    }
}
