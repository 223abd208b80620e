//! Statement processors: one parser plus one upsert policy per format.

use crate::error::{Error, Result};
use crate::ics_format::IcsStatement;
use crate::mt940_format::Mt940Statement;
use crate::tab_format::TabStatement;
use crate::types::{CreditCardTransaction, DebitTransaction, NormalizedBatch, RawStatementFile, TableRow};
use crate::upsert::{
    build_upsert, ConflictPolicy, ParameterizedStatement, CREDIT_CARD_TX_TABLE, DEBIT_TX_TABLE,
};
use crate::Format;

/// Turns a statement file into rows and says how those rows are written.
pub trait StatementProcessor: Send + Sync {
    /// Format handled by this processor.
    fn format(&self) -> Format;

    /// Parse a file into normalized rows. Pure: no side effects.
    fn parse(&self, file: &RawStatementFile) -> Result<NormalizedBatch>;

    /// Statement that writes one parsed row.
    fn upsert_statement(&self) -> Result<ParameterizedStatement>;
}

/// Processor for a format.
pub fn processor_for(format: Format) -> Box<dyn StatementProcessor> {
    match format {
        Format::Tab => Box::new(TabProcessor),
        Format::Mt940 => Box::new(Mt940Processor),
        Format::IcsPdf => Box::new(IcsProcessor),
    }
}

/// Debit rows have no reliable key across re-parses, so exact duplicates
/// (ignoring the detail blob) are dropped.
fn debit_upsert() -> Result<ParameterizedStatement> {
    build_upsert(
        &DEBIT_TX_TABLE,
        DebitTransaction::COLUMNS,
        &ConflictPolicy::IgnoreDuplicate {
            exclude: vec!["desc_json"],
        },
    )
}

fn check_format(expected: Format, file: &RawStatementFile) -> Result<()> {
    if file.format != expected {
        return Err(Error::InvalidFormat(format!(
            "{} file {} handed to {} processor",
            file.format,
            file.path.display(),
            expected
        )));
    }
    Ok(())
}

/// Tab-delimited debit exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TabProcessor;

impl StatementProcessor for TabProcessor {
    fn format(&self) -> Format {
        Format::Tab
    }

    fn parse(&self, file: &RawStatementFile) -> Result<NormalizedBatch> {
        check_format(Format::Tab, file)?;
        let text = file.text();
        let statement = TabStatement::from_read(&mut text.as_bytes())?;
        Ok(NormalizedBatch::Debit(statement.transactions))
    }

    fn upsert_statement(&self) -> Result<ParameterizedStatement> {
        debit_upsert()
    }
}

/// MT940 debit statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mt940Processor;

impl StatementProcessor for Mt940Processor {
    fn format(&self) -> Format {
        Format::Mt940
    }

    fn parse(&self, file: &RawStatementFile) -> Result<NormalizedBatch> {
        check_format(Format::Mt940, file)?;
        let text = file.text();
        let mut rows = Vec::new();
        for statement in Mt940Statement::from_read(&mut text.as_bytes())? {
            rows.extend(statement.to_debit_transactions()?);
        }
        Ok(NormalizedBatch::Debit(rows))
    }

    fn upsert_statement(&self) -> Result<ParameterizedStatement> {
        debit_upsert()
    }
}

/// ICS credit-card PDF statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcsProcessor;

impl StatementProcessor for IcsProcessor {
    fn format(&self) -> Format {
        Format::IcsPdf
    }

    fn parse(&self, file: &RawStatementFile) -> Result<NormalizedBatch> {
        check_format(Format::IcsPdf, file)?;
        let statement = IcsStatement::from_bytes(&file.bytes, &file.file_name()?)?;
        Ok(NormalizedBatch::CreditCard(statement.transactions))
    }

    /// A re-processed (file, position) pair reflects the latest parse.
    fn upsert_statement(&self) -> Result<ParameterizedStatement> {
        build_upsert(
            &CREDIT_CARD_TX_TABLE,
            CreditCardTransaction::COLUMNS,
            &ConflictPolicy::UpdateOnConflict {
                key: vec!["statement_file_name", "statement_id_in_file"],
            },
        )
    }
}
