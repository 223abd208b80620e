//! Tab-delimited debit statement parser.
//!
//! ABN AMRO exports a headerless `.TAB` file with one transaction per line:
//!
//! ```text
//! 123456789	EUR	20240102	1000,00	987,50	20240102	-12,50	BEA   NR:AB12CD  02.01.24/13.01 Bakker,PAS123
//! ```
//!
//! Fields are account, currency, transaction date, start balance, end balance,
//! value date, amount and description.

use crate::description;
use crate::error::{Error, Result};
use crate::types::{parse_decimal_comma, DebitTransaction};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use std::io::Read;

/// Bank tag recorded on rows from this format.
pub const BANK_TAG: &str = "abn";

const FIELD_COUNT: usize = 8;

/// Represents a parsed tab-delimited statement.
#[derive(Debug, Clone, PartialEq)]
pub struct TabStatement {
    /// Normalized rows, in file order.
    pub transactions: Vec<DebitTransaction>,
}

/// One line of the export, by position.
#[derive(Debug, Deserialize)]
struct TabRecord {
    account: String,
    currency: String,
    date: String,
    start_saldo: String,
    end_saldo: String,
    #[allow(dead_code)]
    value_date: String,
    amount: String,
    description: String,
}

impl TabStatement {
    /// Parse a tab-delimited statement from any source implementing `Read`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::fs::File;
    /// use statement_ingest::tab_format::TabStatement;
    ///
    /// let mut file = File::open("statement.TAB")?;
    /// let statement = TabStatement::from_read(&mut file)?;
    /// println!("{} transactions", statement.transactions.len());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut tab_reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .trim(Trim::All)
            .from_reader(reader);

        let mut transactions = Vec::new();
        let mut record = StringRecord::new();
        let mut line = 0;

        while tab_reader.read_record(&mut record)? {
            line += 1;

            // Skip empty rows
            if record.iter().all(str::is_empty) {
                continue;
            }

            if record.len() != FIELD_COUNT {
                return Err(Error::ParseError(format!(
                    "Line {} has {} fields, expected {}",
                    line,
                    record.len(),
                    FIELD_COUNT
                )));
            }

            let raw: TabRecord = record.deserialize(None)?;
            transactions.push(Self::normalize(raw)?);
        }

        Ok(TabStatement { transactions })
    }

    fn normalize(raw: TabRecord) -> Result<DebitTransaction> {
        if raw.account.is_empty() {
            return Err(Error::MissingField("account".to_string()));
        }
        if raw.currency.is_empty() {
            return Err(Error::MissingField("currency".to_string()));
        }

        let mut desc_json = description::parse(&raw.description);
        if let Some(fields) = desc_json.as_object_mut() {
            fields.insert("bank".into(), BANK_TAG.into());
        }

        Ok(DebitTransaction {
            account: raw.account,
            tx_amount: parse_decimal_comma(&raw.amount)?,
            currency: raw.currency,
            tx_date: Self::parse_date(&raw.date)?,
            desc_json,
            description: description::collapse_whitespace(&raw.description),
            end_balance: parse_decimal_comma(&raw.end_saldo)?,
            start_balance: parse_decimal_comma(&raw.start_saldo)?,
            bank: BANK_TAG.to_string(),
        })
    }

    fn parse_date(date_str: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(date_str.trim(), "%Y%m%d")
            .map_err(|_| Error::InvalidDate(date_str.to_string()))
    }
}
