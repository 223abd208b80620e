//! Canonical transaction schemas shared by all statement formats.

use crate::error::{Error, Result};
use crate::Format;
use chrono::NaiveDate;
use encoding_rs::WINDOWS_1252;
use rust_decimal::Decimal;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A statement file as found in a watched directory.
///
/// Created by the directory scan and consumed once by a parser. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatementFile {
    /// Location of the file on disk.
    pub path: PathBuf,

    /// Format the file was discovered as.
    pub format: Format,

    /// File contents.
    pub bytes: Vec<u8>,
}

impl RawStatementFile {
    /// Read a file from disk, tagging it with its source format.
    pub fn read(path: &Path, format: Format) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            format,
            bytes,
        })
    }

    /// Base name of the file, used as part of the credit-card natural key.
    pub fn file_name(&self) -> Result<String> {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::ParseError(format!("Unusable file name: {}", self.path.display())))
    }

    /// Contents as UTF-8, falling back to Windows-1252 for legacy bank exports.
    pub fn text(&self) -> String {
        match std::str::from_utf8(&self.bytes) {
            Ok(text) => text.to_string(),
            Err(_) => WINDOWS_1252.decode_without_bom_handling(&self.bytes).0.into_owned(),
        }
    }
}

/// A row type that maps onto one destination table.
pub trait TableRow {
    /// Column names, in binding order.
    const COLUMNS: &'static [&'static str];

    /// Values bound to `COLUMNS`, in the same order.
    fn sql_values(&self) -> Vec<Value>;
}

/// A row of the debit-transactions table.
///
/// There is no surrogate key: every column except `desc_json` is part of the
/// natural key, and exact re-submissions are dropped on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitTransaction {
    /// Account identification.
    pub account: String,

    /// Signed transaction amount. Negative for money leaving the account.
    pub tx_amount: Decimal,

    /// Currency code (e.g., EUR).
    pub currency: String,

    /// Booking date of the transaction.
    pub tx_date: NaiveDate,

    /// Format-specific details not promoted to their own column.
    pub desc_json: serde_json::Value,

    /// Human-readable description.
    pub description: String,

    /// Balance after this transaction.
    pub end_balance: Decimal,

    /// Balance before this transaction.
    pub start_balance: Decimal,

    /// Source bank tag.
    pub bank: String,
}

impl TableRow for DebitTransaction {
    const COLUMNS: &'static [&'static str] = &[
        "account",
        "tx_amount",
        "currency",
        "tx_date",
        "desc_json",
        "description",
        "end_balance",
        "start_balance",
        "bank",
    ];

    fn sql_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.account.clone()),
            decimal_value(&self.tx_amount),
            Value::Text(self.currency.clone()),
            date_value(&self.tx_date),
            Value::Text(self.desc_json.to_string()),
            Value::Text(self.description.clone()),
            decimal_value(&self.end_balance),
            decimal_value(&self.start_balance),
            Value::Text(self.bank.clone()),
        ]
    }
}

/// A row of the credit-card-transactions table.
///
/// `(statement_file_name, statement_id_in_file)` is the primary key; a
/// re-parse of the same file overwrites every other column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCardTransaction {
    /// Zero-based position of the record within its statement file.
    pub statement_id_in_file: i64,

    /// Card number as printed on the statement (usually masked).
    pub card_number: String,

    /// Base name of the statement file.
    pub statement_file_name: String,

    /// Signed amount in the card's currency. Negative for spending.
    pub tx_amount: Decimal,

    /// Merchant country code, when printed.
    pub country_code: Option<String>,

    /// Transaction date.
    pub tx_date: NaiveDate,

    /// Description lines, in statement order.
    pub descriptions: Vec<String>,

    /// Exchange rate applied to a foreign-currency transaction.
    pub exchange_rate: Option<f64>,

    /// Amount in the foreign currency.
    pub foreign_amount: Option<Decimal>,

    /// Foreign currency code.
    pub foreign_currency: Option<String>,
}

impl TableRow for CreditCardTransaction {
    const COLUMNS: &'static [&'static str] = &[
        "statement_id_in_file",
        "card_number",
        "statement_file_name",
        "tx_amount",
        "country_code",
        "tx_date",
        "descriptions",
        "exchange_rate",
        "foreign_amount",
        "foreign_currency",
    ];

    fn sql_values(&self) -> Vec<Value> {
        let descriptions = serde_json::Value::from(self.descriptions.clone()).to_string();
        vec![
            Value::Integer(self.statement_id_in_file),
            Value::Text(self.card_number.clone()),
            Value::Text(self.statement_file_name.clone()),
            decimal_value(&self.tx_amount),
            optional_text(&self.country_code),
            date_value(&self.tx_date),
            Value::Text(descriptions),
            self.exchange_rate.map_or(Value::Null, Value::Real),
            self.foreign_amount.as_ref().map_or(Value::Null, decimal_value),
            optional_text(&self.foreign_currency),
        ]
    }
}

/// Output of one parser run: rows for exactly one destination table.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedBatch {
    /// Rows for the debit-transactions table.
    Debit(Vec<DebitTransaction>),
    /// Rows for the credit-card-transactions table.
    CreditCard(Vec<CreditCardTransaction>),
}

impl NormalizedBatch {
    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        match self {
            NormalizedBatch::Debit(rows) => rows.len(),
            NormalizedBatch::CreditCard(rows) => rows.len(),
        }
    }

    /// True when the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bound values for every row, in batch order.
    pub fn sql_rows(&self) -> Vec<Vec<Value>> {
        match self {
            NormalizedBatch::Debit(rows) => rows.iter().map(TableRow::sql_values).collect(),
            NormalizedBatch::CreditCard(rows) => rows.iter().map(TableRow::sql_values).collect(),
        }
    }
}

/// Debit/Credit indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebitCredit {
    /// Debit (outgoing).
    Debit,
    /// Credit (incoming).
    Credit,
}

impl FromStr for DebitCredit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "D" | "DBIT" | "DEBIT" => Ok(DebitCredit::Debit),
            "C" | "CRDT" | "CREDIT" => Ok(DebitCredit::Credit),
            _ => Err(format!("Invalid debit/credit indicator: {}", s)),
        }
    }
}

impl DebitCredit {
    /// Apply the indicator's sign to an unsigned amount.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            DebitCredit::Debit => -amount,
            DebitCredit::Credit => amount,
        }
    }
}

/// A declared statement balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Signed balance amount.
    pub amount: Decimal,

    /// Currency code.
    pub currency: String,

    /// Date of the balance.
    pub date: NaiveDate,
}

/// Parse an amount that may use a comma decimal separator and `.` or space
/// thousands separators, e.g. `-1.234,56`.
pub fn parse_decimal_comma(raw: &str) -> Result<Decimal> {
    let mut cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.contains(',') {
        cleaned = cleaned.replace('.', "").replace(',', ".");
    }
    Decimal::from_str(&cleaned).map_err(|_| Error::InvalidAmount(raw.to_string()))
}

fn decimal_value(amount: &Decimal) -> Value {
    Value::Text(amount.to_string())
}

fn date_value(date: &NaiveDate) -> Value {
    Value::Text(date.format("%Y-%m-%d").to_string())
}

fn optional_text(value: &Option<String>) -> Value {
    value.clone().map_or(Value::Null, Value::Text)
}
