//! MT940 bank-message parser.
//!
//! MT940 is a SWIFT format for electronic account statements. bunq exports
//! one statement per account and period; this module turns each statement
//! into debit rows carrying both the balance before and after every entry,
//! and refuses statements whose entries do not add up to the declared
//! closing balance.

use crate::error::{Error, Result};
use crate::types::{Balance, DebitCredit, DebitTransaction};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::json;
use std::io::{BufRead, BufReader, Read};
use std::str::FromStr;
use std::sync::OnceLock;

/// Bank tag recorded on rows from this format.
pub const BANK_TAG: &str = "bunq";

fn statement_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(?P<value_date>\d{6})",
            r"(?P<entry_date>\d{4})?",
            r"(?P<status>RC|RD|C|D)",
            r"(?P<funds_code>[A-Z])?",
            r"(?P<amount>\d[\d,]*)",
            r"(?P<id>[NFS][A-Z0-9]{3})",
            r"(?P<customer_reference>.*?)",
            r"(?://(?P<bank_reference>.*))?$",
        ))
        .expect("statement line pattern")
    })
}

/// Status of a `:61:` statement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Credit.
    Credit,
    /// Debit.
    Debit,
    /// Reversal of a credit.
    ReversalCredit,
    /// Reversal of a debit.
    ReversalDebit,
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "C" => Ok(EntryStatus::Credit),
            "D" => Ok(EntryStatus::Debit),
            "RC" => Ok(EntryStatus::ReversalCredit),
            "RD" => Ok(EntryStatus::ReversalDebit),
            _ => Err(format!("Invalid entry status: {}", s)),
        }
    }
}

impl EntryStatus {
    /// Code as it appears in the message.
    pub fn code(&self) -> &'static str {
        match self {
            EntryStatus::Credit => "C",
            EntryStatus::Debit => "D",
            EntryStatus::ReversalCredit => "RC",
            EntryStatus::ReversalDebit => "RD",
        }
    }

    /// Apply the status' sign to an unsigned amount.
    ///
    /// Debits and reversed credits take money out of the account.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            EntryStatus::Debit | EntryStatus::ReversalCredit => -amount,
            EntryStatus::Credit | EntryStatus::ReversalDebit => amount,
        }
    }
}

/// One `:61:` statement line with its `:86:` information.
#[derive(Debug, Clone, PartialEq)]
pub struct Mt940Entry {
    /// Value date.
    pub value_date: NaiveDate,

    /// Entry (booking) date, with the year guessed from the value date.
    pub entry_date: Option<NaiveDate>,

    /// Debit/credit status.
    pub status: EntryStatus,

    /// Signed amount.
    pub amount: Decimal,

    /// Transaction type identification code (e.g., `NTRF`).
    pub id: String,

    /// Reference for the account owner.
    pub customer_reference: String,

    /// Reference of the account servicing institution.
    pub bank_reference: Option<String>,

    /// Supplementary details on the line following `:61:`.
    pub extra_details: Option<String>,

    /// Information to account owner (`:86:`).
    pub transaction_details: String,
}

/// One statement of an MT940 message.
#[derive(Debug, Clone, PartialEq)]
pub struct Mt940Statement {
    /// Transaction reference number (`:20:`).
    pub transaction_reference: String,

    /// Account identification (`:25:`).
    pub account_identification: String,

    /// Statement/sequence number (`:28C:`).
    pub statement_number: Option<String>,

    /// Opening balance (`:60F:` or `:60M:`).
    pub opening_balance: Balance,

    /// Closing balance (`:62F:` or `:62M:`).
    pub closing_balance: Balance,

    /// Entries in message order.
    pub entries: Vec<Mt940Entry>,
}

/// A tag with its content, continuation lines included.
struct Field {
    tag: String,
    line: usize,
    content: String,
    continuation: Vec<String>,
}

/// Statement under construction while fields are read.
#[derive(Default)]
struct PendingStatement {
    line: usize,
    transaction_reference: String,
    account_identification: Option<String>,
    statement_number: Option<String>,
    opening_balance: Option<Balance>,
    closing_balance: Option<Balance>,
    entries: Vec<Mt940Entry>,
}

impl PendingStatement {
    fn finish(self) -> Result<Mt940Statement> {
        let missing = |what: &str| Error::Mt940ParseError {
            line: self.line,
            message: format!("statement {} has no {}", self.transaction_reference, what),
        };
        let account_identification = self
            .account_identification
            .clone()
            .ok_or_else(|| missing("account identification :25:"))?;
        let opening_balance = self
            .opening_balance
            .clone()
            .ok_or_else(|| missing("opening balance :60:"))?;
        let closing_balance = self
            .closing_balance
            .clone()
            .ok_or_else(|| missing("closing balance :62:"))?;

        Ok(Mt940Statement {
            transaction_reference: self.transaction_reference,
            account_identification,
            statement_number: self.statement_number,
            opening_balance,
            closing_balance,
            entries: self.entries,
        })
    }
}

impl Mt940Statement {
    /// Parse every statement of an MT940 message from any source implementing `Read`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::fs::File;
    /// use statement_ingest::mt940_format::Mt940Statement;
    ///
    /// let mut file = File::open("statement.STA")?;
    /// for statement in Mt940Statement::from_read(&mut file)? {
    ///     println!("{}: {} entries", statement.account_identification, statement.entries.len());
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_read<R: Read>(reader: &mut R) -> Result<Vec<Self>> {
        let buf_reader = BufReader::new(reader);
        let mut lines: Vec<String> = Vec::new();

        for line in buf_reader.lines() {
            lines.push(line?);
        }

        Self::parse_mt940(&lines)
    }

    /// Rows for the debit table, with the running balance chained through
    /// every entry.
    ///
    /// Fails with [`Error::BalanceIntegrity`] when the last computed balance
    /// is not the declared closing balance.
    pub fn to_debit_transactions(&self) -> Result<Vec<DebitTransaction>> {
        let account = format!("{}:{}", self.account_identification, self.transaction_reference);
        let currency = &self.opening_balance.currency;
        let mut running_balance = self.opening_balance.amount;
        let mut rows = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let start_balance = running_balance;
            let end_balance = start_balance + entry.amount;

            rows.push(DebitTransaction {
                account: account.clone(),
                tx_amount: entry.amount,
                currency: currency.clone(),
                tx_date: entry.entry_date.unwrap_or(entry.value_date),
                desc_json: json!({
                    "bank": "Bunq",
                    "status": entry.status.code(),
                    "id": entry.id,
                    "customer_reference": entry.customer_reference,
                    "bank_reference": entry.bank_reference,
                    "extra_details": entry.extra_details,
                    "currency": currency,
                    "date": entry.value_date.to_string(),
                    "guessed_entry_date": entry.entry_date.map(|d| d.to_string()),
                    "transaction_reference": self.transaction_reference,
                    "statement_number": self.statement_number,
                }),
                description: entry.transaction_details.clone(),
                end_balance,
                start_balance,
                bank: BANK_TAG.to_string(),
            });

            running_balance = end_balance;
        }

        if running_balance != self.closing_balance.amount {
            return Err(Error::BalanceIntegrity {
                account,
                computed: running_balance,
                declared: self.closing_balance.amount,
            });
        }

        Ok(rows)
    }

    fn parse_mt940(lines: &[String]) -> Result<Vec<Self>> {
        let mut statements = Vec::new();
        let mut pending: Option<PendingStatement> = None;

        for field in Self::split_fields(lines) {
            let line = field.line;

            if field.tag == "20" {
                if let Some(done) = pending.take() {
                    statements.push(done.finish()?);
                }
                pending = Some(PendingStatement {
                    line,
                    transaction_reference: field.content.trim().to_string(),
                    ..PendingStatement::default()
                });
                continue;
            }

            let current = pending.as_mut().ok_or_else(|| Error::Mt940ParseError {
                line,
                message: format!(":{}: before any transaction reference :20:", field.tag),
            })?;

            match field.tag.as_str() {
                "25" => current.account_identification = Some(field.content.trim().to_string()),
                "28C" | "28" => current.statement_number = Some(field.content.trim().to_string()),
                "60F" | "60M" => current.opening_balance = Some(parse_balance(&field.content, line)?),
                "62F" | "62M" => current.closing_balance = Some(parse_balance(&field.content, line)?),
                "61" => {
                    let entry = parse_statement_line(&field, current.opening_balance.is_some())?;
                    current.entries.push(entry);
                }
                "86" => {
                    // Information belongs to the preceding :61: only.
                    if let Some(entry) = current.entries.last_mut() {
                        let mut details = vec![field.content.trim()];
                        details.extend(field.continuation.iter().map(|l| l.trim()));
                        entry.transaction_details = details
                            .into_iter()
                            .filter(|part| !part.is_empty())
                            .collect::<Vec<_>>()
                            .join(" ");
                    }
                }
                _ => {}
            }
        }

        match pending {
            Some(done) => statements.push(done.finish()?),
            None if statements.is_empty() => {
                return Err(Error::MissingField("statement reference :20:".to_string()))
            }
            None => {}
        }

        Ok(statements)
    }

    /// Group lines into tagged fields, dropping the message envelope.
    fn split_fields(lines: &[String]) -> Vec<Field> {
        let mut fields: Vec<Field> = Vec::new();

        for (index, raw) in lines.iter().enumerate() {
            let mut line = raw.trim_end();

            // Block headers such as {1:...}{2:...}{4:
            if line.starts_with('{') {
                match line.rfind("{4:") {
                    Some(pos) => line = &line[pos + 3..],
                    None => continue,
                }
            }
            // Message trailers: `-}` and a bare `-` between messages.
            if line.starts_with("-}") || line.trim() == "-" || line.trim().is_empty() {
                continue;
            }

            if let Some((tag, content)) = split_tag(line) {
                fields.push(Field {
                    tag: tag.to_string(),
                    line: index + 1,
                    content: content.to_string(),
                    continuation: Vec::new(),
                });
            } else if let Some(last) = fields.last_mut() {
                last.continuation.push(line.to_string());
            }
        }

        fields
    }
}

/// Split `:61:rest` into `("61", "rest")`.
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(':')?;
    let end = rest.find(':')?;
    let tag = &rest[..end];
    let valid = (2..=3).contains(&tag.len())
        && tag.chars().take(2).all(|c| c.is_ascii_digit())
        && tag.chars().skip(2).all(|c| c.is_ascii_uppercase());
    valid.then(|| (tag, &rest[end + 1..]))
}

fn parse_balance(content: &str, line: usize) -> Result<Balance> {
    // Format: C240101EUR1000,00
    // Position 1: D/C indicator
    // Position 2-7: Date (YYMMDD)
    // Position 8-10: Currency
    // Position 11+: Amount
    let content = content.trim();
    let invalid = |message: &str| Error::Mt940ParseError {
        line,
        message: format!("{}: {}", message, content),
    };

    if content.len() < 11 {
        return Err(invalid("balance too short"));
    }

    let dc = content
        .get(0..1)
        .and_then(|s| s.parse::<DebitCredit>().ok())
        .ok_or_else(|| invalid("invalid D/C indicator"))?;
    let date = parse_mt940_date(content.get(1..7).ok_or_else(|| invalid("invalid date"))?)?;
    let currency = content
        .get(7..10)
        .ok_or_else(|| invalid("invalid currency"))?
        .to_string();
    let amount_str = content.get(10..).ok_or_else(|| invalid("missing amount"))?;
    let amount = parse_amount(amount_str)?;

    Ok(Balance {
        amount: dc.signed(amount),
        currency,
        date,
    })
}

fn parse_statement_line(field: &Field, has_opening_balance: bool) -> Result<Mt940Entry> {
    // Format: 2401020102D12,50NTRFNONREF//B4A02ABCD
    // followed by an optional line of supplementary details.
    let invalid = |message: String| Error::Mt940ParseError {
        line: field.line,
        message,
    };

    if !has_opening_balance {
        return Err(invalid("statement line before opening balance".to_string()));
    }

    let content = field.content.trim();
    let caps = statement_line_re()
        .captures(content)
        .ok_or_else(|| invalid(format!("malformed statement line: {}", content)))?;

    let value_date = parse_mt940_date(&caps["value_date"])?;
    let entry_date = caps
        .name("entry_date")
        .map(|m| guess_entry_date(m.as_str(), value_date))
        .transpose()?;
    let status = caps["status"].parse::<EntryStatus>().map_err(invalid)?;
    let amount = status.signed(parse_amount(&caps["amount"])?);

    let extra_details = Some(field.continuation.join(" "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(Mt940Entry {
        value_date,
        entry_date,
        status,
        amount,
        id: caps["id"].to_string(),
        customer_reference: caps["customer_reference"].trim().to_string(),
        bank_reference: caps
            .name("bank_reference")
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty()),
        extra_details,
        transaction_details: String::new(),
    })
}

fn parse_amount(amount_str: &str) -> Result<Decimal> {
    let normalized = amount_str.trim().replace(',', ".");
    Decimal::from_str(&normalized).map_err(|_| Error::InvalidAmount(amount_str.to_string()))
}

/// Parse MT940 date format (YYMMDD) to NaiveDate.
fn parse_mt940_date(date_str: &str) -> Result<NaiveDate> {
    if date_str.len() != 6 {
        return Err(Error::InvalidDate(format!("Invalid MT940 date length: {}", date_str)));
    }

    let field = |range: std::ops::Range<usize>| -> Result<u32> {
        date_str
            .get(range)
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| Error::InvalidDate(date_str.to_string()))
    };
    let year = field(0..2)? as i32;
    let month = field(2..4)?;
    let day = field(4..6)?;

    // Assume 2000+ for years < 50, otherwise 1900+
    let full_year = if year < 50 { 2000 + year } else { 1900 + year };

    NaiveDate::from_ymd_opt(full_year, month, day)
        .ok_or_else(|| Error::InvalidDate(format!("{}-{}-{}", full_year, month, day)))
}

/// Parse MT940 entry date (MMDD), guessing the year from the value date.
///
/// An entry booked in December for a January value date belongs to the
/// previous year, and the other way around.
fn guess_entry_date(date_str: &str, value_date: NaiveDate) -> Result<NaiveDate> {
    let invalid = || Error::InvalidDate(date_str.to_string());
    let month = date_str
        .get(0..2)
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(invalid)?;
    let day = date_str
        .get(2..4)
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(invalid)?;

    let year = match (month, value_date.month()) {
        (12, 1) => value_date.year() - 1,
        (1, 12) => value_date.year() + 1,
        _ => value_date.year(),
    };

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| Error::InvalidDate(format!("{}-{}-{}", year, month, day)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "{1:F01BUNQNL2AXXX0000000000}{2:I940BUNQNL2AXXXXN}{4:
:20:BUNQ-2024-01
:25:NL12BUNQ0123456789 EUR
:28C:1/1
:60F:C231231EUR1000,00
:61:2401020102D12,50NTRFNONREF//B4A02ABCD
Card payment
:86:Albert Heijn 1234
Amsterdam
:61:2401030103C500,00NTRFSALARY//B4A03EFGH
:86:Werkgever BV salary january
:62F:C240103EUR1487,50
-}";

    fn parse(input: &str) -> Result<Vec<Mt940Statement>> {
        Mt940Statement::from_read(&mut input.as_bytes())
    }

    #[test]
    fn test_parse_mt940_date() {
        let date = parse_mt940_date("250218").unwrap();
        assert_eq!(date.year(), 2025);
        assert_eq!(date.month(), 2);
        assert_eq!(date.day(), 18);
    }

    #[test]
    fn test_guess_entry_date_across_year_end() {
        let value_date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(
            guess_entry_date("1231", value_date).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
        );
        let value_date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert_eq!(
            guess_entry_date("0102", value_date).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
    }

    #[test]
    fn test_entry_status_sign() {
        let amount = Decimal::new(500, 2);
        assert_eq!(EntryStatus::Debit.signed(amount), -amount);
        assert_eq!(EntryStatus::ReversalCredit.signed(amount), -amount);
        assert_eq!(EntryStatus::Credit.signed(amount), amount);
        assert_eq!(EntryStatus::ReversalDebit.signed(amount), amount);
        assert!("X".parse::<EntryStatus>().is_err());
    }

    #[test]
    fn test_parse_sample() {
        let statements = parse(SAMPLE).unwrap();
        assert_eq!(statements.len(), 1);

        let statement = &statements[0];
        assert_eq!(statement.transaction_reference, "BUNQ-2024-01");
        assert_eq!(statement.account_identification, "NL12BUNQ0123456789 EUR");
        assert_eq!(statement.statement_number.as_deref(), Some("1/1"));
        assert_eq!(statement.opening_balance.amount, Decimal::new(100000, 2));
        assert_eq!(statement.entries.len(), 2);

        let first = &statement.entries[0];
        assert_eq!(first.amount, Decimal::new(-1250, 2));
        assert_eq!(first.id, "NTRF");
        assert_eq!(first.customer_reference, "NONREF");
        assert_eq!(first.bank_reference.as_deref(), Some("B4A02ABCD"));
        assert_eq!(first.extra_details.as_deref(), Some("Card payment"));
        assert_eq!(first.transaction_details, "Albert Heijn 1234 Amsterdam");
    }

    #[test]
    fn test_running_balances_chain() {
        let statements = parse(SAMPLE).unwrap();
        let rows = statements[0].to_debit_transactions().unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].start_balance, Decimal::new(100000, 2));
        assert_eq!(rows[0].end_balance, Decimal::new(98750, 2));
        assert_eq!(rows[1].start_balance, rows[0].end_balance);
        assert_eq!(rows[1].end_balance, Decimal::new(148750, 2));

        assert_eq!(rows[0].account, "NL12BUNQ0123456789 EUR:BUNQ-2024-01");
        assert_eq!(rows[0].currency, "EUR");
        assert_eq!(rows[0].tx_date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(rows[0].bank, "bunq");
        assert_eq!(rows[0].desc_json["status"], "D");
        assert_eq!(rows[0].desc_json["bank_reference"], "B4A02ABCD");
        assert_eq!(rows[0].desc_json["date"], "2024-01-02");
    }

    #[test]
    fn test_closing_balance_mismatch_is_fatal() {
        let tampered = SAMPLE.replace(":62F:C240103EUR1487,50", ":62F:C240103EUR1487,49");
        let statements = parse(&tampered).unwrap();
        match statements[0].to_debit_transactions() {
            Err(Error::BalanceIntegrity { computed, declared, .. }) => {
                assert_eq!(computed, Decimal::new(148750, 2));
                assert_eq!(declared, Decimal::new(148749, 2));
            }
            other => panic!("expected balance integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_debit_opening_balance_is_negative() {
        let input = ":20:REF\n:25:ACC\n:60F:D240101EUR50,00\n:61:240102C50,00NTRFNONREF\n:86:top up\n:62F:C240102EUR0,00\n";
        let statements = parse(input).unwrap();
        assert_eq!(statements[0].opening_balance.amount, Decimal::new(-5000, 2));
        let rows = statements[0].to_debit_transactions().unwrap();
        assert_eq!(rows[0].end_balance, Decimal::ZERO);
        assert_eq!(rows[0].tx_date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!(rows[0].desc_json["guessed_entry_date"].is_null());
    }

    #[test]
    fn test_statement_without_entries_must_not_move_balance() {
        let still = ":20:REF\n:25:ACC\n:60F:C240101EUR10,00\n:62F:C240131EUR10,00\n";
        assert!(parse(still).unwrap()[0].to_debit_transactions().unwrap().is_empty());

        let moved = ":20:REF\n:25:ACC\n:60F:C240101EUR10,00\n:62F:C240131EUR11,00\n";
        assert!(matches!(
            parse(moved).unwrap()[0].to_debit_transactions(),
            Err(Error::BalanceIntegrity { .. })
        ));
    }

    #[test]
    fn test_message_separator_is_not_a_continuation() {
        let input = ":20:REF\n:25:ACC\n:60F:C240101EUR10,00\n:61:240102D2,50NTRFNONREF\n:86:bakery\n-\n:62F:C240102EUR7,50\n";
        let statements = parse(input).unwrap();
        assert_eq!(statements[0].entries[0].transaction_details, "bakery");
        assert_eq!(statements[0].to_debit_transactions().unwrap()[0].description, "bakery");
    }

    #[test]
    fn test_multiple_statements() {
        let input = format!(
            "{}\n:20:REF2\n:25:ACC2\n:60F:C240101EUR0,00\n:62F:C240101EUR0,00\n",
            ":20:REF1\n:25:ACC1\n:60F:C240101EUR0,00\n:62F:C240101EUR0,00"
        );
        let statements = parse(&input).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].account_identification, "ACC2");
    }

    #[test]
    fn test_missing_closing_balance_is_rejected() {
        let input = ":20:REF\n:25:ACC\n:60F:C240101EUR10,00\n";
        assert!(matches!(parse(input), Err(Error::Mt940ParseError { .. })));
    }

    #[test]
    fn test_malformed_statement_line_is_rejected() {
        let input = ":20:REF\n:25:ACC\n:60F:C240101EUR10,00\n:61:garbage\n:62F:C240101EUR10,00\n";
        match parse(input) {
            Err(Error::Mt940ParseError { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_message_is_rejected() {
        assert!(matches!(parse(""), Err(Error::MissingField(_))));
    }
}
