//! ICS credit-card PDF statement parser.
//!
//! Text is pulled out of the PDF with `pdf-extract` and read line by line.
//! A transaction line looks like
//!
//! ```text
//! 05 feb 06 feb AMAZON.COM SEATTLE US 20,00 USD 18,45 Af
//! Wisselkoers USD 1,08401
//! ```
//!
//! with the merchant country, foreign amount and currency optional. Lines
//! without a date that follow a transaction add to its description list.

use crate::error::{Error, Result};
use crate::types::{parse_decimal_comma, CreditCardTransaction, DebitCredit};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

fn transaction_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(?P<day>\d{1,2}) (?P<month>[A-Za-z]{3})\.? ",
            r"(?P<booking_day>\d{1,2}) (?P<booking_month>[A-Za-z]{3})\.? ",
            r"(?P<description>.+?)",
            r"(?: (?P<country>[A-Z]{2}))?",
            r"(?: (?P<foreign_amount>\d{1,3}(?:\.\d{3})*,\d{2}) (?P<foreign_currency>[A-Z]{3}))?",
            r" (?P<amount>\d{1,3}(?:\.\d{3})*,\d{2}) (?P<direction>Af|Bij)$",
        ))
        .expect("transaction pattern")
    })
}

fn card_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:Creditcardnummer|Card number|Kaartnummer)\s*:?\s*(?P<card>[\d*Xx ]{4,})$")
            .expect("card number pattern")
    })
}

fn statement_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:Datum|Date|Statement date)\s*:?\s*(?P<day>\d{1,2}) (?P<month>[a-z]+)\.? (?P<year>\d{4})$")
            .expect("statement date pattern")
    })
}

fn exchange_rate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:Wisselkoers|Exchange rate)\s+(?P<currency>[A-Z]{3})\s+(?P<rate>\d+(?:[.,]\d+)?)$")
            .expect("exchange rate pattern")
    })
}

/// Lines that end a transaction's description block without being part of it.
const BLOCK_BREAKS: &[&str] = &[
    "Datum transactie",
    "Pagina",
    "Page",
    "Vorig saldo",
    "Nieuw saldo",
    "Totaal",
    "Uw betaling",
];

/// Represents a parsed ICS statement.
#[derive(Debug, Clone, PartialEq)]
pub struct IcsStatement {
    /// Normalized rows, in file order.
    pub transactions: Vec<CreditCardTransaction>,
}

/// A transaction as printed, before normalization. Optional fields are
/// empty strings when the statement leaves them blank.
#[derive(Debug, Clone, PartialEq)]
struct IcsRecord {
    card_number: String,
    date: NaiveDate,
    descriptions: Vec<String>,
    country_code: String,
    foreign_amount: String,
    foreign_currency: String,
    exchange_rate: String,
    amount: String,
    direction: DebitCredit,
}

impl IcsStatement {
    /// Parse a PDF statement held in memory.
    pub fn from_bytes(bytes: &[u8], file_name: &str) -> Result<Self> {
        // pdf-extract panics on some malformed documents.
        let text = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
            .map_err(|_| Error::PdfError("text extraction panicked".to_string()))?
            .map_err(|e| Error::PdfError(e.to_string()))?;
        Self::parse_text(&text, file_name)
    }

    /// Parse the extracted text of a statement.
    ///
    /// `file_name` is recorded on every row; together with the row's
    /// position in the file it identifies the row across re-reads.
    pub fn parse_text(text: &str, file_name: &str) -> Result<Self> {
        let records = Self::read_records(text)?;
        let transactions = records
            .into_iter()
            .enumerate()
            .map(|(ordinal, record)| Self::normalize(record, ordinal as i64, file_name))
            .collect::<Result<Vec<_>>>()?;

        Ok(IcsStatement { transactions })
    }

    fn read_records(text: &str) -> Result<Vec<IcsRecord>> {
        let mut records: Vec<IcsRecord> = Vec::new();
        let mut card_number: Option<String> = None;
        let mut statement_date: Option<NaiveDate> = None;
        let mut in_block = false;

        for raw_line in text.lines() {
            let line = raw_line.split_whitespace().collect::<Vec<_>>().join(" ");
            if line.is_empty() {
                in_block = false;
                continue;
            }

            if let Some(caps) = card_number_re().captures(&line) {
                card_number = Some(caps["card"].trim().to_string());
                in_block = false;
                continue;
            }

            if statement_date.is_none() {
                if let Some(caps) = statement_date_re().captures(&line) {
                    statement_date = Some(parse_statement_date(&caps)?);
                    in_block = false;
                    continue;
                }
            }

            if let Some(caps) = exchange_rate_re().captures(&line) {
                if let Some(last) = records.last_mut() {
                    last.exchange_rate = caps["rate"].to_string();
                }
                continue;
            }

            if let Some(caps) = transaction_re().captures(&line) {
                let statement_date = statement_date
                    .ok_or_else(|| Error::MissingField("statement date".to_string()))?;
                let card_number = card_number
                    .clone()
                    .ok_or_else(|| Error::MissingField("card number".to_string()))?;
                let direction = match &caps["direction"] {
                    "Bij" => DebitCredit::Credit,
                    _ => DebitCredit::Debit,
                };
                let text_of = |name: &str| caps.name(name).map_or(String::new(), |m| m.as_str().to_string());

                records.push(IcsRecord {
                    card_number,
                    date: infer_date(&caps["day"], &caps["month"], statement_date)?,
                    descriptions: vec![caps["description"].trim().to_string()],
                    country_code: text_of("country"),
                    foreign_amount: text_of("foreign_amount"),
                    foreign_currency: text_of("foreign_currency"),
                    exchange_rate: String::new(),
                    amount: caps["amount"].to_string(),
                    direction,
                });
                in_block = true;
                continue;
            }

            if BLOCK_BREAKS.iter().any(|prefix| line.starts_with(prefix)) {
                in_block = false;
                continue;
            }

            if in_block {
                if let Some(last) = records.last_mut() {
                    last.descriptions.push(line);
                }
            }
        }

        if records.is_empty() && card_number.is_none() {
            return Err(Error::ParseError(
                "No card number or transactions found; not an ICS statement".to_string(),
            ));
        }

        Ok(records)
    }

    fn normalize(record: IcsRecord, ordinal: i64, file_name: &str) -> Result<CreditCardTransaction> {
        let foreign_amount = non_empty(record.foreign_amount)
            .map(|amount| parse_decimal_comma(&amount))
            .transpose()?;
        let exchange_rate = non_empty(record.exchange_rate)
            .map(|rate| {
                rate.replace(',', ".")
                    .parse::<f64>()
                    .map_err(|_| Error::InvalidAmount(rate.clone()))
            })
            .transpose()?;

        Ok(CreditCardTransaction {
            statement_id_in_file: ordinal,
            card_number: record.card_number,
            statement_file_name: file_name.to_string(),
            tx_amount: record.direction.signed(parse_decimal_comma(&record.amount)?),
            country_code: non_empty(record.country_code),
            tx_date: record.date,
            descriptions: record.descriptions,
            exchange_rate,
            foreign_amount,
            foreign_currency: non_empty(record.foreign_currency),
        })
    }
}

/// Blank optional fields are absent, not empty.
fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Month number for a Dutch or English month name or abbreviation.
fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let month = match lower.get(0..3)? {
        "jan" => 1,
        "feb" => 2,
        "mrt" | "maa" | "mar" => 3,
        "apr" => 4,
        "mei" | "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "okt" | "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn parse_statement_date(caps: &regex::Captures) -> Result<NaiveDate> {
    let invalid = || Error::InvalidDate(caps[0].to_string());
    let day = caps["day"].parse::<u32>().map_err(|_| invalid())?;
    let month = month_number(&caps["month"]).ok_or_else(invalid)?;
    let year = caps["year"].parse::<i32>().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

/// Date of a `dd mon` row. Rows dated after the statement month belong to
/// the previous year (December purchases on a January statement).
fn infer_date(day: &str, month: &str, statement_date: NaiveDate) -> Result<NaiveDate> {
    let invalid = || Error::InvalidDate(format!("{} {}", day, month));
    let day = day.parse::<u32>().map_err(|_| invalid())?;
    let month = month_number(month).ok_or_else(invalid)?;
    let year = if month > statement_date.month() {
        statement_date.year() - 1
    } else {
        statement_date.year()
    };
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const SAMPLE: &str = "\
International Card Services
Datum 19 februari 2024
Creditcardnummer **** **** **** 1234

Datum transactie Datum verwerking Omschrijving Bedrag in vreemde valuta Bedrag in euro's
Vorig saldo 120,00 Af
28 dec 02 jan HOTEL LISBOA LISBOA PT 230,00 Af
Reservering 1234
05 feb 06 feb AMAZON.COM SEATTLE US 20,00 USD 18,45 Af
Wisselkoers USD 1,08401
06 feb 07 feb IDEAL BETALING, DANK U 1.150,00 Bij

Pagina 1 van 1
";

    #[test]
    fn test_parse_sample() {
        let statement = IcsStatement::parse_text(SAMPLE, "Statement-2024-02.pdf").unwrap();
        let rows = &statement.transactions;
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].statement_id_in_file, 0);
        assert_eq!(rows[0].statement_file_name, "Statement-2024-02.pdf");
        assert_eq!(rows[0].card_number, "**** **** **** 1234");
        assert_eq!(rows[0].tx_date, NaiveDate::from_ymd_opt(2023, 12, 28).unwrap());
        assert_eq!(rows[0].tx_amount, Decimal::new(-23000, 2));
        assert_eq!(rows[0].country_code.as_deref(), Some("PT"));
        assert_eq!(rows[0].descriptions, vec!["HOTEL LISBOA LISBOA", "Reservering 1234"]);

        assert_eq!(rows[1].statement_id_in_file, 1);
        assert_eq!(rows[1].tx_date, NaiveDate::from_ymd_opt(2024, 2, 5).unwrap());
        assert_eq!(rows[1].foreign_amount, Some(Decimal::new(2000, 2)));
        assert_eq!(rows[1].foreign_currency.as_deref(), Some("USD"));
        assert_eq!(rows[1].exchange_rate, Some(1.08401));
        assert_eq!(rows[1].descriptions, vec!["AMAZON.COM SEATTLE"]);

        assert_eq!(rows[2].tx_amount, Decimal::new(115000, 2));
        assert_eq!(rows[2].country_code, None);
    }

    #[test]
    fn test_blank_foreign_fields_become_absent() {
        let statement = IcsStatement::parse_text(SAMPLE, "s.pdf").unwrap();
        let domestic = &statement.transactions[0];
        assert_eq!(domestic.foreign_amount, None);
        assert_eq!(domestic.foreign_currency, None);
        assert_eq!(domestic.exchange_rate, None);
        assert_eq!(non_empty(String::new()), None);
        assert_eq!(non_empty("  ".to_string()), None);
    }

    #[test]
    fn test_ordinals_are_stable_across_reads() {
        let first = IcsStatement::parse_text(SAMPLE, "s.pdf").unwrap();
        let second = IcsStatement::parse_text(SAMPLE, "s.pdf").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_card_number_without_transactions_is_empty_statement() {
        let text = "Datum 19 februari 2024\nCreditcardnummer **** 1234\n";
        let statement = IcsStatement::parse_text(text, "s.pdf").unwrap();
        assert!(statement.transactions.is_empty());
    }

    #[test]
    fn test_unrelated_text_is_rejected() {
        let err = IcsStatement::parse_text("Hello world\n", "s.pdf").unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_transaction_before_card_number_is_rejected() {
        let text = "Datum 19 februari 2024\n05 feb 06 feb SHOP 1,00 Af\n";
        assert!(matches!(
            IcsStatement::parse_text(text, "s.pdf"),
            Err(Error::MissingField(_))
        ));
    }

    #[test]
    fn test_month_number() {
        assert_eq!(month_number("mrt"), Some(3));
        assert_eq!(month_number("Maart"), Some(3));
        assert_eq!(month_number("oct"), Some(10));
        assert_eq!(month_number("xx"), None);
    }
}
