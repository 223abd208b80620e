//! Structured parsing of free-form debit descriptions.
//!
//! Bank exports pack counterparty, reference and remittance details into a
//! single description string. The layouts recognized here are turned into a
//! JSON object that is stored alongside the row as its auxiliary details.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Tags that may appear in the SEPA slash layout (`/TRTP/.../IBAN/...`).
const SLASH_TAGS: &[&str] = &[
    "TRTP", "CSID", "MARF", "NAME", "REMI", "EREF", "IBAN", "BIC", "ORDP", "BENM", "ID", "ADDR",
    "RTRN", "ISDT", "CNTP", "SVCL", "PURP",
];

/// Labels that may appear in the labelled layout (`Naam: ... IBAN: ...`).
const LABELS: &[&str] = &[
    "IBAN",
    "BIC",
    "Naam",
    "Omschrijving",
    "Kenmerk",
    "Machtiging",
    "Incassant",
    "Voor",
    "ID debiteur",
    "Doorlopende incasso",
    "Eerste incasso",
];

/// Prefixes of card payment and cash withdrawal descriptions.
const CARD_PREFIXES: &[&str] = &["BEA", "GEA", "eCom", "ABN AMRO Bank N.V."];

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternatives = LABELS
            .iter()
            .map(|label| regex::escape(label))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?:^|\s)({}):\s*", alternatives)).expect("label pattern")
    })
}

/// Collapse runs of whitespace into a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a description into its structured JSON form.
pub fn parse(description: &str) -> Value {
    let trimmed = description.trim();
    let fields = if trimmed.starts_with('/') {
        parse_slash_layout(trimmed)
    } else if let Some(prefix) = CARD_PREFIXES.iter().find(|p| {
        trimmed
            .strip_prefix(**p)
            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
    }) {
        parse_card_layout(prefix, trimmed)
    } else if label_re().is_match(trimmed) {
        parse_labelled_layout(trimmed)
    } else {
        None
    };

    Value::Object(fields.unwrap_or_else(|| {
        let mut raw = Map::new();
        raw.insert("raw".into(), Value::String(collapse_whitespace(trimmed)));
        raw
    }))
}

fn parse_slash_layout(text: &str) -> Option<Map<String, Value>> {
    let mut fields = Map::new();
    let mut current: Option<(String, String)> = None;

    for token in text.split('/').skip(1) {
        if SLASH_TAGS.contains(&token) {
            if let Some((tag, value)) = current.take() {
                fields.insert(tag, slash_value(&value));
            }
            current = Some((token.to_string(), String::new()));
        } else if let Some((_, value)) = current.as_mut() {
            // A value containing a '/' was split apart; stitch it back.
            if !value.is_empty() {
                value.push('/');
            }
            value.push_str(token);
        } else {
            return None;
        }
    }

    if let Some((tag, value)) = current.take() {
        fields.insert(tag, slash_value(&value));
    }

    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn slash_value(value: &str) -> Value {
    Value::String(value.trim_end_matches('/').trim().to_string())
}

fn parse_labelled_layout(text: &str) -> Option<Map<String, Value>> {
    let mut fields = Map::new();
    let matches: Vec<_> = label_re().captures_iter(text).collect();
    let first = matches.first()?.get(0)?;

    let kind = collapse_whitespace(&text[..first.start()]);
    if !kind.is_empty() {
        fields.insert("type".into(), Value::String(kind));
    }

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |next| next.start());
        let value = collapse_whitespace(&text[whole.end()..end]);
        fields.insert(label.as_str().to_string(), Value::String(value));
    }

    Some(fields)
}

fn parse_card_layout(prefix: &str, text: &str) -> Option<Map<String, Value>> {
    let mut fields = Map::new();
    fields.insert("type".into(), Value::String(prefix.to_string()));
    fields.insert(
        "details".into(),
        Value::String(collapse_whitespace(&text[prefix.len()..])),
    );
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_slash_layout() {
        let parsed = parse("/TRTP/SEPA OVERBOEKING/IBAN/NL12RABO0123456789/BIC/RABONL2U/NAME/J. Jansen/REMI/huur 01/2024/EREF/NOTPROVIDED");
        assert_eq!(
            parsed,
            json!({
                "TRTP": "SEPA OVERBOEKING",
                "IBAN": "NL12RABO0123456789",
                "BIC": "RABONL2U",
                "NAME": "J. Jansen",
                "REMI": "huur 01/2024",
                "EREF": "NOTPROVIDED",
            })
        );
    }

    #[test]
    fn test_parse_labelled_layout() {
        let parsed = parse("SEPA Incasso algemeen doorlopend Incassant: NL00ZZZ000000000000  Naam: Energie BV  Machtiging: 12345  Omschrijving: Termijn jan   IBAN: NL99INGB0001234567");
        assert_eq!(parsed["type"], "SEPA Incasso algemeen doorlopend");
        assert_eq!(parsed["Naam"], "Energie BV");
        assert_eq!(parsed["Machtiging"], "12345");
        assert_eq!(parsed["Omschrijving"], "Termijn jan");
        assert_eq!(parsed["IBAN"], "NL99INGB0001234567");
    }

    #[test]
    fn test_parse_card_layout() {
        let parsed = parse("BEA   NR:ABC123   01.02.24/12.34 Albert Heijn 1234,PAS321");
        assert_eq!(parsed["type"], "BEA");
        assert_eq!(parsed["details"], "NR:ABC123 01.02.24/12.34 Albert Heijn 1234,PAS321");
    }

    #[test]
    fn test_unrecognized_description_is_kept_raw() {
        assert_eq!(parse("  Rente   en kosten "), json!({"raw": "Rente en kosten"}));
    }

    #[test]
    fn test_unknown_slash_tag_falls_back_to_raw() {
        assert_eq!(parse("/foo/bar"), json!({"raw": "/foo/bar"}));
    }
}
