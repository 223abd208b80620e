//! Parameterized upsert statements with per-table conflict policies.
//!
//! Identifiers are always quoted; values are always bound as `?N`
//! parameters and never spliced into the SQL text.

use crate::error::{Error, Result};

/// A destination table, optionally qualified by its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    /// Schema (or attached database) name.
    pub schema: Option<&'static str>,
    /// Table name.
    pub table: &'static str,
}

/// Debit-transactions table.
pub const DEBIT_TX_TABLE: TableSchema = TableSchema {
    schema: None,
    table: "debit_transactions",
};

/// Credit-card-transactions table.
pub const CREDIT_CARD_TX_TABLE: TableSchema = TableSchema {
    schema: None,
    table: "credit_card_transactions",
};

/// What to do when an inserted row collides with an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Drop the new row when every column except `exclude` matches an
    /// existing row.
    IgnoreDuplicate { exclude: Vec<&'static str> },
    /// Overwrite every non-key column of the row sharing `key`.
    UpdateOnConflict { key: Vec<&'static str> },
}

/// SQL text plus the number of parameters it expects per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterizedStatement {
    /// Statement text with `?1..?N` placeholders.
    pub sql: String,
    /// Number of bound parameters per execution.
    pub param_count: usize,
}

/// Quote an identifier for SQL, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(Error::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

fn quote_list(names: &[&str]) -> Result<String> {
    Ok(names
        .iter()
        .map(|name| quote_identifier(name))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

impl TableSchema {
    /// Quoted, optionally schema-qualified table name.
    pub fn qualified_name(&self) -> Result<String> {
        let table = quote_identifier(self.table)?;
        match self.schema {
            Some(schema) => Ok(format!("{}.{}", quote_identifier(schema)?, table)),
            None => Ok(table),
        }
    }
}

/// Build an `INSERT ... ON CONFLICT` statement for `columns` of `table`.
///
/// # Examples
///
/// ```
/// use statement_ingest::upsert::{build_upsert, ConflictPolicy, TableSchema};
///
/// let table = TableSchema { schema: None, table: "cards" };
/// let policy = ConflictPolicy::UpdateOnConflict { key: vec!["id"] };
/// let statement = build_upsert(&table, &["id", "amount"], &policy)?;
/// assert_eq!(
///     statement.sql,
///     r#"INSERT INTO "cards" ("id", "amount") VALUES (?1, ?2) ON CONFLICT ("id") DO UPDATE SET "amount" = excluded."amount""#
/// );
/// # Ok::<(), statement_ingest::Error>(())
/// ```
pub fn build_upsert(
    table: &TableSchema,
    columns: &[&str],
    policy: &ConflictPolicy,
) -> Result<ParameterizedStatement> {
    if columns.is_empty() {
        return Err(Error::InvalidIdentifier("empty column list".to_string()));
    }

    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");

    let conflict_clause = match policy {
        ConflictPolicy::IgnoreDuplicate { exclude } => {
            let target: Vec<&str> = columns
                .iter()
                .copied()
                .filter(|column| !exclude.iter().any(|excluded| excluded == column))
                .collect();
            if target.is_empty() {
                return Err(Error::InvalidIdentifier(
                    "conflict target excludes every column".to_string(),
                ));
            }
            format!("ON CONFLICT ({}) DO NOTHING", quote_list(&target)?)
        }
        ConflictPolicy::UpdateOnConflict { key } => {
            if key.is_empty() {
                return Err(Error::InvalidIdentifier("empty conflict key".to_string()));
            }
            if let Some(missing) = key.iter().find(|k| !columns.iter().any(|column| column == *k)) {
                return Err(Error::InvalidIdentifier(format!(
                    "conflict key {} is not an inserted column",
                    missing
                )));
            }
            let assignments = columns
                .iter()
                .filter(|column| !key.iter().any(|k| k == *column))
                .map(|column| {
                    let quoted = quote_identifier(column)?;
                    Ok(format!("{} = excluded.{}", quoted, quoted))
                })
                .collect::<Result<Vec<_>>>()?;
            if assignments.is_empty() {
                format!("ON CONFLICT ({}) DO NOTHING", quote_list(key)?)
            } else {
                format!(
                    "ON CONFLICT ({}) DO UPDATE SET {}",
                    quote_list(key)?,
                    assignments.join(", ")
                )
            }
        }
    };

    Ok(ParameterizedStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({}) {}",
            table.qualified_name()?,
            quote_list(columns)?,
            placeholders,
            conflict_clause
        ),
        param_count: columns.len(),
    })
}
