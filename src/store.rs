//! Persistence gateway.
//!
//! Wraps one SQLite connection. Each call to [`Store::persist`] runs inside
//! its own transaction: all rows of a file are committed together or not at
//! all, and no transaction outlives the call.

use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::upsert::ParameterizedStatement;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::time::Duration;

/// An open connection to the transaction store.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open the database named by the configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = Connection::open(&config.path)?;
        Self::configure(conn, Duration::from_secs(config.busy_timeout_secs))
    }

    /// Wrap an already open connection, e.g. an in-memory database.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        Self::configure(conn, Duration::from_secs(crate::config::DEFAULT_BUSY_TIMEOUT_SECS))
    }

    fn configure(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Store { conn })
    }

    /// Borrow the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute `statement` once per row inside a single transaction.
    ///
    /// Returns the number of rows the database reported as changed; rows
    /// dropped by an ignore-duplicate policy are not counted. On any error
    /// the transaction is rolled back when it goes out of scope.
    pub fn persist(&mut self, statement: &ParameterizedStatement, rows: &[Vec<Value>]) -> Result<usize> {
        if let Some(bad) = rows.iter().find(|row| row.len() != statement.param_count) {
            return Err(Error::Database(rusqlite::Error::InvalidParameterCount(
                bad.len(),
                statement.param_count,
            )));
        }

        let tx = self.conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached(&statement.sql)?;
            for row in rows {
                changed += stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upsert::{build_upsert, ConflictPolicy, TableSchema};

    const TABLE: TableSchema = TableSchema {
        schema: None,
        table: "items",
    };

    fn store() -> Store {
        let store = Store::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        store
            .connection()
            .execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE);")
            .unwrap();
        store
    }

    fn count(store: &Store) -> i64 {
        store
            .connection()
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_persist_commits_all_rows() {
        let mut store = store();
        let statement = build_upsert(
            &TABLE,
            &["id", "name"],
            &ConflictPolicy::UpdateOnConflict { key: vec!["id"] },
        )
        .unwrap();
        let rows = vec![
            vec![Value::Integer(1), Value::Text("a".into())],
            vec![Value::Integer(2), Value::Text("b".into())],
        ];
        assert_eq!(store.persist(&statement, &rows).unwrap(), 2);
        assert_eq!(count(&store), 2);
    }

    #[test]
    fn test_failed_row_rolls_back_whole_batch() {
        let mut store = store();
        let statement = build_upsert(
            &TABLE,
            &["id", "name"],
            &ConflictPolicy::UpdateOnConflict { key: vec!["id"] },
        )
        .unwrap();
        // Second row violates the UNIQUE constraint on name, which the
        // conflict clause on id does not cover.
        let rows = vec![
            vec![Value::Integer(1), Value::Text("a".into())],
            vec![Value::Integer(2), Value::Text("a".into())],
        ];
        let err = store.persist(&statement, &rows).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(!err.is_parse_error());
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn test_row_width_mismatch_is_rejected_before_writing() {
        let mut store = store();
        let statement = build_upsert(
            &TABLE,
            &["id", "name"],
            &ConflictPolicy::UpdateOnConflict { key: vec!["id"] },
        )
        .unwrap();
        let rows = vec![vec![Value::Integer(1)]];
        assert!(store.persist(&statement, &rows).is_err());
        assert_eq!(count(&store), 0);
    }
}
