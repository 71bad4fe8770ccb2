//! Storage connection and cursor traits.
//!
//! The ORM treats storage as an opaque collaborator:
//!
//! - [`Connection`] - column/value DML, structured selects, quoting and the
//!   event dispatcher shared with the rest of the framework
//! - [`Statement`] - a forward-only cursor over result rows
//!
//! All calls are synchronous round-trips. Errors raised by an implementation
//! are propagated unchanged; no retry or rollback happens above this layer.

use std::collections::VecDeque;

use crate::error::Result;
use crate::event::EventDispatcher;
use crate::identifiers::{quote_ident, quote_literal};
use crate::query::Select;
use crate::row::Row;
use crate::value::Value;

/// Column → value pairs for INSERT and UPDATE, in column order.
pub type Values = Vec<(String, Value)>;

/// A forward-only cursor over result rows.
pub trait Statement {
    /// Fetch the next row, or `None` once the cursor is exhausted.
    fn fetch(&mut self) -> Result<Option<Row>>;
}

/// A [`Statement`] over rows that are already in memory.
#[derive(Debug, Default)]
pub struct RowCursor {
    rows: VecDeque<Row>,
}

impl RowCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: rows.into() }
    }

    /// Rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl From<Vec<Row>> for RowCursor {
    fn from(rows: Vec<Row>) -> Self {
        Self::new(rows)
    }
}

impl Statement for RowCursor {
    fn fetch(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}

/// A storage connection.
///
/// Implementations must be `Send + Sync`; one connection is typically shared
/// by every entity manager created for the work units it serves.
pub trait Connection: Send + Sync {
    /// Insert one row.
    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<()>;

    /// Update the row(s) whose `key.0` column equals `key.1`.
    /// Returns the number of rows affected.
    fn update(&self, table: &str, values: &[(String, Value)], key: (&str, &Value)) -> Result<u64>;

    /// Delete the row(s) whose `key.0` column equals `key.1`.
    /// Returns the number of rows affected.
    fn delete(&self, table: &str, key: (&str, &Value)) -> Result<u64>;

    /// Run a select and return a cursor over its rows.
    fn query(&self, select: &Select) -> Result<Box<dyn Statement + '_>>;

    /// Run a select and return the first column of the first row.
    fn fetch_column(&self, select: &Select) -> Result<Option<Value>> {
        let mut statement = self.query(select)?;
        Ok(statement.fetch()?.and_then(|row| row.get(0).cloned()))
    }

    /// Render a value as an escaped literal for this backend.
    fn quote(&self, value: &Value) -> String {
        quote_literal(value)
    }

    /// Quote a table or column name for this backend.
    fn quote_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    /// Identifier generated by the most recent insert.
    fn last_insert_id(&self) -> Result<Value>;

    /// The dispatcher that lifecycle events are broadcast through.
    fn events(&self) -> &dyn EventDispatcher;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_cursor_drains_in_order() {
        let mut cursor = RowCursor::new(vec![
            Row::from_pairs([("id", Value::Int(1))]),
            Row::from_pairs([("id", Value::Int(2))]),
        ]);
        assert_eq!(cursor.remaining(), 2);

        let first = cursor.fetch().unwrap().unwrap();
        assert_eq!(first.get_by_name("id"), Some(&Value::Int(1)));
        let second = cursor.fetch().unwrap().unwrap();
        assert_eq!(second.get_by_name("id"), Some(&Value::Int(2)));
        assert!(cursor.fetch().unwrap().is_none());
        assert!(cursor.fetch().unwrap().is_none());
    }
}
