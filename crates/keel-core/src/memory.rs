//! In-memory [`Connection`] implementation.
//!
//! `MemoryConnection` evaluates [`Select`] trees directly against tables held
//! in a mutex. It backs the test suites of every Keel crate and is handy for
//! prototyping mappings without a database. Every statement is recorded so
//! callers can assert on how many round-trips an operation took.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::{Connection, RowCursor, Statement};
use crate::error::{Error, QueryError, QueryErrorKind, Result};
use crate::event::{Dispatcher, EventDispatcher};
use crate::query::{ColumnRef, Condition, OrderDirection, Projection, Select};
use crate::row::{ColumnInfo, Row};
use crate::value::Value;

/// One recorded storage call.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        table: String,
        values: Vec<(String, Value)>,
    },
    Update {
        table: String,
        values: Vec<(String, Value)>,
        key: (String, Value),
    },
    Delete {
        table: String,
        key: (String, Value),
    },
    /// A select, rendered to SQL.
    Query(String),
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<HashMap<String, Value>>,
    auto_increment: Option<String>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Table>,
    last_insert_id: Option<Value>,
    log: Vec<Operation>,
    query_calls: usize,
    fail_next: Option<String>,
}

/// A connection over in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    state: Mutex<MemoryState>,
    events: Arc<Dispatcher>,
}

fn query_error(kind: QueryErrorKind, message: impl Into<String>) -> Error {
    Error::Query(QueryError {
        kind,
        sql: None,
        message: message.into(),
        source: None,
    })
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connection that broadcasts through an existing dispatcher.
    pub fn with_dispatcher(events: Arc<Dispatcher>) -> Self {
        Self {
            state: Mutex::default(),
            events,
        }
    }

    /// The concrete dispatcher, for registering listeners.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.events
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or replace) a table.
    ///
    /// When `auto_increment` names a column, inserts that leave it empty get
    /// the next sequence value.
    pub fn create_table(&self, name: &str, columns: &[&str], auto_increment: Option<&str>) {
        let table = Table {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows: Vec::new(),
            auto_increment: auto_increment.map(str::to_string),
            next_id: 1,
        };
        self.lock().tables.insert(name.to_string(), table);
    }

    /// Insert a row without recording it or touching `last_insert_id`.
    pub fn seed<K: Into<String>>(
        &self,
        table: &str,
        values: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<()> {
        let values: Vec<(String, Value)> = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let mut state = self.lock();
        insert_row(&mut state, table, &values).map(|_| ())
    }

    /// Every row of `table`, in insertion order, as rows with the table's columns.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.lock();
        let Some(table) = state.tables.get(table) else {
            return Vec::new();
        };
        let info = Arc::new(ColumnInfo::new(table.columns.clone()));
        table
            .rows
            .iter()
            .map(|row| {
                let values = table
                    .columns
                    .iter()
                    .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
                    .collect();
                Row::with_columns(Arc::clone(&info), values)
            })
            .collect()
    }

    /// Recorded operations since the last [`clear_log`](Self::clear_log).
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().log.clone()
    }

    /// SQL of every recorded select.
    pub fn queries(&self) -> Vec<String> {
        self.lock()
            .log
            .iter()
            .filter_map(|op| match op {
                Operation::Query(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of selects executed since the last clear.
    pub fn query_calls(&self) -> usize {
        self.lock().query_calls
    }

    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.log.clear();
        state.query_calls = 0;
    }

    /// Make the next storage call fail with a database error.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().fail_next = Some(message.into());
    }

    fn check_failure(state: &mut MemoryState) -> Result<()> {
        match state.fail_next.take() {
            Some(message) => Err(query_error(QueryErrorKind::Database, message)),
            None => Ok(()),
        }
    }
}

fn insert_row(state: &mut MemoryState, table: &str, values: &[(String, Value)]) -> Result<Value> {
    let target = state
        .tables
        .get_mut(table)
        .ok_or_else(|| query_error(QueryErrorKind::NotFound, format!("no such table: {}", table)))?;

    let mut row: HashMap<String, Value> = target
        .columns
        .iter()
        .map(|c| (c.clone(), Value::Null))
        .collect();
    for (column, value) in values {
        if !target.columns.contains(column) {
            return Err(query_error(
                QueryErrorKind::NotFound,
                format!("table {} has no column named {}", table, column),
            ));
        }
        row.insert(column.clone(), value.clone());
    }

    let mut inserted = Value::Null;
    if let Some(auto) = target.auto_increment.clone() {
        let given = row.get(&auto).filter(|v| !v.is_empty()).cloned();
        inserted = match given {
            Some(value) => {
                if let Some(id) = value.as_i64() {
                    target.next_id = target.next_id.max(id + 1);
                }
                value
            }
            None => {
                let id = Value::BigInt(target.next_id);
                target.next_id += 1;
                row.insert(auto.clone(), id.clone());
                id
            }
        };

        let exists = target
            .rows
            .iter()
            .any(|r| r.get(&auto).is_some_and(|v| v.loose_eq(&inserted)));
        if exists {
            return Err(query_error(
                QueryErrorKind::Constraint,
                format!("UNIQUE constraint failed: {}.{}", table, auto),
            ));
        }
    }

    target.rows.push(row);
    Ok(inserted)
}

fn key_matches(row: &HashMap<String, Value>, key: &(&str, &Value)) -> bool {
    row.get(key.0)
        .is_some_and(|v| !v.is_null() && v.loose_eq(key.1))
}

/// A candidate result row: one source row per table in scope.
type Scope<'a> = Vec<(&'a str, &'a HashMap<String, Value>)>;

fn resolve(scope: &Scope<'_>, column: &ColumnRef) -> Result<Value> {
    let found = scope.iter().find_map(|(table, row)| match &column.table {
        Some(wanted) if wanted != table => None,
        _ => row.get(&column.name),
    });
    match found {
        Some(value) => Ok(value.clone()),
        None if column.table.is_some() || scope.is_empty() => Err(query_error(
            QueryErrorKind::NotFound,
            format!("no such column: {}", column),
        )),
        // Columns absent from a row in scope read as NULL.
        None => Ok(Value::Null),
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

fn satisfies(scope: &Scope<'_>, condition: &Condition) -> Result<bool> {
    Ok(match condition {
        Condition::Eq(column, expected) => {
            let value = resolve(scope, column)?;
            !value.is_null() && value.loose_eq(expected)
        }
        Condition::In(column, values) => {
            let value = resolve(scope, column)?;
            !value.is_null() && values.iter().any(|v| value.loose_eq(v))
        }
        Condition::IsNull(column) => resolve(scope, column)?.is_null(),
    })
}

fn evaluate(state: &MemoryState, select: &Select) -> Result<Vec<Row>> {
    let table_of = |name: &str| {
        state
            .tables
            .get(name)
            .ok_or_else(|| query_error(QueryErrorKind::NotFound, format!("no such table: {}", name)))
    };

    let base = table_of(select.table())?;
    let mut scopes: Vec<Scope<'_>> = base
        .rows
        .iter()
        .map(|row| vec![(select.table(), row)])
        .collect();

    for join in select.joins() {
        let joined = table_of(&join.table)?;
        let mut next = Vec::new();
        for scope in &scopes {
            for row in &joined.rows {
                let mut candidate = scope.clone();
                candidate.push((join.table.as_str(), row));
                let left = resolve(&candidate, &join.left)?;
                let right = resolve(&candidate, &join.right)?;
                if !left.is_null() && left.loose_eq(&right) {
                    next.push(candidate);
                }
            }
        }
        scopes = next;
    }

    let mut filtered = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let mut keep = true;
        for condition in select.conditions() {
            if !satisfies(&scope, condition)? {
                keep = false;
                break;
            }
        }
        if keep {
            filtered.push(scope);
        }
    }

    if !select.orderings().is_empty() {
        let mut keyed = Vec::with_capacity(filtered.len());
        for scope in filtered {
            let mut keys = Vec::with_capacity(select.orderings().len());
            for order in select.orderings() {
                keys.push(resolve(&scope, &order.column)?);
            }
            keyed.push((keys, scope));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), order) in a.iter().zip(b).zip(select.orderings()) {
                let ord = match order.direction {
                    OrderDirection::Asc => compare(x, y),
                    OrderDirection::Desc => compare(y, x),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        filtered = keyed.into_iter().map(|(_, scope)| scope).collect();
    }

    let offset = usize::try_from(select.offset_value().unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = select
        .limit_value()
        .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

    let default_projection = [Projection::All(select.table().to_string())];
    let projections = if select.projections().is_empty() {
        &default_projection[..]
    } else {
        select.projections()
    };

    // An aggregate collapses the filtered set into a single row.
    let aggregate = projections.iter().any(|p| matches!(p, Projection::Count));
    let total = filtered.len();
    if aggregate {
        filtered.truncate(1);
    }

    let mut names = Vec::new();
    for projection in projections {
        match projection {
            Projection::All(table) => names.extend(table_of(table)?.columns.iter().cloned()),
            Projection::Column { column, alias } => {
                names.push(alias.clone().unwrap_or_else(|| column.name.clone()));
            }
            Projection::Literal(value) => names.push(value.to_string()),
            Projection::Count => names.push("COUNT(*)".to_string()),
        }
    }
    let info = Arc::new(ColumnInfo::new(names));

    if aggregate {
        let scope = filtered.pop().unwrap_or_default();
        let mut values = Vec::with_capacity(info.len());
        for projection in projections {
            values.push(match projection {
                Projection::Count => Value::BigInt(i64::try_from(total).unwrap_or(i64::MAX)),
                Projection::Literal(value) => value.clone(),
                Projection::Column { column, .. } if !scope.is_empty() => resolve(&scope, column)?,
                _ => Value::Null,
            });
        }
        let rows = if offset == 0 && limit > 0 {
            vec![Row::with_columns(info, values)]
        } else {
            Vec::new()
        };
        return Ok(rows);
    }

    let mut rows = Vec::new();
    for scope in filtered.into_iter().skip(offset).take(limit) {
        let mut values = Vec::with_capacity(info.len());
        for projection in projections {
            match projection {
                Projection::All(table) => {
                    let columns = &table_of(table)?.columns;
                    let source = scope.iter().find(|(name, _)| name == table).map(|(_, row)| *row);
                    for column in columns {
                        values.push(
                            source
                                .and_then(|row| row.get(column).cloned())
                                .unwrap_or(Value::Null),
                        );
                    }
                }
                Projection::Column { column, .. } => values.push(resolve(&scope, column)?),
                Projection::Literal(value) => values.push(value.clone()),
                Projection::Count => {}
            }
        }
        rows.push(Row::with_columns(Arc::clone(&info), values));
    }

    Ok(rows)
}

impl Connection for MemoryConnection {
    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<()> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        state.log.push(Operation::Insert {
            table: table.to_string(),
            values: values.to_vec(),
        });
        let id = insert_row(&mut state, table, values)?;
        tracing::trace!(table, id = %id, "memory insert");
        state.last_insert_id = Some(id);
        Ok(())
    }

    fn update(&self, table: &str, values: &[(String, Value)], key: (&str, &Value)) -> Result<u64> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        state.log.push(Operation::Update {
            table: table.to_string(),
            values: values.to_vec(),
            key: (key.0.to_string(), key.1.clone()),
        });

        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| query_error(QueryErrorKind::NotFound, format!("no such table: {}", table)))?;
        if let Some((column, _)) = values.iter().find(|(c, _)| !target.columns.contains(c)) {
            return Err(query_error(
                QueryErrorKind::NotFound,
                format!("table {} has no column named {}", table, column),
            ));
        }

        let mut affected = 0;
        for row in target.rows.iter_mut().filter(|r| key_matches(r, &key)) {
            for (column, value) in values {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    fn delete(&self, table: &str, key: (&str, &Value)) -> Result<u64> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        state.log.push(Operation::Delete {
            table: table.to_string(),
            key: (key.0.to_string(), key.1.clone()),
        });

        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| query_error(QueryErrorKind::NotFound, format!("no such table: {}", table)))?;
        let before = target.rows.len();
        target.rows.retain(|r| !key_matches(r, &key));
        Ok((before - target.rows.len()) as u64)
    }

    fn query(&self, select: &Select) -> Result<Box<dyn Statement + '_>> {
        let mut state = self.lock();
        Self::check_failure(&mut state)?;
        let sql = select.to_sql_with(|v| self.quote(v));
        tracing::trace!(sql = %sql, "memory query");
        state.query_calls += 1;
        state.log.push(Operation::Query(sql.clone()));

        let rows = evaluate(&state, select).map_err(|e| match e {
            Error::Query(mut q) => {
                q.sql = Some(sql);
                Error::Query(q)
            }
            other => other,
        })?;
        Ok(Box::new(RowCursor::new(rows)))
    }

    fn last_insert_id(&self) -> Result<Value> {
        Ok(self.lock().last_insert_id.clone().unwrap_or(Value::Null))
    }

    fn events(&self) -> &dyn EventDispatcher {
        self.events.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::OrderBy;

    fn fixture() -> MemoryConnection {
        let conn = MemoryConnection::new();
        conn.create_table("users", &["id", "name"], Some("id"));
        conn.create_table("posts", &["id", "user_id", "title"], Some("id"));
        conn.create_table("post_tags", &["post_id", "tag_id"], None);
        conn
    }

    fn fetch_all(conn: &MemoryConnection, select: &Select) -> Vec<Row> {
        let mut stmt = conn.query(select).unwrap();
        let mut rows = Vec::new();
        while let Some(row) = stmt.fetch().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_insert_assigns_auto_increment() {
        let conn = fixture();
        conn.insert("users", &[("name".into(), "Ann".into())]).unwrap();
        assert_eq!(conn.last_insert_id().unwrap(), Value::BigInt(1));
        conn.insert("users", &[("id".into(), Value::Int(10)), ("name".into(), "Bob".into())])
            .unwrap();
        assert_eq!(conn.last_insert_id().unwrap(), Value::Int(10));
        conn.insert("users", &[("name".into(), "Cy".into())]).unwrap();
        assert_eq!(conn.last_insert_id().unwrap(), Value::BigInt(11));
    }

    #[test]
    fn test_duplicate_key_is_a_constraint_error() {
        let conn = fixture();
        conn.seed("users", [("id", Value::Int(1)), ("name", "Ann".into())])
            .unwrap();
        let err = conn
            .insert("users", &[("id".into(), Value::BigInt(1))])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let conn = fixture();
        assert!(conn.insert("users", &[("age".into(), Value::Int(3))]).is_err());
        assert!(conn.insert("nope", &[]).is_err());
    }

    #[test]
    fn test_update_and_delete_by_key() {
        let conn = fixture();
        conn.seed("users", [("id", Value::Int(1)), ("name", "Ann".into())])
            .unwrap();
        conn.seed("users", [("id", Value::Int(2)), ("name", "Bob".into())])
            .unwrap();

        let n = conn
            .update("users", &[("name".into(), "Anna".into())], ("id", &Value::BigInt(1)))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            conn.rows("users")[0].get_by_name("name"),
            Some(&Value::Text("Anna".into()))
        );

        assert_eq!(conn.delete("users", ("id", &Value::Int(2))).unwrap(), 1);
        assert_eq!(conn.delete("users", ("id", &Value::Int(2))).unwrap(), 0);
        assert_eq!(conn.rows("users").len(), 1);
    }

    #[test]
    fn test_select_filters_orders_and_limits() {
        let conn = fixture();
        for (id, name) in [(1, "Cy"), (2, "Ann"), (3, "Bob")] {
            conn.seed("users", [("id", Value::Int(id)), ("name", name.into())])
                .unwrap();
        }

        let mut select = Select::from("users");
        select
            .where_in("id", vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(3)])
            .order_by(OrderBy::asc("name"))
            .offset(1)
            .limit(1);
        let rows = fetch_all(&conn, &select);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("name"), Some(&Value::Text("Bob".into())));
        assert_eq!(conn.query_calls(), 1);
    }

    #[test]
    fn test_join_with_alias_projection() {
        let conn = fixture();
        conn.seed("posts", [("id", Value::Int(7)), ("title", "Hi".into())])
            .unwrap();
        conn.seed("post_tags", [("post_id", Value::Int(7)), ("tag_id", Value::Int(1))])
            .unwrap();
        conn.seed("post_tags", [("post_id", Value::Int(7)), ("tag_id", Value::Int(2))])
            .unwrap();

        let mut select = Select::from("posts");
        select
            .project(Projection::All("posts".into()))
            .column_as("post_tags.tag_id", "_through_key")
            .join("post_tags", "post_tags.post_id", "posts.id")
            .where_eq("post_tags.tag_id", Value::Int(2));
        let rows = fetch_all(&conn, &select);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name("_through_key"), Some(&Value::Int(2)));
        assert_eq!(rows[0].get_by_name("title"), Some(&Value::Text("Hi".into())));
    }

    #[test]
    fn test_fetch_column_and_null_filter() {
        let conn = fixture();
        conn.seed("posts", [("id", Value::Int(1)), ("user_id", Value::Null)])
            .unwrap();

        let mut probe = Select::from("posts");
        probe
            .project(Projection::Literal(Value::Int(1)))
            .where_eq("id", Value::BigInt(1))
            .limit(1);
        assert_eq!(conn.fetch_column(&probe).unwrap(), Some(Value::Int(1)));

        let mut by_user = Select::from("posts");
        by_user.where_eq("user_id", Value::Null);
        assert!(fetch_all(&conn, &by_user).is_empty());

        let mut orphans = Select::from("posts");
        orphans.where_null("user_id");
        assert_eq!(fetch_all(&conn, &orphans).len(), 1);
    }

    #[test]
    fn test_count_collapses_rows() {
        let conn = fixture();
        for id in 1..=3 {
            conn.seed("users", [("id", Value::Int(id)), ("name", "x".into())])
                .unwrap();
        }
        let mut count = Select::from("users");
        count.project(Projection::Count).where_in("id", vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(conn.fetch_column(&count).unwrap(), Some(Value::BigInt(2)));

        let mut none = Select::from("users");
        none.project(Projection::Count).where_eq("id", Value::Int(9));
        assert_eq!(conn.fetch_column(&none).unwrap(), Some(Value::BigInt(0)));
    }

    #[test]
    fn test_fail_next_fails_once() {
        let conn = fixture();
        conn.fail_next("disk full");
        let err = conn.insert("users", &[]).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(conn.insert("users", &[]).is_ok());
    }

    #[test]
    fn test_operations_are_recorded() {
        let conn = fixture();
        conn.insert("users", &[("name".into(), "Ann".into())]).unwrap();
        conn.delete("users", ("id", &Value::BigInt(1))).unwrap();
        let ops = conn.operations();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], Operation::Insert { table, .. } if table == "users"));
        conn.clear_log();
        assert!(conn.operations().is_empty());
    }
}
