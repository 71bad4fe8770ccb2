//! Structured SELECT queries.
//!
//! The core never concatenates SQL itself: repositories and relation
//! resolvers build a [`Select`] and hand it to the [`Connection`], which
//! either renders it with [`Select::to_sql_with`] or evaluates it directly.
//!
//! [`Connection`]: crate::Connection

use crate::identifiers::{quote_ident, quote_literal};
use crate::value::Value;
use std::fmt;

/// A column reference, optionally qualified with its table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

impl ColumnRef {
    /// Parse `"table.column"` or `"column"`.
    pub fn parse(input: &str) -> Self {
        match input.rsplit_once('.') {
            Some((table, name)) => Self {
                table: Some(table.to_string()),
                name: name.to_string(),
            },
            None => Self {
                table: None,
                name: input.to_string(),
            },
        }
    }

    /// Render the quoted reference.
    pub fn to_sql(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", quote_ident(table), quote_ident(&self.name)),
            None => quote_ident(&self.name),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for ColumnRef {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// One entry of the SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `table.*`
    All(String),
    /// A single column, optionally aliased.
    Column {
        column: ColumnRef,
        alias: Option<String>,
    },
    /// A constant, e.g. the `1` of an existence probe.
    Literal(Value),
    /// `COUNT(*)`
    Count,
}

/// A single WHERE predicate. Predicates are AND-ed together.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(ColumnRef, Value),
    In(ColumnRef, Vec<Value>),
    IsNull(ColumnRef),
}

/// `INNER JOIN table ON left = right`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: String,
    pub left: ColumnRef,
    pub right: ColumnRef,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    /// Parse `"asc"`/`"desc"` (case-insensitive).
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// ORDER BY clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Create an ascending order by clause.
    pub fn asc(column: impl Into<ColumnRef>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order by clause.
    pub fn desc(column: impl Into<ColumnRef>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Generate SQL for this ORDER BY clause.
    pub fn to_sql(&self) -> String {
        let mut sql = self.column.to_sql();
        sql.push_str(match self.direction {
            OrderDirection::Asc => " ASC",
            OrderDirection::Desc => " DESC",
        });
        sql
    }
}

/// A SELECT statement over one table plus optional inner joins.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    projections: Vec<Projection>,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Select {
    /// Select from `table`. With no explicit projection, renders `table.*`.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            projections: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Retarget the query at another table, keeping filters and ordering.
    pub fn set_table(&mut self, table: impl Into<String>) -> &mut Self {
        self.table = table.into();
        self
    }

    /// Add a projection.
    pub fn project(&mut self, projection: Projection) -> &mut Self {
        self.projections.push(projection);
        self
    }

    /// Add an aliased column to the projection.
    pub fn column_as(&mut self, column: impl Into<ColumnRef>, alias: impl Into<String>) -> &mut Self {
        self.project(Projection::Column {
            column: column.into(),
            alias: Some(alias.into()),
        })
    }

    /// Add an inner join.
    pub fn join(
        &mut self,
        table: impl Into<String>,
        left: impl Into<ColumnRef>,
        right: impl Into<ColumnRef>,
    ) -> &mut Self {
        self.joins.push(Join {
            table: table.into(),
            left: left.into(),
            right: right.into(),
        });
        self
    }

    /// `WHERE column = value`
    pub fn where_eq(&mut self, column: impl Into<ColumnRef>, value: impl Into<Value>) -> &mut Self {
        self.conditions
            .push(Condition::Eq(column.into(), value.into()));
        self
    }

    /// `WHERE column IN (values)`
    pub fn where_in(&mut self, column: impl Into<ColumnRef>, values: Vec<Value>) -> &mut Self {
        self.conditions.push(Condition::In(column.into(), values));
        self
    }

    /// `WHERE column IS NULL`
    pub fn where_null(&mut self, column: impl Into<ColumnRef>) -> &mut Self {
        self.conditions.push(Condition::IsNull(column.into()));
        self
    }

    /// Append an ORDER BY clause.
    pub fn order_by(&mut self, order: OrderBy) -> &mut Self {
        self.order_by.push(order);
        self
    }

    /// Set LIMIT.
    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// Set OFFSET.
    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn orderings(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Render with ANSI identifier quoting and default literal quoting.
    pub fn to_sql(&self) -> String {
        self.to_sql_with(quote_literal)
    }

    /// Render using a driver-specific literal quoting function.
    pub fn to_sql_with(&self, quote: impl Fn(&Value) -> String) -> String {
        let mut sql = String::from("SELECT ");

        if self.projections.is_empty() {
            sql.push_str(&format!("{}.*", quote_ident(&self.table)));
        } else {
            let list: Vec<String> = self
                .projections
                .iter()
                .map(|p| match p {
                    Projection::All(table) => format!("{}.*", quote_ident(table)),
                    Projection::Column { column, alias } => match alias {
                        Some(alias) => format!("{} AS {}", column.to_sql(), quote_ident(alias)),
                        None => column.to_sql(),
                    },
                    Projection::Literal(value) => quote(value),
                    Projection::Count => "COUNT(*)".to_string(),
                })
                .collect();
            sql.push_str(&list.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(&quote_ident(&self.table));

        for join in &self.joins {
            sql.push_str(&format!(
                " INNER JOIN {} ON {} = {}",
                quote_ident(&join.table),
                join.left.to_sql(),
                join.right.to_sql()
            ));
        }

        if !self.conditions.is_empty() {
            let predicates: Vec<String> = self
                .conditions
                .iter()
                .map(|c| match c {
                    Condition::Eq(column, value) => format!("{} = {}", column.to_sql(), quote(value)),
                    Condition::In(_, values) if values.is_empty() => "1 = 0".to_string(),
                    Condition::In(column, values) => {
                        let list: Vec<String> = values.iter().map(&quote).collect();
                        format!("{} IN ({})", column.to_sql(), list.join(", "))
                    }
                    Condition::IsNull(column) => format!("{} IS NULL", column.to_sql()),
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        if !self.order_by.is_empty() {
            let orders: Vec<String> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        sql
    }
}
