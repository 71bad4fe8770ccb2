//! Core types and traits for Keel.
//!
//! This crate provides the foundations the ORM and auth layers build on:
//!
//! - `Value` and `Row` for dynamically-typed column data
//! - `Select` for structured queries
//! - `Connection` and `Statement` traits for storage access
//! - `EventDispatcher` for named, synchronous event broadcasting
//! - `MemoryConnection`, an in-memory storage backend

pub mod connection;
pub mod error;
pub mod event;
pub mod identifiers;
pub mod memory;
pub mod query;
pub mod row;
pub mod value;

pub use connection::{Connection, RowCursor, Statement, Values};
pub use error::{
    AuthError, AuthErrorKind, ConfigError, ConfigErrorKind, ConnectionError, ConnectionErrorKind,
    Error, QueryError, QueryErrorKind, Result, StateError, TypeError,
};
pub use event::{Dispatcher, Event, EventDispatcher, Listener};
pub use identifiers::{is_valid_identifier, quote_ident, quote_literal};
pub use memory::{MemoryConnection, Operation};
pub use query::{ColumnRef, Condition, Join, OrderBy, OrderDirection, Projection, Select};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::{Value, ValueKey};
