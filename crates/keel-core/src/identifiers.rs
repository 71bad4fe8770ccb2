//! SQL identifier and literal quoting.
//!
//! Table and column names coming from mapping sources are validated with
//! [`is_valid_identifier`] when metadata is built; drivers quote them with
//! [`quote_ident`] and render values with [`quote_literal`].

use crate::value::Value;
use regex::Regex;
use std::sync::OnceLock;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Optional schema prefix, e.g. `app.users`.
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
            .unwrap_or_else(|e| unreachable!("identifier pattern is valid: {e}"))
    })
}

/// Check whether `name` is a plain SQL identifier (optionally schema-qualified).
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them. A schema-qualified
/// name is quoted per segment.
///
/// ```
/// use keel_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("app.users"), "\"app\".\"users\"");
/// ```
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Render a value as an escaped SQL literal.
///
/// ```
/// use keel_core::{Value, quote_literal};
///
/// assert_eq!(quote_literal(&Value::Text("O'Brien".into())), "'O''Brien'");
/// assert_eq!(quote_literal(&Value::Null), "NULL");
/// ```
pub fn quote_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("X'{}'", hex)
        }
        Value::Json(j) => format!("'{}'", j.to_string().replace('\'', "''")),
    }
}
