//! Error types for Keel operations.

use std::fmt;

/// The primary error type for all Keel operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors raised by a storage driver
    Connection(ConnectionError),
    /// Query execution errors raised by a storage driver
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Mapping/metadata configuration errors
    Config(ConfigError),
    /// Operation not allowed for the entity's current lifecycle state
    State(StateError),
    /// Authentication, authorization and CSRF errors
    Auth(AuthError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost during operation
    Disconnected,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

/// Configuration error raised while building or using entity metadata.
#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    /// The entity the error was raised for, when known.
    pub entity: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// The type carries no entity marker / mapping
    NotAnEntity,
    /// A field or relation name is mapped twice
    DuplicateMapping,
    /// No identifier, or more than one
    Identifier,
    /// A table or column name is not a valid identifier
    InvalidName,
    /// Unknown relation, or relation target/resolver cannot be resolved
    UnknownRelation,
    /// The entity type has no field or callback with the given name
    UnknownMember,
    /// The requested repository variant does not match the mapping
    Repository,
    /// A declarative mapping source could not be parsed
    Parse,
}

/// An operation was attempted on an entity in the wrong lifecycle state.
#[derive(Debug, Clone)]
pub struct StateError {
    /// Name of the computed state (`"new"`, `"managed"`, `"detached"`).
    pub state: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    /// HTTP-style status code the host application should answer with.
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Credentials did not match a user
    BadCredentials,
    /// A listener denied authorization
    Denied,
    /// The CSRF token was missing or invalid
    BadToken,
    /// No user provider was registered
    MissingProvider,
    /// The session does not hold the expected data
    Session,
}

impl Error {
    /// Create a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            entity: None,
            message: message.into(),
            source: None,
        })
    }

    /// Create a configuration error naming the offending entity.
    pub fn config_for(
        kind: ConfigErrorKind,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Config(ConfigError {
            kind,
            entity: Some(entity.into()),
            message: message.into(),
            source: None,
        })
    }

    /// Create an invalid-state error.
    pub fn state(state: &'static str, message: impl Into<String>) -> Self {
        Error::State(StateError {
            state,
            message: message.into(),
        })
    }

    /// Create an authentication error.
    pub fn auth(kind: AuthErrorKind, status: u16, message: impl Into<String>) -> Self {
        Error::Auth(AuthError {
            kind,
            status,
            message: message.into(),
        })
    }

    /// Is this a configuration error?
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Configuration error kind, if this is a configuration error.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(c) => Some(c.kind),
            _ => None,
        }
    }

    /// Name of the offending state, if this is an invalid-state error.
    pub fn invalid_state(&self) -> Option<&'static str> {
        match self {
            Error::State(s) => Some(s.state),
            _ => None,
        }
    }

    /// Auth error kind, if this is an auth error.
    pub fn auth_kind(&self) -> Option<AuthErrorKind> {
        match self {
            Error::Auth(a) => Some(a.kind),
            _ => None,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::State(e) => write!(f, "Invalid entity state ({}): {}", e.state, e.message),
            Error::Auth(e) => write!(f, "Auth error ({}): {}", e.status, e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{} (entity '{}')", self.message, entity),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        Error::State(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Auth(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for Keel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_entity() {
        let err = Error::config_for(
            ConfigErrorKind::NotAnEntity,
            "User",
            "no entity mapping declared",
        );
        assert!(err.is_config());
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::NotAnEntity));
        assert_eq!(
            err.to_string(),
            "Configuration error: no entity mapping declared (entity 'User')"
        );
    }

    #[test]
    fn state_error_reports_state_name() {
        let err = Error::state("detached", "Detached entity can not be removed");
        assert_eq!(err.invalid_state(), Some("detached"));
        assert!(err.to_string().contains("detached"));
        assert!(!err.is_config());
    }

    #[test]
    fn query_error_exposes_sql() {
        let err = Error::Query(QueryError {
            kind: QueryErrorKind::Constraint,
            sql: Some("INSERT INTO users".to_string()),
            message: "unique violation".to_string(),
            source: None,
        });
        assert_eq!(err.sql(), Some("INSERT INTO users"));
        assert!(!err.is_connection_error());
    }

    #[test]
    fn auth_error_carries_status() {
        let err = Error::auth(AuthErrorKind::BadToken, 401, "Invalid CSRF token.");
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::BadToken));
        assert_eq!(err.to_string(), "Auth error (401): Invalid CSRF token.");
    }
}
