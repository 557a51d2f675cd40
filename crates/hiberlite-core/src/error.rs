//! Error types shared by every hiberlite crate.
//!
//! Errors carry rendered messages rather than the underlying driver error so the
//! type stays `Clone`: a failed session-factory initialization is stored once and
//! handed to every later caller.

/// Result alias used throughout hiberlite.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by hiberlite.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A physical connection could not be opened, used, or closed.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// A statement failed to execute.
    #[error("query error: {message} (sql: {sql})")]
    Query { sql: String, message: String },

    /// A configuration property is missing or malformed.
    #[error("invalid setting `{key}`: {message}")]
    Config { key: String, message: String },

    /// Schema export or validation failed.
    #[error("schema error: {0}")]
    Schema(String),

    /// A type is not mapped, or its mapping metadata is inconsistent.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The one-time session-factory initialization failed.
    #[error("session factory initialization failed: {0}")]
    Initialization(String),

    /// A transaction or session lifecycle operation was invalid.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Anything else.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Build a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection {
            message: message.into(),
        }
    }

    /// Build a query error for the given statement.
    pub fn query(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query {
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Build a configuration error for the given setting key.
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the connection layer.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_sql() {
        let err = Error::query("SELECT 1", "boom");
        assert_eq!(err.to_string(), "query error: boom (sql: SELECT 1)");
    }

    #[test]
    fn test_config_error_names_key() {
        let err = Error::config("hibernate.dialect", "unknown dialect `Oracle`");
        assert!(err.to_string().contains("hibernate.dialect"));
        assert!(!err.is_connection());
    }

    #[test]
    fn test_errors_are_cloneable() {
        let err = Error::connection("unable to open database file");
        assert_eq!(err.clone(), err);
        assert!(err.is_connection());
    }
}
