//! Configuration property keys.

use hiberlite_core::{Error, Result};
use hiberlite_session::EventType;

/// Connection provider name (`EmbeddedConnectionProvider`).
pub const CONNECTION_PROVIDER: &str = "hibernate.connection.provider_class";
/// Database location override, e.g. `sqlite:/tmp/app.db` or `sqlite::memory:`.
pub const URL: &str = "hibernate.connection.url";
/// Current-session context (`thread`).
pub const CURRENT_SESSION_CONTEXT_CLASS: &str = "hibernate.current_session_context_class";
/// SQL dialect (`SqliteDialect`).
pub const DIALECT: &str = "hibernate.dialect";
/// Startup schema action (`none`, `create`, `create-drop`, `update`, `validate`).
pub const HBM2DDL_AUTO: &str = "hibernate.hbm2ddl.auto";
/// Log every statement at INFO.
pub const SHOW_SQL: &str = "hibernate.show_sql";
/// Pretty-print logged statements.
pub const FORMAT_SQL: &str = "hibernate.format_sql";
/// When pending changes are flushed (`commit` or `auto`). `auto` also flushes
/// before queries.
pub const FLUSH_MODE: &str = "hibernate.flushMode";
/// Run writes outside an explicit transaction in autocommit mode.
pub const AUTOCOMMIT: &str = "hibernate.connection.autocommit";
/// Prefix of listener binding keys; the suffix is an [`EventType`] key.
pub const EVENT_PREFIX: &str = "hibernate.ejb.event.";

/// Listener binding key for an event type, e.g. `hibernate.ejb.event.post-insert`.
pub fn event_key(event_type: EventType) -> String {
    format!("{EVENT_PREFIX}{}", event_type.key())
}

/// Parse a boolean setting. Only `true` and `false` are accepted.
pub fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::config(key, format!("expected `true` or `false`, got `{other}`"))),
    }
}

/// Split a comma-separated listener list.
pub fn listener_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_key() {
        assert_eq!(
            event_key(EventType::PostCollectionRecreate),
            "hibernate.ejb.event.post-collection-recreate"
        );
    }

    #[test]
    fn test_parse_bool_is_strict() {
        assert!(parse_bool(SHOW_SQL, "true").unwrap());
        assert!(!parse_bool(SHOW_SQL, " false ").unwrap());
        let err = parse_bool(SHOW_SQL, "yes").unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == SHOW_SQL));
    }

    #[test]
    fn test_listener_names() {
        assert_eq!(listener_names("callbacks, audit,,"), vec!["callbacks", "audit"]);
        assert!(listener_names(" ").is_empty());
    }
}
