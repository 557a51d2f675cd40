//! SQL dialects.

use hiberlite_core::{Error, FieldInfo, Result};

/// Setting key reported in dialect errors.
const DIALECT_SETTING: &str = "hibernate.dialect";

/// Database dialect used for DDL generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Embedded SQLite
    #[default]
    Sqlite,
}

impl Dialect {
    /// Name used in configuration.
    pub const fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "SqliteDialect",
        }
    }

    /// Parse the `hibernate.dialect` setting.
    ///
    /// Accepts the short name (`SqliteDialect`), a path ending in it
    /// (`hiberlite_schema::dialect::SqliteDialect`), or `sqlite`.
    pub fn from_setting(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let short = trimmed.rsplit("::").next().unwrap_or(trimmed);
        if short == Dialect::Sqlite.name() || short.eq_ignore_ascii_case("sqlite") {
            Ok(Dialect::Sqlite)
        } else {
            Err(Error::config(
                DIALECT_SETTING,
                format!("unknown dialect `{value}`"),
            ))
        }
    }

    /// Column type for DDL.
    ///
    /// SQLite only treats a column as rowid alias when it is declared exactly
    /// `INTEGER PRIMARY KEY`, so generated keys always use `INTEGER`.
    pub fn column_type(&self, field: &FieldInfo) -> String {
        match self {
            Dialect::Sqlite if field.primary_key && field.auto_increment => "INTEGER".to_string(),
            Dialect::Sqlite => field.effective_sql_type(),
        }
    }

    /// Keyword suffix for a generated key column.
    pub const fn identity_clause(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "PRIMARY KEY AUTOINCREMENT",
        }
    }
}
