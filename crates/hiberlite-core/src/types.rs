//! SQL column types.

/// Logical SQL type of a mapped column.
///
/// SQLite stores values by affinity; the declared name still matters for
/// readability of the generated schema and for schema validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// Boolean stored as 0/1.
    Boolean,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Double precision float.
    Double,
    /// Variable-length text with a declared maximum length.
    VarChar(u32),
    /// Unbounded text.
    Text,
    /// Binary data.
    Blob,
    /// JSON document stored as text.
    Json,
    /// Timestamp stored as integer milliseconds since the Unix epoch.
    Timestamp,
}

impl SqlType {
    /// Declared SQL type name for DDL.
    #[must_use]
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({len})"),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
        }
    }

    /// Whether values of this type are integers in storage.
    #[must_use]
    pub const fn is_integral(&self) -> bool {
        matches!(
            self,
            SqlType::Boolean | SqlType::Integer | SqlType::BigInt | SqlType::Timestamp
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_names() {
        assert_eq!(SqlType::VarChar(255).sql_name(), "VARCHAR(255)");
        assert_eq!(SqlType::BigInt.sql_name(), "BIGINT");
        assert_eq!(SqlType::Json.sql_name(), "JSON");
    }

    #[test]
    fn test_integral_types() {
        assert!(SqlType::BigInt.is_integral());
        assert!(SqlType::Timestamp.is_integral());
        assert!(!SqlType::Text.is_integral());
    }
}
