//! Field and column definitions.

use crate::types::SqlType;

/// Metadata about a mapped field/column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// SQL type for this field
    pub sql_type: SqlType,
    /// Explicit SQL type override string (e.g., "VARCHAR(255)")
    /// When set, this takes precedence over `sql_type` in DDL generation.
    pub sql_type_override: Option<&'static str>,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this is a primary key
    pub primary_key: bool,
    /// Whether this field auto-increments (database-generated key)
    pub auto_increment: bool,
    /// Whether this field has a unique constraint
    pub unique: bool,
    /// Default value expression (SQL)
    pub default: Option<&'static str>,
    /// Whether changes to this column are left out of the audit trail.
    /// Primary key columns are always audited.
    pub not_audited: bool,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            sql_type_override: None,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
            default: None,
            not_audited: false,
        }
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    /// Set explicit SQL type override.
    pub const fn sql_type_override(mut self, type_str: &'static str) -> Self {
        self.sql_type_override = Some(type_str);
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set auto-increment flag.
    pub const fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }

    /// Set unique flag.
    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Set default SQL expression.
    pub const fn default(mut self, expr: &'static str) -> Self {
        self.default = Some(expr);
        self
    }

    /// Exclude this column from the audit trail.
    pub const fn not_audited(mut self, value: bool) -> Self {
        self.not_audited = value;
        self
    }

    /// Get the effective SQL type name for DDL generation.
    ///
    /// `sql_type_override` wins over `sql_type.sql_name()`.
    #[must_use]
    pub fn effective_sql_type(&self) -> String {
        if let Some(override_str) = self.sql_type_override {
            return override_str.to_string();
        }
        self.sql_type.sql_name()
    }

    /// Whether this column is written to the audit table.
    #[must_use]
    pub const fn is_audited(&self) -> bool {
        self.primary_key || !self.not_audited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_info_new() {
        let field = FieldInfo::new("name", "name", SqlType::Text);
        assert_eq!(field.name, "name");
        assert_eq!(field.column_name, "name");
        assert!(!field.nullable);
        assert!(!field.primary_key);
        assert!(field.default.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let field = FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true)
            .column("person_id");
        assert!(field.primary_key);
        assert!(field.auto_increment);
        assert_eq!(field.column_name, "person_id");
    }

    #[test]
    fn test_effective_sql_type_override_takes_precedence() {
        let field = FieldInfo::new("email", "email", SqlType::Text).sql_type_override("VARCHAR(320)");
        assert_eq!(field.effective_sql_type(), "VARCHAR(320)");

        let plain = FieldInfo::new("email", "email", SqlType::VarChar(64));
        assert_eq!(plain.effective_sql_type(), "VARCHAR(64)");
    }

    #[test]
    fn test_primary_key_always_audited() {
        let pk = FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .not_audited(true);
        assert!(pk.is_audited());

        let skipped = FieldInfo::new("nickname", "nickname", SqlType::Text).not_audited(true);
        assert!(!skipped.is_audited());
    }
}
