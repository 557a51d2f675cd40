//! DDL generation for mapped and audited entities.

use hiberlite_core::{EntityDescriptor, FieldInfo, quote_ident};

use crate::dialect::Dialect;

/// Table holding one row per audit revision.
pub const REVINFO_TABLE: &str = "revinfo";
/// Revision number column (in `revinfo` and every audit table).
pub const REV_COLUMN: &str = "rev";
/// Revision timestamp column in `revinfo` (milliseconds since the Unix epoch).
pub const REVTSTMP_COLUMN: &str = "revtstmp";
/// Change kind column in audit tables: 0 = add, 1 = modify, 2 = delete.
pub const REVTYPE_COLUMN: &str = "revtype";

/// Audit table for an entity table.
pub fn audit_table_name(table: &str) -> String {
    format!("{table}_aud")
}

fn create_prefix(if_not_exists: bool) -> &'static str {
    if if_not_exists {
        "CREATE TABLE IF NOT EXISTS"
    } else {
        "CREATE TABLE"
    }
}

fn quoted_list(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_definition(field: &FieldInfo, dialect: Dialect, single_generated: bool) -> String {
    let mut def = format!(
        "{} {}",
        quote_ident(field.column_name),
        dialect.column_type(field)
    );
    if single_generated {
        def.push(' ');
        def.push_str(dialect.identity_clause());
        return def;
    }
    if !field.nullable {
        def.push_str(" NOT NULL");
    }
    if field.unique {
        def.push_str(" UNIQUE");
    }
    if let Some(default) = field.default {
        def.push_str(" DEFAULT ");
        def.push_str(default);
    }
    def
}

/// `CREATE TABLE` for an entity.
pub fn generate_create_table(entity: &EntityDescriptor, dialect: Dialect, if_not_exists: bool) -> String {
    let generated = entity.generated_key().map(|f| f.column_name);
    let mut parts: Vec<String> = entity
        .fields
        .iter()
        .map(|f| column_definition(f, dialect, Some(f.column_name) == generated))
        .collect();

    if generated.is_none() {
        parts.push(format!("PRIMARY KEY ({})", quoted_list(entity.primary_key)));
    }

    let stmt = format!(
        "{} {} ({})",
        create_prefix(if_not_exists),
        quote_ident(entity.table_name),
        parts.join(", ")
    );
    tracing::trace!(entity = entity.name, sql = %stmt, "Generated CREATE TABLE");
    stmt
}

/// `CREATE TABLE` for the shared revision table.
pub fn generate_create_revinfo(dialect: Dialect, if_not_exists: bool) -> String {
    format!(
        "{} {} ({} INTEGER {}, {} BIGINT NOT NULL)",
        create_prefix(if_not_exists),
        quote_ident(REVINFO_TABLE),
        quote_ident(REV_COLUMN),
        dialect.identity_clause(),
        quote_ident(REVTSTMP_COLUMN)
    )
}

/// `CREATE TABLE` for an entity's audit table.
///
/// Holds every audited column (nullable except the key), the revision and the
/// change kind. The key is the entity key plus the revision.
pub fn generate_create_audit_table(
    entity: &EntityDescriptor,
    dialect: Dialect,
    if_not_exists: bool,
) -> String {
    let mut parts: Vec<String> = entity
        .audited_fields()
        .map(|f| {
            let ty = dialect.column_type(f);
            if f.primary_key {
                format!("{} {} NOT NULL", quote_ident(f.column_name), ty)
            } else {
                format!("{} {}", quote_ident(f.column_name), ty)
            }
        })
        .collect();
    parts.push(format!("{} INTEGER NOT NULL", quote_ident(REV_COLUMN)));
    parts.push(format!("{} INTEGER", quote_ident(REVTYPE_COLUMN)));

    let mut key: Vec<&str> = entity.primary_key.to_vec();
    key.push(REV_COLUMN);
    parts.push(format!("PRIMARY KEY ({})", quoted_list(&key)));
    parts.push(format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(REV_COLUMN),
        quote_ident(REVINFO_TABLE),
        quote_ident(REV_COLUMN)
    ));

    format!(
        "{} {} ({})",
        create_prefix(if_not_exists),
        quote_ident(&audit_table_name(entity.table_name)),
        parts.join(", ")
    )
}

/// `DROP TABLE IF EXISTS`
pub fn generate_drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}
