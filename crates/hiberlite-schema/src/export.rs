//! Applying the mapped schema to a database.

use hiberlite_core::{EntityDescriptor, Error, Result, Value, quote_ident};
use hiberlite_sqlite::PhysicalConnection;

use crate::ddl::{
    REVINFO_TABLE, audit_table_name, generate_create_audit_table, generate_create_revinfo,
    generate_create_table, generate_drop_table,
};
use crate::dialect::Dialect;

/// Setting key reported in schema-action errors.
const HBM2DDL_SETTING: &str = "hibernate.hbm2ddl.auto";

/// What to do with the schema when the session factory starts (and stops).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaAction {
    /// Leave the schema alone.
    #[default]
    None,
    /// Drop and recreate all mapped tables at startup.
    Create,
    /// Like `Create`, and drop everything again when the factory is closed.
    CreateDrop,
    /// Create missing tables, keep existing ones and their data.
    Update,
    /// Fail startup if a mapped table or column is missing.
    Validate,
}

impl SchemaAction {
    /// Parse the `hibernate.hbm2ddl.auto` setting.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "none" | "" => Ok(SchemaAction::None),
            "create" => Ok(SchemaAction::Create),
            "create-drop" => Ok(SchemaAction::CreateDrop),
            "update" => Ok(SchemaAction::Update),
            "validate" => Ok(SchemaAction::Validate),
            other => Err(Error::config(
                HBM2DDL_SETTING,
                format!("unknown schema action `{other}`"),
            )),
        }
    }

    /// Setting value for this action.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SchemaAction::None => "none",
            SchemaAction::Create => "create",
            SchemaAction::CreateDrop => "create-drop",
            SchemaAction::Update => "update",
            SchemaAction::Validate => "validate",
        }
    }

    /// Whether the schema is dropped when the factory closes.
    pub const fn drops_on_close(&self) -> bool {
        matches!(self, SchemaAction::CreateDrop)
    }
}

/// The schema for a set of registered entities.
#[derive(Debug, Clone)]
pub struct SchemaExport {
    dialect: Dialect,
    entities: Vec<EntityDescriptor>,
}

impl SchemaExport {
    /// Schema for the given entities.
    pub fn new(dialect: Dialect, entities: Vec<EntityDescriptor>) -> Self {
        Self { dialect, entities }
    }

    fn has_audited(&self) -> bool {
        self.entities.iter().any(|e| e.audited)
    }

    /// Every table this schema owns, in creation order.
    pub fn managed_tables(&self) -> Vec<String> {
        let mut tables = Vec::new();
        if self.has_audited() {
            tables.push(REVINFO_TABLE.to_string());
        }
        for entity in &self.entities {
            tables.push(entity.table_name.to_string());
        }
        for entity in self.entities.iter().filter(|e| e.audited) {
            tables.push(audit_table_name(entity.table_name));
        }
        tables
    }

    /// `CREATE TABLE` statements in dependency order.
    pub fn create_statements(&self, if_not_exists: bool) -> Vec<String> {
        let mut stmts = Vec::new();
        if self.has_audited() {
            stmts.push(generate_create_revinfo(self.dialect, if_not_exists));
        }
        for entity in &self.entities {
            stmts.push(generate_create_table(entity, self.dialect, if_not_exists));
        }
        for entity in self.entities.iter().filter(|e| e.audited) {
            stmts.push(generate_create_audit_table(entity, self.dialect, if_not_exists));
        }
        stmts
    }

    /// `DROP TABLE` statements in reverse dependency order.
    pub fn drop_statements(&self) -> Vec<String> {
        self.managed_tables()
            .iter()
            .rev()
            .map(|t| generate_drop_table(t))
            .collect()
    }

    fn run(conn: &PhysicalConnection, statements: &[String]) -> Result<()> {
        for stmt in statements {
            conn.execute(stmt, &[])
                .map_err(|e| Error::Schema(e.to_string()))?;
        }
        Ok(())
    }

    /// Drop (if present) and recreate every managed table.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub fn create(&self, conn: &PhysicalConnection) -> Result<()> {
        tracing::info!(tables = self.managed_tables().len(), "Recreating schema");
        Self::run(conn, &self.drop_statements())?;
        Self::run(conn, &self.create_statements(false))
    }

    /// Drop every managed table.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub fn drop(&self, conn: &PhysicalConnection) -> Result<()> {
        tracing::info!(tables = self.managed_tables().len(), "Dropping schema");
        Self::run(conn, &self.drop_statements())
    }

    /// Create missing tables.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub fn update(&self, conn: &PhysicalConnection) -> Result<()> {
        tracing::info!("Updating schema");
        Self::run(conn, &self.create_statements(true))
    }

    /// Check that every managed table and every mapped column exists.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub fn validate(&self, conn: &PhysicalConnection) -> Result<()> {
        for table in self.managed_tables() {
            if !conn.table_exists(&table)? {
                return Err(Error::Schema(format!("missing table `{table}`")));
            }
        }
        for entity in &self.entities {
            let rows = conn.query(
                &format!("PRAGMA table_info({})", quote_ident(entity.table_name)),
                &[],
            )?;
            let present: Vec<String> = rows
                .iter()
                .filter_map(|r| match r.get_named("name") {
                    Some(Value::Text(name)) => Some(name.clone()),
                    _ => None,
                })
                .collect();
            for field in entity.fields {
                if !present.iter().any(|c| c.eq_ignore_ascii_case(field.column_name)) {
                    return Err(Error::Schema(format!(
                        "missing column `{}` in table `{}`",
                        field.column_name, entity.table_name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply a startup action.
    pub fn execute(&self, action: SchemaAction, conn: &PhysicalConnection) -> Result<()> {
        match action {
            SchemaAction::None => Ok(()),
            SchemaAction::Create | SchemaAction::CreateDrop => self.create(conn),
            SchemaAction::Update => self.update(conn),
            SchemaAction::Validate => self.validate(conn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiberlite_core::{FieldInfo, SqlType};
    use hiberlite_sqlite::DatabaseUrl;

    static NOTE_FIELDS: [FieldInfo; 2] = [
        FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true),
        FieldInfo::new("body", "body", SqlType::Text),
    ];

    fn note(audited: bool) -> EntityDescriptor {
        EntityDescriptor {
            primary_key: &["id"],
            fields: &NOTE_FIELDS,
            audited,
            ..EntityDescriptor::declared("Note", "app::domain")
                .entity(true)
                .table("note")
        }
    }

    fn memory() -> PhysicalConnection {
        PhysicalConnection::open(&DatabaseUrl::Memory).unwrap()
    }

    #[test]
    fn test_parse_schema_action() {
        assert_eq!(SchemaAction::parse("create-drop").unwrap(), SchemaAction::CreateDrop);
        assert_eq!(SchemaAction::parse("none").unwrap(), SchemaAction::None);
        assert!(SchemaAction::CreateDrop.drops_on_close());
        assert!(!SchemaAction::Create.drops_on_close());
        assert!(SchemaAction::parse("drop-create").is_err());
    }

    #[test]
    fn test_managed_tables_order() {
        let export = SchemaExport::new(Dialect::Sqlite, vec![note(true)]);
        assert_eq!(export.managed_tables(), vec!["revinfo", "note", "note_aud"]);
        assert_eq!(
            export.drop_statements(),
            vec![
                "DROP TABLE IF EXISTS \"note_aud\"",
                "DROP TABLE IF EXISTS \"note\"",
                "DROP TABLE IF EXISTS \"revinfo\"",
            ]
        );
    }

    #[test]
    fn test_unaudited_schema_has_no_revinfo() {
        let export = SchemaExport::new(Dialect::Sqlite, vec![note(false)]);
        assert_eq!(export.managed_tables(), vec!["note"]);
    }

    #[test]
    fn test_create_wipes_existing_rows() {
        let conn = memory();
        let export = SchemaExport::new(Dialect::Sqlite, vec![note(true)]);
        export.create(&conn).unwrap();
        conn.execute("INSERT INTO note (body) VALUES (?1)", &[Value::from("hi")])
            .unwrap();

        export.execute(SchemaAction::CreateDrop, &conn).unwrap();
        assert!(conn.query("SELECT * FROM note", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_update_keeps_existing_rows() {
        let conn = memory();
        let export = SchemaExport::new(Dialect::Sqlite, vec![note(false)]);
        export.create(&conn).unwrap();
        conn.execute("INSERT INTO note (body) VALUES (?1)", &[Value::from("hi")])
            .unwrap();

        export.execute(SchemaAction::Update, &conn).unwrap();
        assert_eq!(conn.query("SELECT * FROM note", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_validate_reports_missing_table() {
        let conn = memory();
        let export = SchemaExport::new(Dialect::Sqlite, vec![note(false)]);
        let err = export.execute(SchemaAction::Validate, &conn).unwrap_err();
        assert_eq!(err, Error::Schema("missing table `note`".to_string()));

        export.create(&conn).unwrap();
        export.validate(&conn).unwrap();
    }

    #[test]
    fn test_validate_reports_missing_column() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE note (id INTEGER PRIMARY KEY)").unwrap();
        let export = SchemaExport::new(Dialect::Sqlite, vec![note(false)]);
        let err = export.validate(&conn).unwrap_err();
        assert!(err.to_string().contains("body"));
    }

    #[test]
    fn test_drop_removes_tables() {
        let conn = memory();
        let export = SchemaExport::new(Dialect::Sqlite, vec![note(true)]);
        export.create(&conn).unwrap();
        export.drop(&conn).unwrap();
        assert!(!conn.table_exists("note").unwrap());
        assert!(!conn.table_exists("revinfo").unwrap());
    }
}
