//! Revision auditing.
//!
//! [`AuditEventListener`] records every change to an audited entity in the
//! entity's `<table>_aud` table. Changes made in one transaction share a single
//! revision row in `revinfo`, created lazily on the first audited change.
//!
//! When one instance changes several times within a revision the audit row is
//! merged, so each (id, revision) pair has exactly one row:
//!
//! | recorded | new    | result           |
//! |----------|--------|------------------|
//! | add      | modify | add, new state   |
//! | add      | delete | row removed      |
//! | modify   | modify | modify, new state|
//! | modify   | delete | delete           |
//! | delete   | add    | modify           |

use std::time::{SystemTime, UNIX_EPOCH};

use hiberlite_core::{Result, Value, quote_ident};
use hiberlite_schema::{REV_COLUMN, REVINFO_TABLE, REVTSTMP_COLUMN, REVTYPE_COLUMN, audit_table_name};

use crate::events::{EntityEvent, EventListener, EventSource, EventType};

/// Kind of change stored in the `revtype` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionType {
    /// Row was created.
    Add = 0,
    /// Row was modified.
    Modify = 1,
    /// Row was deleted.
    Delete = 2,
}

impl RevisionType {
    /// Stored value.
    pub const fn code(self) -> i64 {
        self as i64
    }

    /// Inverse of [`RevisionType::code`].
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(RevisionType::Add),
            1 => Some(RevisionType::Modify),
            2 => Some(RevisionType::Delete),
            _ => None,
        }
    }

    /// Revision type for an entity event; `None` for collection events.
    pub const fn for_event(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::PostInsert => Some(RevisionType::Add),
            EventType::PostUpdate => Some(RevisionType::Modify),
            EventType::PostDelete => Some(RevisionType::Delete),
            EventType::PreCollectionUpdate
            | EventType::PreCollectionRemove
            | EventType::PostCollectionRecreate => None,
        }
    }

    /// Merge a second change of the same instance into the same revision.
    ///
    /// `None` means the audit row must be removed.
    pub const fn merge(recorded: Self, new: Self) -> Option<Self> {
        match (recorded, new) {
            (RevisionType::Add, RevisionType::Delete) => None,
            (RevisionType::Add, _) => Some(RevisionType::Add),
            (RevisionType::Delete, RevisionType::Add | RevisionType::Modify) => Some(RevisionType::Modify),
            (_, new) => Some(new),
        }
    }
}

/// Writes audit rows for audited entities.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditEventListener;

impl AuditEventListener {
    /// Name used in listener settings.
    pub const NAME: &'static str = "audit";

    fn revision(source: &mut EventSource<'_>) -> Result<i64> {
        if let Some(rev) = source.current_revision() {
            return Ok(rev);
        }
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1)",
            quote_ident(REVINFO_TABLE),
            quote_ident(REVTSTMP_COLUMN)
        );
        let rev = source.connection().insert(&sql, &[Value::BigInt(timestamp)])?;
        tracing::debug!(revision = rev, "Created audit revision");
        source.set_current_revision(rev);
        Ok(rev)
    }

    fn key_clause(event: &EntityEvent<'_>, first_param: usize) -> (String, Vec<Value>) {
        let pk_columns: Vec<&str> = event
            .fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.column_name)
            .collect();
        let mut clauses: Vec<String> = pk_columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ?{}", quote_ident(c), first_param + i))
            .collect();
        clauses.push(format!(
            "{} = ?{}",
            quote_ident(REV_COLUMN),
            first_param + pk_columns.len()
        ));
        (clauses.join(" AND "), event.id.to_vec())
    }

    fn recorded(event: &EntityEvent<'_>, source: &EventSource<'_>, table: &str, rev: i64) -> Result<Option<RevisionType>> {
        let (clause, mut params) = Self::key_clause(event, 1);
        params.push(Value::BigInt(rev));
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            quote_ident(REVTYPE_COLUMN),
            quote_ident(table),
            clause
        );
        let rows = source.connection().query(&sql, &params)?;
        Ok(rows
            .first()
            .and_then(|r| r.get(0))
            .and_then(Value::as_i64)
            .and_then(RevisionType::from_code))
    }

    fn remove(event: &EntityEvent<'_>, source: &EventSource<'_>, table: &str, rev: i64) -> Result<()> {
        let (clause, mut params) = Self::key_clause(event, 1);
        params.push(Value::BigInt(rev));
        let sql = format!("DELETE FROM {} WHERE {}", quote_ident(table), clause);
        source.connection().execute(&sql, &params)?;
        Ok(())
    }

    fn write(
        event: &EntityEvent<'_>,
        source: &EventSource<'_>,
        table: &str,
        rev: i64,
        revtype: RevisionType,
    ) -> Result<()> {
        let mut columns = Vec::new();
        let mut params = Vec::new();
        for field in event.fields.iter().filter(|f| f.is_audited()) {
            columns.push(quote_ident(field.column_name));
            // deletes keep only the identifier
            let value = if revtype == RevisionType::Delete && !field.primary_key {
                Value::Null
            } else {
                event.value(field.column_name).cloned().unwrap_or_default()
            };
            params.push(value);
        }
        columns.push(quote_ident(REV_COLUMN));
        params.push(Value::BigInt(rev));
        columns.push(quote_ident(REVTYPE_COLUMN));
        params.push(Value::BigInt(revtype.code()));

        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        source.connection().execute(&sql, &params)?;
        Ok(())
    }
}

impl EventListener for AuditEventListener {
    fn on_event(&self, event: &EntityEvent<'_>, source: &mut EventSource<'_>) -> Result<()> {
        if !event.audited {
            return Ok(());
        }
        // no collection mappings, so there is nothing to audit for collection events
        let Some(new) = RevisionType::for_event(event.event_type) else {
            return Ok(());
        };

        let rev = Self::revision(source)?;
        let table = audit_table_name(event.table);

        let revtype = match Self::recorded(event, source, &table, rev)? {
            Some(recorded) => RevisionType::merge(recorded, new),
            None => Some(new),
        };

        tracing::debug!(
            entity = event.entity_name,
            revision = rev,
            revtype = ?revtype,
            "Auditing change"
        );

        match revtype {
            Some(revtype) => Self::write(event, source, &table, rev, revtype),
            None => Self::remove(event, source, &table, rev),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TransactionState;
    use hiberlite_core::{EntityDescriptor, FieldInfo, SqlType};
    use hiberlite_schema::{Dialect, SchemaExport};
    use hiberlite_sqlite::{DatabaseUrl, PhysicalConnection};

    static FIELDS: [FieldInfo; 3] = [
        FieldInfo::new("id", "id", SqlType::BigInt)
            .primary_key(true)
            .auto_increment(true),
        FieldInfo::new("name", "name", SqlType::Text),
        FieldInfo::new("secret", "secret", SqlType::Text)
            .nullable(true)
            .not_audited(true),
    ];

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor {
            primary_key: &["id"],
            fields: &FIELDS,
            audited: true,
            ..EntityDescriptor::declared("Person", "app::domain")
                .entity(true)
                .table("person")
        }
    }

    fn setup() -> PhysicalConnection {
        let conn = PhysicalConnection::open(&DatabaseUrl::Memory).unwrap();
        SchemaExport::new(Dialect::Sqlite, vec![descriptor()])
            .create(&conn)
            .unwrap();
        conn
    }

    fn fire(conn: &PhysicalConnection, tx: &mut TransactionState, event_type: EventType, name: &str) {
        let id = [Value::BigInt(1)];
        let state = [
            ("id", Value::BigInt(1)),
            ("name", Value::from(name)),
            ("secret", Value::from("hidden")),
        ];
        let event = EntityEvent {
            event_type,
            entity_name: "Person",
            table: "person",
            audited: true,
            fields: &FIELDS,
            id: &id,
            state: &state,
        };
        let mut source = EventSource::new(conn, tx);
        AuditEventListener.on_event(&event, &mut source).unwrap();
    }

    fn audit_rows(conn: &PhysicalConnection) -> Vec<(i64, i64, Option<String>)> {
        conn.query("SELECT rev, revtype, name FROM person_aud ORDER BY rev", &[])
            .unwrap()
            .iter()
            .map(|r| {
                (
                    r.get_as::<i64>("rev").unwrap(),
                    r.get_as::<i64>("revtype").unwrap(),
                    r.get_as::<Option<String>>("name").unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_merge_table() {
        use RevisionType::{Add, Delete, Modify};
        assert_eq!(RevisionType::merge(Add, Modify), Some(Add));
        assert_eq!(RevisionType::merge(Add, Delete), None);
        assert_eq!(RevisionType::merge(Modify, Modify), Some(Modify));
        assert_eq!(RevisionType::merge(Modify, Delete), Some(Delete));
        assert_eq!(RevisionType::merge(Delete, Add), Some(Modify));
    }

    #[test]
    fn test_one_revision_per_transaction() {
        let conn = setup();
        let mut tx = TransactionState::default();
        fire(&conn, &mut tx, EventType::PostInsert, "Ada");
        tx.reset();
        fire(&conn, &mut tx, EventType::PostUpdate, "Ada L.");
        tx.reset();
        fire(&conn, &mut tx, EventType::PostDelete, "Ada L.");

        assert_eq!(
            audit_rows(&conn),
            vec![
                (1, 0, Some("Ada".to_string())),
                (2, 1, Some("Ada L.".to_string())),
                (3, 2, None),
            ]
        );
        assert_eq!(conn.query("SELECT * FROM revinfo", &[]).unwrap().len(), 3);
    }

    #[test]
    fn test_changes_in_one_revision_are_merged() {
        let conn = setup();
        let mut tx = TransactionState::default();
        fire(&conn, &mut tx, EventType::PostInsert, "Ada");
        fire(&conn, &mut tx, EventType::PostUpdate, "Grace");
        assert_eq!(audit_rows(&conn), vec![(1, 0, Some("Grace".to_string()))]);

        fire(&conn, &mut tx, EventType::PostDelete, "Grace");
        assert!(audit_rows(&conn).is_empty());
        assert_eq!(conn.query("SELECT * FROM revinfo", &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_unaudited_columns_and_collection_events_are_skipped() {
        let conn = setup();
        let mut tx = TransactionState::default();
        fire(&conn, &mut tx, EventType::PostCollectionRecreate, "Ada");
        assert!(audit_rows(&conn).is_empty());
        assert_eq!(tx, TransactionState::default());

        fire(&conn, &mut tx, EventType::PostInsert, "Ada");
        let columns = conn.query("PRAGMA table_info(\"person_aud\")", &[]).unwrap();
        assert!(columns.iter().all(|r| r.get_as::<String>("name").unwrap() != "secret"));
    }
}
