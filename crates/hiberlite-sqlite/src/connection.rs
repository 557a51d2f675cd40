//! Physical SQLite connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hiberlite_core::{Error, Result, Row, Value};
use rusqlite::types::Value as SqliteValue;

use crate::logger::SqlStatementLogger;
use crate::url::DatabaseUrl;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One open SQLite connection handed out by a
/// [`ConnectionProvider`](crate::ConnectionProvider).
///
/// Closing is explicit and can only succeed once: closing an already-closed
/// connection is an error, as is using it afterwards.
#[derive(Debug)]
pub struct PhysicalConnection {
    id: u64,
    url: DatabaseUrl,
    inner: Option<rusqlite::Connection>,
    logger: SqlStatementLogger,
}

impl PhysicalConnection {
    /// Open a new connection to `url`.
    pub fn open(url: &DatabaseUrl) -> Result<Self> {
        let conn = match url {
            DatabaseUrl::File(path) => rusqlite::Connection::open(path),
            DatabaseUrl::Memory => rusqlite::Connection::open_in_memory(),
        }
        .map_err(|e| Error::connection(format!("unable to open {url}: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(|e| Error::connection(format!("unable to configure {url}: {e}")))?;

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection = id, url = %url, "Opened physical connection");

        Ok(Self {
            id,
            url: url.clone(),
            inner: Some(conn),
            logger: SqlStatementLogger::default(),
        })
    }

    /// Process-unique id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Where this connection points.
    pub fn url(&self) -> &DatabaseUrl {
        &self.url
    }

    /// Whether `close` has already succeeded.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Replace the statement logger.
    pub fn set_logger(&mut self, logger: SqlStatementLogger) {
        self.logger = logger;
    }

    /// The statement logger in use.
    pub fn logger(&self) -> SqlStatementLogger {
        self.logger
    }

    fn raw(&self) -> Result<&rusqlite::Connection> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::connection(format!("connection #{} is closed", self.id)))
    }

    /// Execute a statement, returning the number of affected rows.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let conn = self.raw()?;
        self.logger.log(sql);
        let affected = conn
            .execute(sql, rusqlite::params_from_iter(params.iter().map(to_sqlite)))
            .map_err(|e| Error::query(sql, e.to_string()))?;
        Ok(affected as u64)
    }

    /// Execute an INSERT, returning the last inserted rowid.
    pub fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.execute(sql, params)?;
        Ok(self.raw()?.last_insert_rowid())
    }

    /// Execute several `;`-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.raw()?;
        self.logger.log(sql);
        conn.execute_batch(sql)
            .map_err(|e| Error::query(sql, e.to_string()))
    }

    /// Run a query and collect all rows.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let conn = self.raw()?;
        self.logger.log(sql);

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::query(sql, e.to_string()))?;
        let columns: Arc<Vec<String>> = Arc::new(
            stmt.column_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        let width = columns.len();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(to_sqlite)))
            .map_err(|e| Error::query(sql, e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::query(sql, e.to_string()))? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                let cell: SqliteValue = row
                    .get(idx)
                    .map_err(|e| Error::query(sql, e.to_string()))?;
                values.push(from_sqlite(cell));
            }
            out.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(out)
    }

    /// Whether a table with this name exists.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let rows = self.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::Text(table.to_string())],
        )?;
        Ok(!rows.is_empty())
    }

    /// Close the connection.
    ///
    /// Fails if the connection is already closed or SQLite refuses to close it
    /// (in which case the connection stays open).
    pub fn close(&mut self) -> Result<()> {
        let conn = self.inner.take().ok_or_else(|| {
            Error::connection(format!("connection #{} is already closed", self.id))
        })?;
        match conn.close() {
            Ok(()) => {
                tracing::debug!(connection = self.id, "Closed physical connection");
                Ok(())
            }
            Err((conn, e)) => {
                self.inner = Some(conn);
                Err(Error::connection(format!(
                    "unable to close connection #{}: {e}",
                    self.id
                )))
            }
        }
    }
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::BigInt(i) => SqliteValue::Integer(*i),
        Value::Double(f) => SqliteValue::Real(*f),
        Value::Text(s) => SqliteValue::Text(s.clone()),
        Value::Bytes(b) => SqliteValue::Blob(b.clone()),
        Value::Json(j) => SqliteValue::Text(j.to_string()),
    }
}

fn from_sqlite(value: SqliteValue) -> Value {
    match value {
        SqliteValue::Null => Value::Null,
        SqliteValue::Integer(i) => Value::BigInt(i),
        SqliteValue::Real(f) => Value::Double(f),
        SqliteValue::Text(s) => Value::Text(s),
        SqliteValue::Blob(b) => Value::Bytes(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> PhysicalConnection {
        PhysicalConnection::open(&DatabaseUrl::Memory).unwrap()
    }

    #[test]
    fn test_roundtrip_through_sqlite() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, flag BOOLEAN)")
            .unwrap();
        let id = conn
            .insert(
                "INSERT INTO t (name, flag) VALUES (?1, ?2)",
                &[Value::from("ada"), Value::Bool(true)],
            )
            .unwrap();
        assert_eq!(id, 1);

        let rows = conn
            .query("SELECT id, name, flag FROM t WHERE id = ?1", &[Value::BigInt(id)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_as::<String>("name").unwrap(), "ada");
        assert!(rows[0].get_as::<bool>("flag").unwrap());
    }

    #[test]
    fn test_execute_reports_affected_rows() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2), (3)")
            .unwrap();
        let affected = conn.execute("DELETE FROM t WHERE v > ?1", &[Value::BigInt(1)]).unwrap();
        assert_eq!(affected, 2);
    }

    #[test]
    fn test_query_error_carries_sql() {
        let conn = memory();
        let err = conn.query("SELECT * FROM missing", &[]).unwrap_err();
        match err {
            Error::Query { sql, .. } => assert_eq!(sql, "SELECT * FROM missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_table_exists() {
        let conn = memory();
        assert!(!conn.table_exists("t").unwrap());
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        assert!(conn.table_exists("t").unwrap());
    }

    #[test]
    fn test_close_twice_fails() {
        let mut conn = memory();
        conn.close().unwrap();
        assert!(conn.is_closed());
        let err = conn.close().unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_use_after_close_fails() {
        let mut conn = memory();
        conn.close().unwrap();
        assert!(conn.execute("SELECT 1", &[]).unwrap_err().is_connection());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = memory();
        let b = memory();
        assert_ne!(a.id(), b.id());
    }
}
