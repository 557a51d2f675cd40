//! Result rows.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

/// One row of a query result.
///
/// Column names are shared between all rows of the same result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Row {
    /// Create a row from shared column names and its values.
    pub fn new(columns: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Column names, in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no cells.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cell by position.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Cell by column name (case-insensitive, like SQLite identifiers).
    pub fn get_named(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    /// Typed cell by column name.
    pub fn get_as<T: FromValue>(&self, column: &str) -> Result<T> {
        let value = self
            .get_named(column)
            .ok_or_else(|| Error::Mapping(format!("column `{column}` not present in row")))?;
        T::from_value(value)
            .map_err(|e| Error::Mapping(format!("column `{column}`: {e}")))
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new(
            Arc::new(vec!["id".to_string(), "name".to_string()]),
            vec![Value::BigInt(1), Value::Text("Ada".to_string())],
        )
    }

    #[test]
    fn test_get_named_is_case_insensitive() {
        let row = row();
        assert_eq!(row.get_named("NAME"), Some(&Value::Text("Ada".to_string())));
        assert_eq!(row.get(0), Some(&Value::BigInt(1)));
    }

    #[test]
    fn test_get_as_reports_missing_column() {
        let err = row().get_as::<i64>("age").unwrap_err();
        assert!(err.to_string().contains("age"));
    }

    #[test]
    fn test_get_as_typed() {
        let row = row();
        assert_eq!(row.get_as::<i64>("id").unwrap(), 1);
        assert_eq!(row.get_as::<String>("name").unwrap(), "Ada");
    }
}
