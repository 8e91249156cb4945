//! Result rows and typed column access.

use chrono::NaiveDateTime;
use sqlmig_core::MigrateError;

use crate::value::Value;

/// A single row returned by a query.
///
/// Columns can be accessed by name or by index with typed conversion via
/// [`FromValue`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist or the value cannot be
    /// converted to the requested type.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, MigrateError> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                MigrateError::DatabaseError(format!("Column '{column}' not found in row"))
            })?;
        T::from_value(&self.values[idx])
    }

    /// Gets a typed value by column index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds or the value cannot be
    /// converted to the requested type.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> Result<T, MigrateError> {
        let value = self.values.get(idx).ok_or_else(|| {
            MigrateError::DatabaseError(format!(
                "Column index {idx} out of range (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }
}

/// Conversion from a dynamic [`Value`] into a concrete Rust type.
pub trait FromValue: Sized {
    /// Performs the conversion.
    fn from_value(value: &Value) -> Result<Self, MigrateError>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::String(s) => s.trim().parse().map_err(|e| {
                MigrateError::DatabaseError(format!("Expected Int, got {s:?}: {e}"))
            }),
            _ => Err(MigrateError::DatabaseError(format!(
                "Expected Int, got {value:?}"
            ))),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(MigrateError::DatabaseError(format!(
                "Expected Bool, got {value:?}"
            ))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Bytes(b) => String::from_utf8(b.clone()).map_err(|e| {
                MigrateError::DatabaseError(format!("Expected UTF-8 text: {e}"))
            }),
            _ => Err(MigrateError::DatabaseError(format!(
                "Expected String, got {value:?}"
            ))),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::DateTime(dt) => Ok(*dt),
            Value::String(s) => parse_timestamp(s),
            _ => Err(MigrateError::DatabaseError(format!(
                "Expected DateTime, got {value:?}"
            ))),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, MigrateError> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

/// Parses a timestamp stored as text.
///
/// Accepts a space or `T` separator, optional fractional seconds, and an
/// optional trailing UTC offset (which is dropped after conversion to UTC).
fn parse_timestamp(s: &str) -> Result<NaiveDateTime, MigrateError> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = chrono::DateTime::parse_from_str(s, fmt) {
            return Ok(dt.naive_utc());
        }
    }
    Err(MigrateError::DatabaseError(format!(
        "Cannot parse timestamp {s:?}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_row() -> Row {
        Row::new(
            vec!["id".into(), "applied_at".into(), "n".into()],
            vec![
                Value::from("1_init.sql"),
                Value::from("2024-01-02 03:04:05.123456"),
                Value::Null,
            ],
        )
    }

    #[test]
    fn test_row_get_by_name() {
        let row = sample_row();
        assert_eq!(row.get::<String>("id").unwrap(), "1_init.sql");
        assert_eq!(row.len(), 3);
        assert!(!row.is_empty());
    }

    #[test]
    fn test_row_get_missing_column() {
        let row = sample_row();
        assert!(row.get::<String>("nope").is_err());
    }

    #[test]
    fn test_row_get_by_index_out_of_range() {
        let row = sample_row();
        assert!(row.get_by_index::<String>(9).is_err());
    }

    #[test]
    fn test_row_get_optional_null() {
        let row = sample_row();
        assert_eq!(row.get::<Option<i64>>("n").unwrap(), None);
    }

    #[test]
    fn test_timestamp_from_text() {
        let row = sample_row();
        let dt: NaiveDateTime = row.get("applied_at").unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 123_456)
            .unwrap();
        assert_eq!(dt, expected);
    }

    #[test]
    fn test_timestamp_variants() {
        assert!(parse_timestamp("2024-01-02 03:04:05").is_ok());
        assert!(parse_timestamp("2024-01-02T03:04:05.5").is_ok());
        assert!(parse_timestamp("2024-01-02 03:04:05+00:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_int_from_text() {
        assert_eq!(i64::from_value(&Value::from("7")).unwrap(), 7);
        assert!(i64::from_value(&Value::from("x")).is_err());
    }

    #[test]
    #[should_panic(expected = "Row column count must match value count")]
    fn test_row_new_mismatch_panics() {
        let _ = Row::new(vec!["a".into()], vec![]);
    }
}
