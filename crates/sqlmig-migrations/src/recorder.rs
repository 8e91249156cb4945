//! The bookkeeping table.
//!
//! [`MigrationRecorder`] owns the name of the table that records applied
//! migrations and generates the dialect-specific SQL to create, read, and
//! update it. One row per applied migration; a row's presence is the only
//! record that the migration was applied.

use chrono::{NaiveDateTime, Timelike};
use sqlmig_core::settings::DEFAULT_TABLE_NAME;
use sqlmig_core::{MigrateError, MigrateResult};
use sqlmig_db_backends::{DatabaseBackend, Dialect, Value};

use crate::migration::MigrationRecord;

const ID_COLUMN: &str = "id";
const APPLIED_AT_COLUMN: &str = "applied_at";

/// Reads and writes the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecorder {
    table: String,
    schema: Option<String>,
    limit_time_precision: bool,
}

impl Default for MigrationRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_NAME)
    }
}

impl MigrationRecorder {
    /// Creates a recorder for `table` in the default schema.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: None,
            limit_time_precision: false,
        }
    }

    /// Places the table in `schema`.
    #[must_use]
    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema.filter(|s| !s.is_empty());
        self
    }

    /// Truncates `applied_at` to whole seconds.
    #[must_use]
    pub fn with_limit_time_precision(mut self, limit: bool) -> Self {
        self.limit_time_precision = limit;
        self
    }

    /// The table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The schema, if any.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    fn qualified(&self, dialect: &dyn Dialect) -> String {
        dialect.quote_qualified_table(self.schema(), &self.table)
    }

    // ── SQL generation ───────────────────────────────────────────────

    /// Returns the SQL to create the table if it does not exist.
    pub fn create_table_sql(&self, dialect: &dyn Dialect) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {} NOT NULL PRIMARY KEY, {} {})",
            self.qualified(dialect),
            dialect.quote_identifier(ID_COLUMN),
            dialect.key_column_type(),
            dialect.quote_identifier(APPLIED_AT_COLUMN),
            dialect.timestamp_column_type(),
        )
    }

    /// Returns the SQL that records a migration as applied.
    pub fn record_applied_sql(&self, dialect: &dyn Dialect) -> String {
        format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            self.qualified(dialect),
            dialect.quote_identifier(ID_COLUMN),
            dialect.quote_identifier(APPLIED_AT_COLUMN),
            dialect.placeholder(1),
            dialect.placeholder(2),
        )
    }

    /// Returns the SQL that removes a migration's record.
    pub fn record_unapplied_sql(&self, dialect: &dyn Dialect) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.qualified(dialect),
            dialect.quote_identifier(ID_COLUMN),
            dialect.placeholder(1),
        )
    }

    /// Returns the SQL that lists every record ordered by id.
    pub fn select_records_sql(&self, dialect: &dyn Dialect) -> String {
        format!(
            "SELECT {id}, {applied_at} FROM {table} ORDER BY {id} ASC",
            id = dialect.quote_identifier(ID_COLUMN),
            applied_at = dialect.quote_identifier(APPLIED_AT_COLUMN),
            table = self.qualified(dialect),
        )
    }

    /// Parameters for [`record_applied_sql`](Self::record_applied_sql).
    pub fn record_applied_params(&self, id: &str, applied_at: NaiveDateTime) -> Vec<Value> {
        let applied_at = if self.limit_time_precision {
            applied_at.with_nanosecond(0).unwrap_or(applied_at)
        } else {
            applied_at
        };
        vec![Value::from(id), Value::DateTime(applied_at)]
    }

    // ── Async database operations ────────────────────────────────────

    /// Ensures the table exists.
    pub async fn ensure_table(&self, backend: &dyn DatabaseBackend) -> MigrateResult<()> {
        backend
            .execute(&self.create_table_sql(backend.dialect()), &[])
            .await?;
        Ok(())
    }

    /// Reads every record, ordered by id ascending (string order).
    pub async fn records(&self, backend: &dyn DatabaseBackend) -> MigrateResult<Vec<MigrationRecord>> {
        let rows = backend
            .query(&self.select_records_sql(backend.dialect()), &[])
            .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get(ID_COLUMN).map_err(|_| {
                    MigrateError::DatabaseError(format!("Missing '{ID_COLUMN}' column"))
                })?;
                let applied_at: NaiveDateTime = row.get(APPLIED_AT_COLUMN).map_err(|e| {
                    MigrateError::DatabaseError(format!(
                        "Bad '{APPLIED_AT_COLUMN}' value for {id}: {e}"
                    ))
                })?;
                Ok(MigrationRecord { id, applied_at })
            })
            .collect()
    }

    /// Reads the ids of every applied migration.
    pub async fn applied_ids(&self, backend: &dyn DatabaseBackend) -> MigrateResult<Vec<String>> {
        Ok(self
            .records(backend)
            .await?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }
}
