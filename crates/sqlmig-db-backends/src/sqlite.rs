//! SQLite database backend using `rusqlite`.
//!
//! This module provides the [`SqliteBackend`] which implements the
//! [`DatabaseBackend`](crate::base::DatabaseBackend) trait using `rusqlite`
//! wrapped in `tokio::task::spawn_blocking` for async compatibility.
//!
//! Features:
//! - WAL mode and a busy timeout for file databases, so several backends
//!   (or processes) can share one file
//! - In-memory database support via `:memory:` path (great for testing)
//! - Transactions hold the connection mutex for their whole lifetime and
//!   roll back when dropped unfinished
//! - Statement interruption through a `rusqlite` interrupt handle

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sqlmig_core::{MigrateError, MigrateResult};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::base::{DatabaseBackend, Transaction};
use crate::dialect::{Dialect, SqliteDialect};
use crate::row::Row;
use crate::value::{Value, TIMESTAMP_FORMAT};

/// How long a statement waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

static DIALECT: SqliteDialect = SqliteDialect;

/// A SQLite database backend.
///
/// Uses `rusqlite` for database access with a `Mutex`-based concurrency
/// model. All operations are run via `tokio::task::spawn_blocking` to
/// avoid blocking the async runtime.
pub struct SqliteBackend {
    /// The path to the database file (or ":memory:").
    path: PathBuf,
    /// The connection, guarded by an async mutex.
    conn: Arc<Mutex<rusqlite::Connection>>,
    /// Aborts whatever statement the connection is running.
    interrupt: Arc<rusqlite::InterruptHandle>,
}

impl SqliteBackend {
    /// Opens a new SQLite database at the given path.
    ///
    /// If the path is `:memory:`, an in-memory database is created.
    /// WAL journal mode is enabled for file-based databases.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MigrateError> {
        let path = path.into();
        let in_memory = path.to_str() == Some(":memory:");
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| MigrateError::OperationalError(format!("SQLite open failed: {e}")))?;

        conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| {
            MigrateError::OperationalError(format!("Failed to set busy timeout: {e}"))
        })?;
        if !in_memory {
            conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(|e| {
                MigrateError::OperationalError(format!("Failed to set pragmas: {e}"))
            })?;
        }

        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        })
    }

    /// Opens an in-memory database (convenience constructor).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn memory() -> Result<Self, MigrateError> {
        Self::open(":memory:")
    }

    /// Returns the database file path.
    pub const fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Binds `Value` parameters to a `rusqlite` statement.
    fn bind_params(
        stmt: &mut rusqlite::Statement<'_>,
        params: &[Value],
    ) -> Result<(), MigrateError> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::DateTime(dt) => {
                    stmt.raw_bind_parameter(idx, dt.format(TIMESTAMP_FORMAT).to_string())
                }
            }
            .map_err(|e| MigrateError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    /// Converts a `rusqlite::Row` to our generic `Row`.
    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> Row {
        let values: Vec<Value> = (0..column_names.len())
            .map(|i| {
                let val_ref = sqlite_row
                    .get_ref(i)
                    .unwrap_or(rusqlite::types::ValueRef::Null);
                match val_ref {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                    rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                    rusqlite::types::ValueRef::Text(b) => {
                        Value::String(String::from_utf8_lossy(b).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
                }
            })
            .collect();

        Row::new(column_names.to_vec(), values)
    }

    /// Runs one statement and returns the number of rows it changed.
    ///
    /// Parameterless text goes through `execute_batch`, which accepts any
    /// statement kind (DDL, DML, or a `SELECT` whose rows are discarded) and
    /// reports no row count.
    fn run_statement(
        conn: &rusqlite::Connection,
        sql: &str,
        params: &[Value],
    ) -> Result<u64, MigrateError> {
        if params.is_empty() {
            conn.execute_batch(sql).map_err(map_sqlite_error)?;
            return Ok(0);
        }
        let mut stmt = conn.prepare(sql).map_err(map_sqlite_error)?;
        Self::bind_params(&mut stmt, params)?;
        let count = stmt.raw_execute().map_err(map_sqlite_error)?;
        Ok(count as u64)
    }

    /// Runs a query and collects its rows.
    fn run_query(
        conn: &rusqlite::Connection,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, MigrateError> {
        let mut stmt = conn.prepare(sql).map_err(map_sqlite_error)?;

        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows.next().map_err(map_sqlite_error)? {
            rows.push(Self::convert_row(row, &column_names));
        }
        Ok(rows)
    }
}

/// Maps a `rusqlite` error onto the sqlmig taxonomy.
fn map_sqlite_error(e: rusqlite::Error) -> MigrateError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            MigrateError::IntegrityError(format!("{e}"))
        }
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::OperationInterrupted =>
        {
            MigrateError::Cancelled(format!("{e}"))
        }
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::CannotOpen
            ) =>
        {
            MigrateError::OperationalError(format!("{e}"))
        }
        _ => MigrateError::DatabaseError(format!("{e}")),
    }
}

fn join_error(e: &tokio::task::JoinError) -> MigrateError {
    MigrateError::DatabaseError(format!("Task join error: {e}"))
}

#[async_trait::async_trait]
impl DatabaseBackend for SqliteBackend {
    fn vendor(&self) -> &str {
        "sqlite"
    }

    fn dialect(&self) -> &'static dyn Dialect {
        &DIALECT
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            Self::run_statement(&conn, &sql, &params)
        })
        .await
        .map_err(|e| join_error(&e))?
    }

    async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            Self::run_query(&conn, &sql, &params)
        })
        .await
        .map_err(|e| join_error(&e))?
    }

    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>> {
        let guard = self.conn.clone().lock_owned().await;
        let mut tx = SqliteTransaction {
            conn: Some(TxConn(guard)),
        };
        // IMMEDIATE takes the write lock up front so two backends sharing a
        // file cannot deadlock upgrading from a read lock.
        tx.run(|conn| conn.execute_batch("BEGIN IMMEDIATE").map_err(map_sqlite_error))
            .await?;
        Ok(Box::new(tx))
    }

    fn interrupt(&self) {
        self.interrupt.interrupt();
    }
}

/// A connection held for the duration of a transaction.
///
/// Dropping it while a transaction is still open rolls that transaction
/// back, wherever the drop happens (including inside a blocking task whose
/// result nobody awaited).
struct TxConn(OwnedMutexGuard<rusqlite::Connection>);

impl Deref for TxConn {
    type Target = rusqlite::Connection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for TxConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Drop for TxConn {
    fn drop(&mut self) {
        if !self.0.is_autocommit() {
            if let Err(e) = self.0.execute_batch("ROLLBACK") {
                tracing::warn!("rollback of abandoned SQLite transaction failed: {e}");
            }
        }
    }
}

/// A transaction on a [`SqliteBackend`].
pub struct SqliteTransaction {
    conn: Option<TxConn>,
}

impl SqliteTransaction {
    /// Runs `f` against the transaction's connection on a blocking thread.
    async fn run<T, F>(&mut self, f: F) -> MigrateResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> MigrateResult<T> + Send + 'static,
    {
        let conn = self.conn.take().ok_or_else(|| {
            MigrateError::DatabaseError("SQLite transaction is no longer usable".to_string())
        })?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            (conn, result)
        })
        .await
        .map_err(|e| join_error(&e))?;
        self.conn = Some(conn);
        result
    }
}

#[async_trait::async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| SqliteBackend::run_statement(conn, &sql, &params))
            .await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| SqliteBackend::run_query(conn, &sql, &params))
            .await
    }

    async fn commit(mut self: Box<Self>) -> MigrateResult<()> {
        self.run(|conn| conn.execute_batch("COMMIT").map_err(map_sqlite_error))
            .await
    }

    async fn rollback(mut self: Box<Self>) -> MigrateResult<()> {
        if self.conn.is_none() {
            // An abandoned operation still owns the connection; dropping it
            // rolls the transaction back.
            tracing::debug!("SQLite transaction already released, rollback deferred to drop");
            return Ok(());
        }
        self.run(|conn| conn.execute_batch("ROLLBACK").map_err(map_sqlite_error))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_memory_open() {
        let backend = SqliteBackend::memory().unwrap();
        assert_eq!(backend.vendor(), "sqlite");
        assert_eq!(backend.dialect().name(), "sqlite3");
        assert_eq!(backend.path().to_str(), Some(":memory:"));
    }

    #[tokio::test]
    async fn test_sqlite_insert_and_query() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE people (id INTEGER, name TEXT)", &[])
            .await
            .unwrap();

        let changed = backend
            .execute(
                "INSERT INTO people (id, name) VALUES (?, ?)",
                &[Value::from(1), Value::from("Alice")],
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);

        let rows = backend
            .query("SELECT id, name FROM people", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>("name").unwrap(), "Alice");
        assert_eq!(rows[0].get::<i64>("id").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_ddl_reports_no_changes() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();
        backend
            .execute("INSERT INTO t VALUES (1)", &[])
            .await
            .unwrap();
        let changed = backend
            .execute("ALTER TABLE t ADD COLUMN name TEXT", &[])
            .await
            .unwrap();
        assert_eq!(changed, 0);
        let deleted = backend
            .execute("DELETE FROM t WHERE id = ?", &[Value::from(1)])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn test_sqlite_select_as_statement() {
        let backend = SqliteBackend::memory().unwrap();
        assert!(backend.execute("SELECT 0", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_sqlite_unique_violation_is_integrity_error() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE locks (k TEXT UNIQUE)", &[])
            .await
            .unwrap();
        backend
            .execute("INSERT INTO locks (k) VALUES (?)", &[Value::from("a")])
            .await
            .unwrap();
        let err = backend
            .execute("INSERT INTO locks (k) VALUES (?)", &[Value::from("a")])
            .await
            .unwrap_err();
        assert!(err.is_integrity_error());
    }

    #[tokio::test]
    async fn test_sqlite_syntax_error_is_database_error() {
        let backend = SqliteBackend::memory().unwrap();
        let err = backend.execute("SELECT fail", &[]).await.unwrap_err();
        assert!(matches!(err, MigrateError::DatabaseError(_)));
    }

    #[tokio::test]
    async fn test_sqlite_transaction_commit() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.execute("INSERT INTO t VALUES (?)", &[Value::from(1)])
            .await
            .unwrap();
        let inside = tx.query("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(inside.len(), 1);
        tx.commit().await.unwrap();

        let rows = backend.query("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_transaction_rollback() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        tx.rollback().await.unwrap();

        let rows = backend.query("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_transaction_dropped_rolls_back() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();

        {
            let mut tx = backend.begin().await.unwrap();
            tx.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        }

        let rows = backend.query("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
        // The connection is usable for a fresh transaction afterwards.
        let tx = backend.begin().await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_datetime_round_trip_as_text() {
        let backend = SqliteBackend::memory().unwrap();
        backend
            .execute("CREATE TABLE t (at TIMESTAMP)", &[])
            .await
            .unwrap();
        let now = chrono::Utc::now().naive_utc();
        backend
            .execute("INSERT INTO t (at) VALUES (?)", &[Value::from(now)])
            .await
            .unwrap();
        let row = backend
            .query_one("SELECT at FROM t", &[])
            .await
            .unwrap();
        let stored: chrono::NaiveDateTime = row.get("at").unwrap();
        assert_eq!(
            stored.format(TIMESTAMP_FORMAT).to_string(),
            now.format(TIMESTAMP_FORMAT).to_string()
        );
    }

    #[tokio::test]
    async fn test_sqlite_file_shared_between_backends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = SqliteBackend::open(&path).unwrap();
        let b = SqliteBackend::open(&path).unwrap();

        a.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        a.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        let rows = b.query("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
