//! Base database backend trait and common types.
//!
//! This module defines the [`DatabaseBackend`] trait that all backend
//! implementations must satisfy, the [`Transaction`] trait for a single
//! transaction scope, and [`connect`], which picks a backend by dialect name.

use std::sync::Arc;

use sqlmig_core::{MigrateError, MigrateResult};

use crate::dialect::Dialect;
use crate::row::Row;
use crate::value::Value;

/// A database transaction owning its connection.
///
/// Obtained from [`DatabaseBackend::begin`] and finished with
/// [`commit`](Transaction::commit) or [`rollback`](Transaction::rollback).
/// Dropping an unfinished transaction rolls it back, so a cancelled future
/// never leaves a half-applied step behind.
#[async_trait::async_trait]
pub trait Transaction: Send {
    /// Executes a statement inside the transaction.
    ///
    /// With no parameters the text is sent as-is, so it may be any statement
    /// kind, including ones that return rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> MigrateResult<u64>;

    /// Runs a query inside the transaction.
    async fn query(&mut self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> MigrateResult<()>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> MigrateResult<()>;
}

/// The core trait for database backends.
///
/// Each database engine (PostgreSQL, SQLite, MySQL) implements this trait to
/// provide a uniform interface for executing SQL and opening transactions.
///
/// All methods are async because database operations are inherently I/O-bound.
/// Backends that use synchronous drivers (like `rusqlite`) wrap operations in
/// `spawn_blocking` to maintain the async interface.
#[async_trait::async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Returns the vendor name (e.g., "postgresql", "sqlite", "mysql").
    fn vendor(&self) -> &str;

    /// Returns the SQL dialect of this backend.
    fn dialect(&self) -> &'static dyn Dialect;

    /// Executes a SQL statement outside any explicit transaction.
    ///
    /// Returns the number of rows affected. With no parameters the text is
    /// sent as-is, so it may be any statement kind; drivers that run such
    /// text as a batch report 0 rows for it.
    async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64>;

    /// Executes a SQL query and returns all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>>;

    /// Executes a SQL query and returns exactly one row.
    ///
    /// Returns [`MigrateError::DoesNotExist`] if no rows are returned and
    /// [`MigrateError::DatabaseError`] if more than one row is returned.
    async fn query_one(&self, sql: &str, params: &[Value]) -> MigrateResult<Row> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            0 => Err(MigrateError::DoesNotExist("No rows returned".to_string())),
            1 => Ok(rows.remove(0)),
            n => Err(MigrateError::DatabaseError(format!(
                "Expected 1 row, got {n}"
            ))),
        }
    }

    /// Begins a new transaction on a dedicated connection.
    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>>;

    /// Best-effort abort of the statement currently running on this backend.
    ///
    /// Called after a statement deadline expires. The default does nothing.
    fn interrupt(&self) {}
}

/// Opens a backend for `dialect` connected to `datasource`.
///
/// Pooled backends connect lazily, so connectivity problems surface on the
/// first statement rather than here.
///
/// # Errors
///
/// Returns [`MigrateError::ConfigurationError`] for an unknown dialect or
/// one whose driver was not compiled in, and [`MigrateError::OperationalError`]
/// when the datasource cannot be opened or parsed.
pub fn connect(dialect: &str, datasource: &str) -> MigrateResult<Arc<dyn DatabaseBackend>> {
    let dialect = crate::dialect::dialect_for(dialect)?;
    tracing::debug!(dialect = dialect.name(), "opening database backend");
    match dialect.name() {
        "sqlite3" => connect_sqlite(datasource),
        "postgres" => connect_postgres(datasource),
        "mysql" => connect_mysql(datasource),
        other => Err(MigrateError::ConfigurationError(format!(
            "Unknown dialect: {other}"
        ))),
    }
}

#[cfg(feature = "sqlite")]
fn connect_sqlite(datasource: &str) -> MigrateResult<Arc<dyn DatabaseBackend>> {
    let path = datasource.strip_prefix("file:").unwrap_or(datasource);
    Ok(Arc::new(crate::sqlite::SqliteBackend::open(path)?))
}

#[cfg(not(feature = "sqlite"))]
fn connect_sqlite(_datasource: &str) -> MigrateResult<Arc<dyn DatabaseBackend>> {
    Err(not_compiled("sqlite3", "sqlite"))
}

#[cfg(feature = "postgres")]
fn connect_postgres(datasource: &str) -> MigrateResult<Arc<dyn DatabaseBackend>> {
    Ok(Arc::new(crate::postgresql::PostgresBackend::from_datasource(datasource)?))
}

#[cfg(not(feature = "postgres"))]
fn connect_postgres(_datasource: &str) -> MigrateResult<Arc<dyn DatabaseBackend>> {
    Err(not_compiled("postgres", "postgres"))
}

#[cfg(feature = "mysql")]
fn connect_mysql(datasource: &str) -> MigrateResult<Arc<dyn DatabaseBackend>> {
    Ok(Arc::new(crate::mysql::MySqlBackend::from_url(datasource)?))
}

#[cfg(not(feature = "mysql"))]
fn connect_mysql(_datasource: &str) -> MigrateResult<Arc<dyn DatabaseBackend>> {
    Err(not_compiled("mysql", "mysql"))
}

#[allow(dead_code)]
fn not_compiled(dialect: &str, feature: &str) -> MigrateError {
    MigrateError::ConfigurationError(format!(
        "Dialect '{dialect}' is not available: rebuild with the '{feature}' feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_unknown_dialect() {
        let err = connect("db2", "whatever").err().unwrap();
        assert!(matches!(err, MigrateError::ConfigurationError(_)));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let backend = connect("sqlite3", ":memory:").unwrap();
        assert_eq!(backend.vendor(), "sqlite");
        assert_eq!(backend.dialect().name(), "sqlite3");
        assert_eq!(backend.execute("SELECT 1", &[]).await.unwrap(), 0);
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_query_one_counts() {
        let backend = connect("sqlite", ":memory:").unwrap();
        backend
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();
        assert!(matches!(
            backend.query_one("SELECT id FROM t", &[]).await,
            Err(MigrateError::DoesNotExist(_))
        ));
        backend
            .execute("INSERT INTO t VALUES (1), (2)", &[])
            .await
            .unwrap();
        assert!(backend.query_one("SELECT id FROM t", &[]).await.is_err());
        let row = backend
            .query_one("SELECT count(*) AS n FROM t", &[])
            .await
            .unwrap();
        assert_eq!(row.get::<i64>("n").unwrap(), 2);
    }
}
