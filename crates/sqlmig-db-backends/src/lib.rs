//! # sqlmig-db-backends
//!
//! Database access for sqlmig. Provides the [`DatabaseBackend`] and
//! [`Transaction`] traits the migration engine runs against, the
//! [`Dialect`] capability used to format identifiers and DDL, and driver
//! implementations for multiple database engines.
//!
//! Supported backends (each behind a cargo feature):
//! - `PostgreSQL` (`postgres`)
//! - `MySQL` (`mysql`)
//! - `SQLite` (`sqlite`)

pub mod base;
pub mod dialect;
pub mod row;
pub mod value;

mod in_flight;

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgresql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use base::{connect, DatabaseBackend, Transaction};
pub use dialect::{dialect_for, Dialect, MySqlDialect, PostgresDialect, SqliteDialect};
pub use row::{FromValue, Row};
pub use value::Value;

#[cfg(feature = "mysql")]
pub use mysql::MySqlBackend;
#[cfg(feature = "postgres")]
pub use postgresql::PostgresBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
