//! SQL dialects.
//!
//! A [`Dialect`] is the small set of engine-specific formatting rules the
//! migration engine needs: identifier quoting, schema-qualified table names,
//! parameter placeholders, and the column types used by the bookkeeping and
//! lock tables. There is one value per supported engine, looked up by name
//! with [`dialect_for`].

use std::fmt;

use sqlmig_core::{MigrateError, MigrateResult};

/// Engine-specific SQL formatting capabilities.
pub trait Dialect: fmt::Debug + Send + Sync {
    /// Canonical dialect name (`sqlite3`, `postgres`, `mysql`).
    fn name(&self) -> &'static str;

    /// Quotes a single identifier, doubling any embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quotes a table name, qualified by `schema` when one is given.
    fn quote_qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema.filter(|s| !s.is_empty()) {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// Whether the cooperative lock may be used with this engine.
    ///
    /// Engines that serialize every write through one file have no
    /// inter-process contention for the lock to arbitrate.
    fn supports_concurrent_lock(&self) -> bool {
        true
    }

    /// Placeholder for the `n`th (1-based) statement parameter.
    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    /// Column type for the bookkeeping id and the lock key.
    fn key_column_type(&self) -> &'static str {
        "TEXT"
    }

    /// Column type for `applied_at` and `acquired_at`.
    fn timestamp_column_type(&self) -> &'static str {
        "TIMESTAMP"
    }

    /// Statement that creates `schema` if missing, or `None` when the engine
    /// has no separate schema namespace.
    fn create_schema_sql(&self, _schema: &str) -> Option<String> {
        None
    }
}

/// `SQLite` (`sqlite3`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite3"
    }

    fn quote_qualified_table(&self, _schema: Option<&str>, table: &str) -> String {
        // Schemas are attached databases in SQLite; the table name stands alone.
        self.quote_identifier(table)
    }

    fn supports_concurrent_lock(&self) -> bool {
        false
    }
}

/// `PostgreSQL` (`postgres`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn create_schema_sql(&self, schema: &str) -> Option<String> {
        Some(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            self.quote_identifier(schema)
        ))
    }
}

/// `MySQL` (`mysql`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn key_column_type(&self) -> &'static str {
        // TEXT columns cannot carry a key without a prefix length.
        "VARCHAR(255)"
    }

    fn timestamp_column_type(&self) -> &'static str {
        "DATETIME(6)"
    }
}

static SQLITE: SqliteDialect = SqliteDialect;
static POSTGRES: PostgresDialect = PostgresDialect;
static MYSQL: MySqlDialect = MySqlDialect;

/// Looks up a dialect by name.
///
/// Accepts the canonical names plus common aliases (`sqlite`,
/// `postgresql`); matching is case-insensitive.
///
/// # Errors
///
/// Returns [`MigrateError::ConfigurationError`] for an unknown name.
///
/// # Examples
///
/// ```
/// use sqlmig_db_backends::dialect_for;
///
/// let dialect = dialect_for("postgresql").unwrap();
/// assert_eq!(dialect.name(), "postgres");
/// assert_eq!(dialect.placeholder(2), "$2");
/// assert!(dialect_for("oracle").is_err());
/// ```
pub fn dialect_for(name: &str) -> MigrateResult<&'static dyn Dialect> {
    match name.trim().to_ascii_lowercase().as_str() {
        "sqlite3" | "sqlite" => Ok(&SQLITE),
        "postgres" | "postgresql" => Ok(&POSTGRES),
        "mysql" => Ok(&MYSQL),
        other => Err(MigrateError::ConfigurationError(format!(
            "Unknown dialect: {other}"
        ))),
    }
}
