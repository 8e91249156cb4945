//! PostgreSQL database backend using `tokio-postgres` and `deadpool-postgres`.
//!
//! This module provides the [`PostgresBackend`] which implements the
//! [`DatabaseBackend`](crate::base::DatabaseBackend) trait using connection
//! pooling via `deadpool-postgres`. A transaction checks one client out of
//! the pool and keeps it until commit or rollback.
//!
//! While a statement or transaction is active its client's cancel token is
//! registered with the backend, and [`DatabaseBackend::interrupt`] sends a
//! cancel request for each one over a separate connection.

use std::sync::Arc;

use sqlmig_core::{MigrateError, MigrateResult};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::CancelToken;

use crate::base::{DatabaseBackend, Transaction};
use crate::dialect::{Dialect, PostgresDialect};
use crate::in_flight::{InFlight, InFlightGuard};
use crate::row::Row;
use crate::value::Value;

/// Maximum pooled connections per backend.
const POOL_SIZE: usize = 4;

static DIALECT: PostgresDialect = PostgresDialect;

/// A PostgreSQL database backend.
///
/// Uses `deadpool-postgres` for connection pooling and `tokio-postgres` for
/// query execution.
pub struct PostgresBackend {
    pool: deadpool_postgres::Pool,
    /// Cancel tokens of the clients currently running statements.
    in_flight: Arc<InFlight<CancelToken>>,
}

impl PostgresBackend {
    /// Creates a new `PostgresBackend` from a `deadpool-postgres` pool.
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self {
            pool,
            in_flight: InFlight::new(),
        }
    }

    /// Creates a new backend from a libpq-style connection string
    /// (`host=... dbname=...`) or a `postgres://` URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the datasource cannot be parsed or the pool
    /// cannot be created.
    pub fn from_datasource(datasource: &str) -> Result<Self, MigrateError> {
        let mut pg_config = deadpool_postgres::Config::new();
        pg_config.url = Some(datasource.to_string());
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(POOL_SIZE));

        let pool = pg_config
            .create_pool(
                Some(deadpool_postgres::Runtime::Tokio1),
                tokio_postgres::NoTls,
            )
            .map_err(|e| {
                MigrateError::OperationalError(format!("Invalid PostgreSQL datasource: {e}"))
            })?;

        Ok(Self::new(pool))
    }

    async fn client(&self) -> MigrateResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::OperationalError(format!("Pool error: {e}")))
    }

    /// Converts `Value` parameters to `tokio-postgres` parameters.
    fn value_to_sql_params(params: &[Value]) -> Vec<Box<dyn ToSql + Sync + Send>> {
        params
            .iter()
            .map(|v| -> Box<dyn ToSql + Sync + Send> {
                match v {
                    Value::Null => Box::new(Option::<String>::None),
                    Value::Bool(b) => Box::new(*b),
                    Value::Int(i) => Box::new(*i),
                    Value::Float(f) => Box::new(*f),
                    Value::String(s) => Box::new(s.clone()),
                    Value::Bytes(b) => Box::new(b.clone()),
                    Value::DateTime(dt) => Box::new(*dt),
                }
            })
            .collect()
    }

    /// Converts a `tokio_postgres::Row` to our generic `Row`.
    fn convert_row(pg_row: &tokio_postgres::Row) -> Row {
        let columns: Vec<String> = pg_row
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .enumerate()
            .map(|(i, col)| {
                use tokio_postgres::types::Type;
                match *col.type_() {
                    Type::BOOL => pg_row
                        .try_get::<_, Option<bool>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Bool),
                    Type::INT2 => pg_row
                        .try_get::<_, Option<i16>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                    Type::INT4 => pg_row
                        .try_get::<_, Option<i32>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, |v| Value::Int(i64::from(v))),
                    Type::INT8 => pg_row
                        .try_get::<_, Option<i64>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Int),
                    Type::FLOAT4 => pg_row
                        .try_get::<_, Option<f32>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, |v| Value::Float(f64::from(v))),
                    Type::FLOAT8 => pg_row
                        .try_get::<_, Option<f64>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Float),
                    Type::BYTEA => pg_row
                        .try_get::<_, Option<Vec<u8>>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::Bytes),
                    Type::TIMESTAMP => pg_row
                        .try_get::<_, Option<chrono::NaiveDateTime>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::DateTime),
                    Type::TIMESTAMPTZ => pg_row
                        .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, |dt| Value::DateTime(dt.naive_utc())),
                    _ => pg_row
                        .try_get::<_, Option<String>>(i)
                        .ok()
                        .flatten()
                        .map_or(Value::Null, Value::String),
                }
            })
            .collect();

        Row::new(columns, values)
    }
}

/// Maps a `tokio-postgres` error onto the sqlmig taxonomy.
fn map_pg_error(e: &tokio_postgres::Error) -> MigrateError {
    match e.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => {
            MigrateError::IntegrityError(format!("{e}"))
        }
        Some(code) if *code == SqlState::QUERY_CANCELED => MigrateError::Cancelled(format!("{e}")),
        None if e.is_closed() => MigrateError::OperationalError(format!("{e}")),
        _ => MigrateError::DatabaseError(format!("{e}")),
    }
}

/// Runs one statement on `client`. Parameterless text uses the simple query
/// protocol so any statement kind (and multi-statement text) is accepted.
async fn run_statement(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> MigrateResult<u64> {
    if params.is_empty() {
        client.batch_execute(sql).await.map_err(|e| map_pg_error(&e))?;
        return Ok(0);
    }
    let sql_params = PostgresBackend::value_to_sql_params(params);
    let param_refs: Vec<&(dyn ToSql + Sync)> = sql_params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    client
        .execute(sql, &param_refs)
        .await
        .map_err(|e| map_pg_error(&e))
}

async fn run_query(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[Value],
) -> MigrateResult<Vec<Row>> {
    let sql_params = PostgresBackend::value_to_sql_params(params);
    let param_refs: Vec<&(dyn ToSql + Sync)> = sql_params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();
    let rows = client
        .query(sql, &param_refs)
        .await
        .map_err(|e| map_pg_error(&e))?;
    Ok(rows.iter().map(PostgresBackend::convert_row).collect())
}

#[async_trait::async_trait]
impl DatabaseBackend for PostgresBackend {
    fn vendor(&self) -> &str {
        "postgresql"
    }

    fn dialect(&self) -> &'static dyn Dialect {
        &DIALECT
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        let client = self.client().await?;
        let _in_flight = self.in_flight.register(client.cancel_token());
        run_statement(&client, sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        let client = self.client().await?;
        let _in_flight = self.in_flight.register(client.cancel_token());
        run_query(&client, sql, params).await
    }

    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>> {
        let client = self.client().await?;
        let in_flight = self.in_flight.register(client.cancel_token());
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(Box::new(PostgresTransaction {
            client: Some(client),
            _in_flight: in_flight,
        }))
    }

    fn interrupt(&self) {
        let tokens = self.in_flight.snapshot();
        if tokens.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        tracing::debug!(count = tokens.len(), "cancelling in-flight PostgreSQL statements");
        for token in tokens {
            handle.spawn(async move {
                if let Err(e) = token.cancel_query(tokio_postgres::NoTls).await {
                    tracing::warn!("PostgreSQL cancel request failed: {e}");
                }
            });
        }
    }
}

/// A transaction on a pooled PostgreSQL client.
pub struct PostgresTransaction {
    client: Option<deadpool_postgres::Object>,
    /// Keeps the client's cancel token registered until the transaction ends.
    _in_flight: InFlightGuard<CancelToken>,
}

impl PostgresTransaction {
    fn client(&self) -> MigrateResult<&deadpool_postgres::Object> {
        self.client.as_ref().ok_or_else(|| {
            MigrateError::DatabaseError("PostgreSQL transaction is no longer usable".to_string())
        })
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> MigrateResult<()> {
        let client = self.client.take().ok_or_else(|| {
            MigrateError::DatabaseError("PostgreSQL transaction is no longer usable".to_string())
        })?;
        client
            .batch_execute(statement)
            .await
            .map_err(|e| map_pg_error(&e))
    }
}

#[async_trait::async_trait]
impl Transaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        run_statement(self.client()?, sql, params).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
        run_query(self.client()?, sql, params).await
    }

    async fn commit(self: Box<Self>) -> MigrateResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> MigrateResult<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        // An abandoned transaction must not go back to the pool still open.
        if let Some(client) = self.client.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute("ROLLBACK").await {
                        tracing::warn!("rollback of abandoned PostgreSQL transaction failed: {e}");
                    }
                });
            }
        }
    }
}
