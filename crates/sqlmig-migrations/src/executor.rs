//! Migration execution.
//!
//! The [`Executor`] applies a planned sequence of steps in order. Each
//! transactional step runs its statements and its bookkeeping change in one
//! transaction, so either all of it lands or none of it does. A step whose
//! transaction flag is off runs directly against the backend with no such
//! guarantee: a failure halfway leaves the schema and the bookkeeping table
//! out of step.
//!
//! Every statement can be bounded by a per-statement timeout and by an
//! overall deadline. When either expires the in-flight statement is
//! interrupted, the step's transaction is rolled back, and the step counts
//! as failed. Steps committed before it are kept.

use std::time::Duration;

use sqlmig_core::{ApplyError, MigrateError, MigrateResult, TxError};
use sqlmig_db_backends::{DatabaseBackend, Transaction, Value};
use tokio::time::Instant;

use crate::migration::{Direction, PlannedMigration};
use crate::recorder::MigrationRecorder;

/// Where a step's statements run.
///
/// Decided once per step from its transaction flag.
pub enum StepScope<'a> {
    /// Inside a transaction owned by this step.
    Transaction(Box<dyn Transaction>),
    /// Directly against the backend.
    Direct(&'a dyn DatabaseBackend),
}

impl<'a> StepScope<'a> {
    /// Opens the scope for a step.
    pub async fn open(backend: &'a dyn DatabaseBackend, transactional: bool) -> MigrateResult<Self> {
        if transactional {
            Ok(Self::Transaction(backend.begin().await?))
        } else {
            Ok(Self::Direct(backend))
        }
    }

    /// Whether this scope is transactional.
    pub const fn is_transactional(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    /// Executes one statement in this scope.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
        match self {
            Self::Transaction(tx) => tx.execute(sql, params).await,
            Self::Direct(backend) => backend.execute(sql, params).await,
        }
    }

    /// Commits a transactional scope; a no-op for a direct one.
    pub async fn commit(self) -> MigrateResult<()> {
        match self {
            Self::Transaction(tx) => tx.commit().await,
            Self::Direct(_) => Ok(()),
        }
    }

    /// Rolls back a transactional scope; a no-op for a direct one.
    pub async fn rollback(self) -> MigrateResult<()> {
        match self {
            Self::Transaction(tx) => tx.rollback().await,
            Self::Direct(_) => Ok(()),
        }
    }
}

/// Strips one trailing newline, then one trailing space, then one trailing
/// `;`, in that order.
pub fn trim_statement(statement: &str) -> &str {
    let statement = statement.strip_suffix('\n').unwrap_or(statement);
    let statement = statement.strip_suffix(' ').unwrap_or(statement);
    statement.strip_suffix(';').unwrap_or(statement)
}

/// Applies planned migrations against a backend.
pub struct Executor<'a> {
    backend: &'a dyn DatabaseBackend,
    recorder: &'a MigrationRecorder,
    statement_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl<'a> Executor<'a> {
    /// Creates an executor writing bookkeeping rows through `recorder`.
    pub const fn new(backend: &'a dyn DatabaseBackend, recorder: &'a MigrationRecorder) -> Self {
        Self {
            backend,
            recorder,
            statement_timeout: None,
            deadline: None,
        }
    }

    /// Bounds every statement by `timeout`.
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Bounds the whole run by `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Applies every planned step, in order.
    ///
    /// Returns the number of steps committed. On failure the error carries
    /// the number of steps committed before the failing one.
    pub async fn apply_all(&self, planned: &[PlannedMigration]) -> Result<usize, ApplyError> {
        let mut applied = 0;
        for step in planned {
            self.apply_step(step, true)
                .await
                .map_err(|e| ApplyError::new(applied, e))?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Applies at most `max` planned steps (`0` for all of them).
    pub async fn apply_max(
        &self,
        planned: &[PlannedMigration],
        max: usize,
    ) -> Result<usize, ApplyError> {
        let end = if max == 0 {
            planned.len()
        } else {
            max.min(planned.len())
        };
        self.apply_all(&planned[..end]).await
    }

    /// Writes the bookkeeping change for every planned step without running
    /// its statements.
    pub async fn skip(&self, planned: &[PlannedMigration]) -> Result<usize, ApplyError> {
        let mut skipped = 0;
        for step in planned {
            self.apply_step(step, false)
                .await
                .map_err(|e| ApplyError::new(skipped, e))?;
            skipped += 1;
        }
        Ok(skipped)
    }

    async fn apply_step(&self, step: &PlannedMigration, run_statements: bool) -> MigrateResult<()> {
        let mut scope = StepScope::open(self.backend, step.transactional)
            .await
            .map_err(|e| TxError::new(&step.id, e))?;

        match self.run_step(&mut scope, step, run_statements).await {
            Ok(()) => {
                scope
                    .commit()
                    .await
                    .map_err(|e| TxError::new(&step.id, e))?;
                tracing::info!(
                    migration = %step.id,
                    direction = %step.direction,
                    skipped = !run_statements,
                    "applied migration"
                );
                Ok(())
            }
            Err(e) => {
                let transactional = scope.is_transactional();
                let rollback_error = scope.rollback().await.err();
                if let Some(rollback_error) = &rollback_error {
                    tracing::error!(migration = %step.id, "rollback failed: {rollback_error}");
                } else if !transactional {
                    tracing::warn!(
                        migration = %step.id,
                        "non-transactional migration failed part-way; schema and bookkeeping may disagree"
                    );
                }
                Err(TxError::new(&step.id, e)
                    .with_rollback_error(rollback_error)
                    .into())
            }
        }
    }

    async fn run_step(
        &self,
        scope: &mut StepScope<'_>,
        step: &PlannedMigration,
        run_statements: bool,
    ) -> MigrateResult<()> {
        if run_statements {
            for statement in &step.statements {
                let statement = trim_statement(statement);
                if statement.trim().is_empty() {
                    continue;
                }
                tracing::debug!(migration = %step.id, "executing: {statement}");
                self.bounded(scope.execute(statement, &[])).await?;
            }
        }

        let dialect = self.backend.dialect();
        let now = chrono::Utc::now().naive_utc();
        let (sql, params) = match step.direction {
            Direction::Up => (
                self.recorder.record_applied_sql(dialect),
                self.recorder.record_applied_params(&step.id, now),
            ),
            Direction::Down => (
                self.recorder.record_unapplied_sql(dialect),
                vec![Value::from(step.id.as_str())],
            ),
        };
        self.bounded(scope.execute(&sql, &params)).await?;
        Ok(())
    }

    /// The instant the next statement must finish by, if any.
    fn statement_deadline(&self) -> Option<Instant> {
        let from_timeout = self.statement_timeout.map(|t| Instant::now() + t);
        match (from_timeout, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> MigrateResult<T>
    where
        F: std::future::Future<Output = MigrateResult<T>>,
    {
        let Some(deadline) = self.statement_deadline() else {
            return fut.await;
        };
        // The statement future stays alive until after the interrupt, so the
        // backend still knows which connection to cancel.
        tokio::pin!(fut);
        if let Ok(result) = tokio::time::timeout_at(deadline, &mut fut).await {
            result
        } else {
            self.backend.interrupt();
            Err(MigrateError::Cancelled(
                "statement did not finish before its deadline".to_string(),
            ))
        }
    }
}
