//! Cooperative database lock.
//!
//! Serializes plan-and-apply runs across independent processes that share a
//! database, using one row in a dedicated lock table as a mutex:
//!
//! ```text
//! Unlocked -> Acquiring -> Master  -> Released
//!                       \-> Waiting -> (row gone)  -> done, nothing applied
//!                                   \-> (timeout)  -> LockTimeout
//! ```
//!
//! - **Acquiring** deletes lock rows older than the staleness threshold (left
//!   by a crashed master), then inserts the lock row. The lock column is
//!   unique, so at most one insert succeeds.
//! - **Master** runs the work and deletes the row afterwards, whether the
//!   work succeeded or not. The delete matches the row's `acquired_at` as
//!   well as its key, so a master whose row was cleared as stale never
//!   removes the row of the process that took over.
//! - **Waiting** polls until the row disappears, which means another process
//!   finished the work, or until the wait timeout expires.
//!
//! Waiters never touch the schema or the bookkeeping table.

use std::future::Future;
use std::time::Duration;

use chrono::{NaiveDateTime, SubsecRound};

use sqlmig_core::logging::lock_span;
use sqlmig_core::settings::LockSettings;
use sqlmig_core::{ApplyError, MigrateError, MigrateResult};
use sqlmig_db_backends::{DatabaseBackend, Dialect, Value};
use tokio::time::Instant;
use tracing::Instrument;

const LOCK_COLUMN: &str = "lock";
const ACQUIRED_AT_COLUMN: &str = "acquired_at";

/// How a lock-guarded run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// This process held the lock and applied this many steps.
    Master(usize),
    /// Another process held the lock and released it while this one waited.
    Waited,
}

impl LockOutcome {
    /// Number of steps this process applied.
    pub const fn applied(self) -> usize {
        match self {
            Self::Master(n) => n,
            Self::Waited => 0,
        }
    }
}

/// A lock row in a shared database.
pub struct CooperativeLock<'a> {
    backend: &'a dyn DatabaseBackend,
    settings: LockSettings,
    schema: Option<String>,
    holder: String,
}

impl<'a> CooperativeLock<'a> {
    /// Creates a lock on `backend` configured by `settings`.
    pub fn new(backend: &'a dyn DatabaseBackend, settings: &LockSettings) -> Self {
        Self {
            backend,
            settings: settings.clone(),
            schema: None,
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Places the lock table in `schema`.
    #[must_use]
    pub fn with_schema(mut self, schema: Option<String>) -> Self {
        self.schema = schema.filter(|s| !s.is_empty());
        self
    }

    /// The id this lock instance logs under.
    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn dialect(&self) -> &'static dyn Dialect {
        self.backend.dialect()
    }

    fn table(&self) -> String {
        self.dialect()
            .quote_qualified_table(self.schema.as_deref(), &self.settings.table)
    }

    fn column(&self, name: &str) -> String {
        self.dialect().quote_identifier(name)
    }

    // ── SQL generation ───────────────────────────────────────────────

    /// Returns the SQL to create the lock table if it does not exist.
    pub fn create_table_sql(&self) -> String {
        let dialect = self.dialect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {} NOT NULL UNIQUE, {} {})",
            self.table(),
            self.column(LOCK_COLUMN),
            dialect.key_column_type(),
            self.column(ACQUIRED_AT_COLUMN),
            dialect.timestamp_column_type(),
        )
    }

    fn delete_stale_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} < {}",
            self.table(),
            self.column(ACQUIRED_AT_COLUMN),
            self.dialect().placeholder(1),
        )
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}, {}) VALUES ({}, {})",
            self.table(),
            self.column(LOCK_COLUMN),
            self.column(ACQUIRED_AT_COLUMN),
            self.dialect().placeholder(1),
            self.dialect().placeholder(2),
        )
    }

    fn release_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            self.table(),
            self.column(LOCK_COLUMN),
            self.dialect().placeholder(1),
            self.column(ACQUIRED_AT_COLUMN),
            self.dialect().placeholder(2),
        )
    }

    fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) AS n FROM {} WHERE {} = {}",
            self.table(),
            self.column(LOCK_COLUMN),
            self.dialect().placeholder(1),
        )
    }

    // ── Protocol ─────────────────────────────────────────────────────

    /// Creates the lock table if needed.
    pub async fn ensure_table(&self) -> MigrateResult<()> {
        self.backend.execute(&self.create_table_sql(), &[]).await?;
        Ok(())
    }

    /// Deletes lock rows older than the staleness threshold.
    async fn clear_stale(&self) -> MigrateResult<()> {
        let now = chrono::Utc::now().naive_utc();
        let Some(cutoff) = chrono::Duration::from_std(self.settings.stale_after())
            .ok()
            .and_then(|stale_after| now.checked_sub_signed(stale_after))
        else {
            return Ok(());
        };
        let removed = self
            .backend
            .execute(&self.delete_stale_sql(), &[Value::DateTime(cutoff)])
            .await?;
        if removed > 0 {
            tracing::warn!(removed, "removed stale migration lock");
        }
        Ok(())
    }

    /// Tries to insert the lock row.
    ///
    /// Returns the row's `acquired_at` on success and `None` when someone
    /// else holds the lock. The timestamp is truncated to microseconds so it
    /// compares equal to what every engine stores.
    async fn try_acquire(&self) -> MigrateResult<Option<NaiveDateTime>> {
        let acquired_at = chrono::Utc::now().naive_utc().trunc_subsecs(6);
        let params = [
            Value::from(self.settings.key.as_str()),
            Value::DateTime(acquired_at),
        ];
        match self.backend.execute(&self.insert_sql(), &params).await {
            Ok(_) => Ok(Some(acquired_at)),
            Err(e) if e.is_integrity_error() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deletes the row this instance inserted at `acquired_at`.
    async fn release(&self, acquired_at: NaiveDateTime) -> MigrateResult<()> {
        let removed = self
            .backend
            .execute(
                &self.release_sql(),
                &[
                    Value::from(self.settings.key.as_str()),
                    Value::DateTime(acquired_at),
                ],
            )
            .await?;
        if removed == 0 {
            tracing::warn!(
                %acquired_at,
                "migration lock was cleared as stale and taken over before release"
            );
        } else {
            tracing::info!("released migration lock");
        }
        Ok(())
    }

    async fn is_held(&self) -> MigrateResult<bool> {
        let row = self
            .backend
            .query_one(&self.count_sql(), &[Value::from(self.settings.key.as_str())])
            .await?;
        Ok(row.get::<i64>("n")? > 0)
    }

    /// Polls until the lock row disappears or the wait timeout expires.
    async fn wait_for_release(&self) -> MigrateResult<()> {
        let started = Instant::now();
        let timeout = self.settings.wait_timeout();
        let poll = self.settings.poll_interval().max(Duration::from_millis(1));
        loop {
            if !self.is_held().await? {
                tracing::info!(waited = ?started.elapsed(), "lock released by another process");
                return Ok(());
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(MigrateError::LockTimeout { waited });
            }
            tokio::time::sleep(poll.min(timeout - waited)).await;
        }
    }

    /// Runs `work` while holding the lock.
    ///
    /// If another process holds the lock, waits for it to be released and
    /// returns [`LockOutcome::Waited`] without running `work`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::LockTimeout`] when the wait timeout expires,
    /// any database error from the lock protocol, and whatever `work`
    /// returns. A failure to release the lock after successful work is
    /// reported with the number of steps the work applied.
    pub async fn with_lock<F, Fut>(&self, work: F) -> Result<LockOutcome, ApplyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<usize, ApplyError>>,
    {
        let span = lock_span(&self.holder, &self.settings.table);
        async move {
            if let Err(e) = self.clear_stale().await {
                tracing::warn!("could not clear stale migration locks: {e}");
            }
            let Some(acquired_at) = self.try_acquire().await? else {
                tracing::info!("lock held elsewhere, waiting");
                self.wait_for_release().await?;
                return Ok(LockOutcome::Waited);
            };

            tracing::info!(%acquired_at, "acquired migration lock");
            let result = work().await;
            let released = self.release(acquired_at).await;

            match (result, released) {
                (Ok(applied), Ok(())) => Ok(LockOutcome::Master(applied)),
                (Ok(applied), Err(e)) => Err(ApplyError::new(applied, e)),
                (Err(e), Ok(())) => Err(e),
                (Err(e), Err(release_error)) => {
                    tracing::error!("failed to release migration lock: {release_error}");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use sqlmig_db_backends::{Row, SqliteBackend, Transaction};
    use tokio::sync::oneshot;

    use super::*;

    fn fast_settings() -> LockSettings {
        LockSettings {
            wait_timeout_secs: 1,
            poll_interval_ms: 10,
            ..LockSettings::default()
        }
    }

    #[test]
    fn test_outcome_applied() {
        assert_eq!(LockOutcome::Master(3).applied(), 3);
        assert_eq!(LockOutcome::Waited.applied(), 0);
    }

    #[tokio::test]
    async fn test_create_table_sql_quotes_lock_column() {
        let backend = SqliteBackend::memory().unwrap();
        let lock = CooperativeLock::new(&backend, &LockSettings::default());
        assert_eq!(
            lock.create_table_sql(),
            "CREATE TABLE IF NOT EXISTS \"gorp_lock\" (\"lock\" TEXT NOT NULL UNIQUE, \"acquired_at\" TIMESTAMP)"
        );
    }

    #[tokio::test]
    async fn test_master_runs_work_and_releases() {
        let backend = SqliteBackend::memory().unwrap();
        let lock = CooperativeLock::new(&backend, &fast_settings());
        lock.ensure_table().await.unwrap();

        let outcome = lock.with_lock(|| async { Ok(2) }).await.unwrap();
        assert_eq!(outcome, LockOutcome::Master(2));
        assert!(!lock.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_released_after_failed_work() {
        let backend = SqliteBackend::memory().unwrap();
        let lock = CooperativeLock::new(&backend, &fast_settings());
        lock.ensure_table().await.unwrap();

        let err = lock
            .with_lock(|| async {
                Err(ApplyError::new(
                    1,
                    MigrateError::DatabaseError("boom".into()),
                ))
            })
            .await
            .unwrap_err();
        assert_eq!(err.applied, 1);
        assert!(!lock.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn test_waiter_times_out() {
        let backend = SqliteBackend::memory().unwrap();
        let lock = CooperativeLock::new(&backend, &fast_settings());
        lock.ensure_table().await.unwrap();
        assert!(lock.try_acquire().await.unwrap().is_some());

        let err = lock.with_lock(|| async { Ok(1) }).await.unwrap_err();
        assert!(matches!(err.error, MigrateError::LockTimeout { .. }));
        assert!(err
            .to_string()
            .contains("Exceeded lock clearance wait time"));
        assert_eq!(err.applied, 0);
    }

    #[tokio::test]
    async fn test_stale_lock_is_cleared() {
        let backend = SqliteBackend::memory().unwrap();
        let settings = LockSettings {
            stale_after_secs: 60,
            ..fast_settings()
        };
        let lock = CooperativeLock::new(&backend, &settings);
        lock.ensure_table().await.unwrap();

        let long_ago = chrono::Utc::now().naive_utc() - chrono::Duration::hours(2);
        backend
            .execute(
                &lock.insert_sql(),
                &[Value::from("sql_migrate_lock"), Value::DateTime(long_ago)],
            )
            .await
            .unwrap();

        let outcome = lock.with_lock(|| async { Ok(1) }).await.unwrap();
        assert_eq!(outcome, LockOutcome::Master(1));
    }

    #[tokio::test]
    async fn test_holder_ids_are_unique() {
        let backend = SqliteBackend::memory().unwrap();
        let a = CooperativeLock::new(&backend, &LockSettings::default());
        let b = CooperativeLock::new(&backend, &LockSettings::default());
        assert_ne!(a.holder(), b.holder());
    }

    #[tokio::test]
    async fn test_release_keeps_row_of_new_holder() {
        let backend = SqliteBackend::memory().unwrap();
        let first = CooperativeLock::new(&backend, &fast_settings());
        let second = CooperativeLock::new(&backend, &fast_settings());
        first.ensure_table().await.unwrap();

        let first_at = first.try_acquire().await.unwrap().unwrap();
        // The first holder's row is cleared as stale and the second takes over.
        backend
            .execute(&format!("DELETE FROM {}", first.table()), &[])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second_at = second.try_acquire().await.unwrap().unwrap();
        assert_ne!(first_at, second_at);

        first.release(first_at).await.unwrap();
        assert!(second.is_held().await.unwrap());

        second.release(second_at).await.unwrap();
        assert!(!second.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn test_overrun_master_does_not_free_successor_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.db");
        let backend_a = SqliteBackend::open(&path).unwrap();
        let backend_b = SqliteBackend::open(&path).unwrap();
        let backend_c = SqliteBackend::open(&path).unwrap();

        let a = CooperativeLock::new(&backend_a, &fast_settings());
        // B treats any existing row as stale, so it takes over from A.
        let b = CooperativeLock::new(
            &backend_b,
            &LockSettings {
                stale_after_secs: 0,
                ..fast_settings()
            },
        );
        let c = CooperativeLock::new(&backend_c, &fast_settings());
        a.ensure_table().await.unwrap();

        let (a_started, a_started_rx) = oneshot::channel::<()>();
        let (a_finish, a_finish_rx) = oneshot::channel::<()>();
        let (a_done, a_done_rx) = oneshot::channel::<()>();
        let (b_started, b_started_rx) = oneshot::channel::<()>();
        let (b_finish, b_finish_rx) = oneshot::channel::<()>();

        let run_a = async {
            let outcome = a
                .with_lock(|| async move {
                    a_started.send(()).unwrap();
                    a_finish_rx.await.unwrap();
                    Ok(1)
                })
                .await;
            a_done.send(()).unwrap();
            outcome
        };
        let run_b = async {
            a_started_rx.await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
            b.with_lock(|| async move {
                b_started.send(()).unwrap();
                b_finish_rx.await.unwrap();
                Ok(1)
            })
            .await
        };
        let run_c = async {
            b_started_rx.await.unwrap();
            a_finish.send(()).unwrap();
            a_done_rx.await.unwrap();
            // B still holds the lock, so C must wait and give up.
            let outcome = c.with_lock(|| async { Ok(1) }).await;
            b_finish.send(()).unwrap();
            outcome
        };

        let (a_outcome, b_outcome, c_outcome) = tokio::join!(run_a, run_b, run_c);
        assert_eq!(a_outcome.unwrap(), LockOutcome::Master(1));
        assert_eq!(b_outcome.unwrap(), LockOutcome::Master(1));
        let err = c_outcome.unwrap_err();
        assert!(matches!(err.error, MigrateError::LockTimeout { .. }));
        assert!(!c.is_held().await.unwrap());
    }

    /// Fails the stale-lock cleanup and passes everything else through.
    struct NoStaleCleanup(SqliteBackend);

    #[async_trait::async_trait]
    impl DatabaseBackend for NoStaleCleanup {
        fn vendor(&self) -> &str {
            self.0.vendor()
        }

        fn dialect(&self) -> &'static dyn Dialect {
            self.0.dialect()
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> MigrateResult<u64> {
            if sql.starts_with("DELETE") && sql.contains(" < ") {
                return Err(MigrateError::DatabaseError("permission denied".into()));
            }
            self.0.execute(sql, params).await
        }

        async fn query(&self, sql: &str, params: &[Value]) -> MigrateResult<Vec<Row>> {
            self.0.query(sql, params).await
        }

        async fn begin(&self) -> MigrateResult<Box<dyn Transaction>> {
            self.0.begin().await
        }
    }

    #[tokio::test]
    async fn test_stale_cleanup_failure_is_not_fatal() {
        let backend = NoStaleCleanup(SqliteBackend::memory().unwrap());
        let lock = CooperativeLock::new(&backend, &fast_settings());
        lock.ensure_table().await.unwrap();

        let outcome = lock.with_lock(|| async { Ok(3) }).await.unwrap();
        assert_eq!(outcome, LockOutcome::Master(3));
        assert!(!lock.is_held().await.unwrap());
    }
}
