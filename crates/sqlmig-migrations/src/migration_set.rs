//! The migration set: one configured migration run.
//!
//! [`MigrationSet`] holds everything that used to be process-wide state in
//! tools of this kind (table and schema names, the ignore-unknown flag, lock
//! options) so that two sets with different settings can be used side by
//! side. Every operation reads the applied ids, plans, and applies against
//! the backend it is given.

use std::time::Duration;

use sqlmig_core::logging::migration_span;
use sqlmig_core::settings::{EnvironmentSettings, LockSettings, DEFAULT_TABLE_NAME};
use sqlmig_core::{ApplyError, MigrateError, MigrateResult};
use sqlmig_db_backends::DatabaseBackend;
use tokio::time::Instant;
use tracing::Instrument;

use crate::executor::Executor;
use crate::lock::CooperativeLock;
use crate::migration::{Direction, MigrationRecord, PlannedMigration};
use crate::planner::{plan, PlanRequest};
use crate::recorder::MigrationRecorder;
use crate::source::MigrationSource;

/// Configuration and entry points for planning and applying migrations.
///
/// # Examples
///
/// ```
/// use sqlmig_migrations::MigrationSet;
///
/// let mut set = MigrationSet::new();
/// set.set_table_name("schema_history");
/// set.set_ignore_unknown(true);
/// assert_eq!(set.table_name(), "schema_history");
/// ```
#[derive(Debug, Clone)]
pub struct MigrationSet {
    table: String,
    schema: Option<String>,
    ignore_unknown: bool,
    disable_create_table: bool,
    limit_time_precision: bool,
    statement_timeout: Option<Duration>,
    lock: LockSettings,
}

impl Default for MigrationSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationSet {
    /// Creates a set with default settings.
    pub fn new() -> Self {
        Self {
            table: DEFAULT_TABLE_NAME.to_string(),
            schema: None,
            ignore_unknown: false,
            disable_create_table: false,
            limit_time_precision: false,
            statement_timeout: None,
            lock: LockSettings::default(),
        }
    }

    /// Creates a set from an environment's settings.
    pub fn from_environment(env: &EnvironmentSettings) -> Self {
        let mut set = Self::new();
        set.set_table_name(&env.table);
        set.set_schema_name(env.schema.clone());
        set.set_ignore_unknown(env.ignore_unknown);
        set.set_disable_create_table(env.disable_create_table);
        set.set_limit_time_precision(env.limit_time_precision);
        set.set_statement_timeout(env.statement_timeout());
        set.set_lock_settings(env.lock.clone());
        set
    }

    // ── Configuration ────────────────────────────────────────────────

    /// Sets the bookkeeping table name. An empty name keeps the default.
    pub fn set_table_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.table = if name.is_empty() {
            DEFAULT_TABLE_NAME.to_string()
        } else {
            name
        };
    }

    /// Sets the schema holding the bookkeeping and lock tables.
    pub fn set_schema_name(&mut self, schema: Option<String>) {
        self.schema = schema.filter(|s| !s.is_empty());
    }

    /// Plans even when the database has records missing from the source.
    pub fn set_ignore_unknown(&mut self, ignore: bool) {
        self.ignore_unknown = ignore;
    }

    /// Never creates tables; the caller manages them.
    pub fn set_disable_create_table(&mut self, disable: bool) {
        self.disable_create_table = disable;
    }

    /// Truncates `applied_at` timestamps to whole seconds.
    pub fn set_limit_time_precision(&mut self, limit: bool) {
        self.limit_time_precision = limit;
    }

    /// Bounds every statement by `timeout`.
    pub fn set_statement_timeout(&mut self, timeout: Option<Duration>) {
        self.statement_timeout = timeout;
    }

    /// Sets the cooperative lock options.
    pub fn set_lock_settings(&mut self, lock: LockSettings) {
        self.lock = lock;
    }

    /// The bookkeeping table name.
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// The schema name, if any.
    pub fn schema_name(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Whether unknown records are ignored while planning.
    pub const fn ignore_unknown(&self) -> bool {
        self.ignore_unknown
    }

    /// The cooperative lock options.
    pub const fn lock_settings(&self) -> &LockSettings {
        &self.lock
    }

    fn recorder(&self) -> MigrationRecorder {
        MigrationRecorder::new(self.table.clone())
            .with_schema(self.schema.clone())
            .with_limit_time_precision(self.limit_time_precision)
    }

    fn cooperative_lock<'a>(&self, backend: &'a dyn DatabaseBackend) -> CooperativeLock<'a> {
        CooperativeLock::new(backend, &self.lock).with_schema(self.schema.clone())
    }

    // ── Provisioning ─────────────────────────────────────────────────

    /// Creates the bookkeeping table (and the lock table when `with_lock`)
    /// if they do not exist, creating the schema first when one is set.
    ///
    /// Does nothing when table creation is disabled.
    pub async fn ensure_tables(
        &self,
        backend: &dyn DatabaseBackend,
        with_lock: bool,
    ) -> MigrateResult<()> {
        if self.disable_create_table {
            return Ok(());
        }
        if let Some(sql) = self
            .schema
            .as_deref()
            .and_then(|schema| backend.dialect().create_schema_sql(schema))
        {
            backend.execute(&sql, &[]).await?;
        }
        self.recorder().ensure_table(backend).await?;
        if with_lock {
            self.cooperative_lock(backend).ensure_table().await?;
        }
        Ok(())
    }

    // ── Planning ─────────────────────────────────────────────────────

    /// Plans `request` without executing anything.
    pub async fn plan(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        request: &PlanRequest,
    ) -> MigrateResult<Vec<PlannedMigration>> {
        self.ensure_tables(backend, false).await?;
        let migrations = source.find_migrations()?;
        let applied = self.recorder().applied_ids(backend).await?;
        plan(&migrations, &applied, request, self.ignore_unknown)
    }

    /// Plans at most `max` steps in `direction` (`0` for no limit).
    pub async fn plan_migration(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
        max: usize,
    ) -> MigrateResult<Vec<PlannedMigration>> {
        self.plan(backend, source, &PlanRequest::max(direction, max))
            .await
    }

    /// Plans every step in `direction` up to and including `version`.
    pub async fn plan_migration_to_version(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
        version: i64,
    ) -> MigrateResult<Vec<PlannedMigration>> {
        self.plan(backend, source, &PlanRequest::to_version(direction, version))
            .await
    }

    /// Reads every bookkeeping record, ordered by id ascending.
    pub async fn get_migration_records(
        &self,
        backend: &dyn DatabaseBackend,
    ) -> MigrateResult<Vec<MigrationRecord>> {
        self.ensure_tables(backend, false).await?;
        self.recorder().records(backend).await
    }

    // ── Execution ────────────────────────────────────────────────────

    async fn exec_request(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        request: &PlanRequest,
        deadline: Option<Instant>,
    ) -> Result<usize, ApplyError> {
        let span = migration_span(&self.table, &request.direction.to_string());
        async move {
            let planned = self.plan(backend, source, request).await?;
            tracing::info!(steps = planned.len(), "planned migrations");
            let recorder = self.recorder();
            Executor::new(backend, &recorder)
                .with_statement_timeout(self.statement_timeout)
                .with_deadline(deadline)
                .apply_all(&planned)
                .await
        }
        .instrument(span)
        .await
    }

    /// Applies every pending migration in `direction`.
    ///
    /// Returns the number of steps applied.
    pub async fn exec(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
    ) -> Result<usize, ApplyError> {
        self.exec_request(backend, source, &PlanRequest::all(direction), None)
            .await
    }

    /// Applies at most `max` migrations in `direction` (`0` for no limit).
    pub async fn exec_max(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
        max: usize,
    ) -> Result<usize, ApplyError> {
        self.exec_request(backend, source, &PlanRequest::max(direction, max), None)
            .await
    }

    /// Applies migrations in `direction` up to and including `version`.
    pub async fn exec_version(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
        version: i64,
    ) -> Result<usize, ApplyError> {
        self.exec_request(
            backend,
            source,
            &PlanRequest::to_version(direction, version),
            None,
        )
        .await
    }

    /// Applies `request`, aborting the in-flight statement and rolling back
    /// its step once `deadline` passes.
    pub async fn exec_with_deadline(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        request: PlanRequest,
        deadline: Instant,
    ) -> Result<usize, ApplyError> {
        self.exec_request(backend, source, &request, Some(deadline))
            .await
    }

    /// Records up to `max` planned migrations as applied (or unapplied, for
    /// down) without running their statements.
    pub async fn skip_max(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
        max: usize,
    ) -> Result<usize, ApplyError> {
        let planned = self.plan_migration(backend, source, direction, max).await?;
        let recorder = self.recorder();
        Executor::new(backend, &recorder).skip(&planned).await
    }

    // ── Lock-guarded execution ───────────────────────────────────────

    /// Lock-guarded [`exec`](Self::exec).
    pub async fn exec_with_lock(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
    ) -> Result<usize, ApplyError> {
        self.exec_max_with_lock(backend, source, direction, 0).await
    }

    /// Lock-guarded [`exec_max`](Self::exec_max).
    pub async fn exec_max_with_lock(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
        max: usize,
    ) -> Result<usize, ApplyError> {
        self.exec_request_with_lock(backend, source, &PlanRequest::max(direction, max), None)
            .await
    }

    /// Lock-guarded [`exec_version`](Self::exec_version).
    pub async fn exec_version_with_lock(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        direction: Direction,
        version: i64,
    ) -> Result<usize, ApplyError> {
        self.exec_request_with_lock(
            backend,
            source,
            &PlanRequest::to_version(direction, version),
            None,
        )
        .await
    }

    /// Plans and applies `request` while holding the cooperative lock.
    ///
    /// Only one process sharing the database plans and applies at a time.
    /// A process that finds the lock taken waits for it to be released and
    /// then returns `Ok(0)`: the holder did the work. `deadline` bounds the
    /// statements of the holder's run, not the wait.
    ///
    /// # Errors
    ///
    /// [`MigrateError::ConfigurationError`] for dialects without
    /// concurrent-lock support, [`MigrateError::LockTimeout`] when waiting
    /// takes longer than the configured wait timeout, and every error
    /// [`exec_max`](Self::exec_max) can return.
    pub async fn exec_request_with_lock(
        &self,
        backend: &dyn DatabaseBackend,
        source: &dyn MigrationSource,
        request: &PlanRequest,
        deadline: Option<Instant>,
    ) -> Result<usize, ApplyError> {
        let dialect = backend.dialect();
        if !dialect.supports_concurrent_lock() {
            return Err(MigrateError::ConfigurationError(format!(
                "The {} dialect does not support locking migrations",
                dialect.name()
            ))
            .into());
        }
        self.ensure_tables(backend, true).await?;

        let outcome = self
            .cooperative_lock(backend)
            .with_lock(|| self.exec_request(backend, source, request, deadline))
            .await?;
        Ok(outcome.applied())
    }
}
