//! Settings for sqlmig.
//!
//! A [`Settings`] value holds global options (logging) plus any number of
//! named environments. Each [`EnvironmentSettings`] describes one target
//! database: its dialect, connection string, migration directory, and the
//! bookkeeping and lock table options used by a migration set.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, MigrateResult};

/// Default bookkeeping table name, kept stable for existing deployments.
pub const DEFAULT_TABLE_NAME: &str = "gorp_migrations";

/// Default cooperative lock table name.
pub const DEFAULT_LOCK_TABLE_NAME: &str = "gorp_lock";

/// Default value stored in the lock table's unique column.
pub const DEFAULT_LOCK_KEY: &str = "sql_migrate_lock";

/// Cooperative lock options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Name of the lock table.
    pub table: String,
    /// Value inserted into the lock table's unique column.
    pub key: String,
    /// Age after which a lock row is considered abandoned.
    pub stale_after_secs: u64,
    /// How long a waiter polls before giving up.
    pub wait_timeout_secs: u64,
    /// Delay between existence checks while waiting.
    pub poll_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            table: DEFAULT_LOCK_TABLE_NAME.to_string(),
            key: DEFAULT_LOCK_KEY.to_string(),
            stale_after_secs: 300,
            wait_timeout_secs: 60,
            poll_interval_ms: 100,
        }
    }
}

impl LockSettings {
    /// The staleness threshold as a [`Duration`].
    pub const fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// The wait timeout as a [`Duration`].
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// The poll interval as a [`Duration`].
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// One target database and how migrations are applied to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Dialect name (`sqlite3`, `postgres`, `mysql`).
    pub dialect: String,
    /// Driver connection string. `$VAR` and `${VAR}` are expanded on load.
    pub datasource: String,
    /// Directory holding `*.sql` migration files.
    pub dir: PathBuf,
    /// Bookkeeping table name.
    pub table: String,
    /// Optional schema (namespace) for the bookkeeping and lock tables.
    pub schema: Option<String>,
    /// Plan even when the database has records missing from the source.
    pub ignore_unknown: bool,
    /// Never create the bookkeeping or lock tables.
    pub disable_create_table: bool,
    /// Parse migration bodies only when they are scheduled.
    pub lazy_load: bool,
    /// Truncate `applied_at` timestamps to whole seconds.
    pub limit_time_precision: bool,
    /// Per-statement timeout in seconds.
    pub statement_timeout_secs: Option<u64>,
    /// Cooperative lock options.
    pub lock: LockSettings,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            dialect: String::new(),
            datasource: String::new(),
            dir: PathBuf::from("migrations"),
            table: DEFAULT_TABLE_NAME.to_string(),
            schema: None,
            ignore_unknown: false,
            disable_create_table: false,
            lazy_load: false,
            limit_time_precision: false,
            statement_timeout_secs: None,
            lock: LockSettings::default(),
        }
    }
}

impl EnvironmentSettings {
    /// The per-statement timeout, if configured.
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_secs.map(Duration::from_secs)
    }

    /// Checks that the fields needed to connect are present.
    pub fn validate(&self, name: &str) -> MigrateResult<()> {
        if self.dialect.trim().is_empty() {
            return Err(MigrateError::ConfigurationError(format!(
                "No dialect specified for environment '{name}'"
            )));
        }
        if self.datasource.trim().is_empty() {
            return Err(MigrateError::ConfigurationError(format!(
                "No data source specified for environment '{name}'"
            )));
        }
        if self.table.trim().is_empty() {
            return Err(MigrateError::ConfigurationError(format!(
                "Empty migration table name for environment '{name}'"
            )));
        }
        Ok(())
    }
}

/// The complete set of sqlmig settings.
///
/// # Examples
///
/// ```
/// use sqlmig_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert_eq!(settings.default_environment, "development");
/// assert_eq!(settings.log_level, "info");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    // ── Logging ──────────────────────────────────────────────────────

    /// Pretty, human-readable logs instead of JSON.
    pub debug: bool,
    /// `EnvFilter` directive (e.g. "info", "sqlmig_migrations=debug").
    pub log_level: String,

    // ── Environments ─────────────────────────────────────────────────

    /// Environment used when none is named explicitly.
    pub default_environment: String,
    /// Named target databases.
    pub environments: BTreeMap<String, EnvironmentSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            default_environment: "development".to_string(),
            environments: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Returns the named environment, or the default one when `name` is `None`.
    pub fn environment(&self, name: Option<&str>) -> MigrateResult<&EnvironmentSettings> {
        let name = name.unwrap_or(&self.default_environment);
        self.environments.get(name).ok_or_else(|| {
            MigrateError::ConfigurationError(format!("Environment '{name}' not found in config"))
        })
    }

    /// Mutable variant of [`Settings::environment`], creating the default
    /// environment if it does not exist yet.
    pub fn default_environment_mut(&mut self) -> &mut EnvironmentSettings {
        self.environments
            .entry(self.default_environment.clone())
            .or_default()
    }
}
