//! Core error types for sqlmig.
//!
//! [`MigrateError`] covers every failure a migration run can produce: plan
//! errors (schema drift), statement failures attributed to a migration id,
//! lock timeouts, and configuration or connectivity problems. Each variant
//! maps to an [`ErrorKind`] so callers can tell drift apart from a broken
//! connection without matching on strings.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A plan could not be built for the requested direction or target.
///
/// Raised before any statement executes, so a plan error never leaves the
/// database partially migrated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unable to create migration plan because of {migration_id}: {message}")]
pub struct PlanError {
    /// The migration (or applied record) that made planning impossible.
    pub migration_id: String,
    /// A human-readable reason.
    pub message: String,
}

impl PlanError {
    /// Creates a new plan error.
    pub fn new(migration_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            message: message.into(),
        }
    }
}

/// A statement or bookkeeping failure while applying a single migration.
///
/// Carries the id of the failing migration and, when rolling back the step's
/// transaction also failed, the rollback error.
#[derive(Error, Debug)]
#[error("{source} handling {migration_id}{}", rollback_suffix(.rollback_error.as_deref()))]
pub struct TxError {
    /// The migration being applied when the failure happened.
    pub migration_id: String,
    /// The underlying database error.
    pub source: Box<MigrateError>,
    /// Set when the rollback issued after `source` failed as well.
    pub rollback_error: Option<Box<MigrateError>>,
}

impl TxError {
    /// Wraps `source` with the id of the migration that produced it.
    pub fn new(migration_id: impl Into<String>, source: MigrateError) -> Self {
        Self {
            migration_id: migration_id.into(),
            source: Box::new(source),
            rollback_error: None,
        }
    }

    /// Attaches a rollback failure.
    #[must_use]
    pub fn with_rollback_error(mut self, rollback_error: Option<MigrateError>) -> Self {
        self.rollback_error = rollback_error.map(Box::new);
        self
    }
}

fn rollback_suffix(rollback_error: Option<&MigrateError>) -> String {
    rollback_error.map_or_else(String::new, |e| format!(" (rollback failed: {e})"))
}

/// The primary error type for sqlmig.
#[derive(Error, Debug)]
pub enum MigrateError {
    // ── Planning ─────────────────────────────────────────────────────

    /// Schema drift or an unreachable target version.
    #[error(transparent)]
    Plan(#[from] PlanError),

    // ── Execution ────────────────────────────────────────────────────

    /// A migration step failed; the step was rolled back when transactional.
    #[error(transparent)]
    Transaction(#[from] TxError),

    /// A statement ran past its deadline or timeout.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    // ── Locking ──────────────────────────────────────────────────────

    /// A waiting process gave up before the lock holder released the lock.
    #[error("Exceeded lock clearance wait time of {waited:?}")]
    LockTimeout {
        /// How long the waiter polled before giving up.
        waited: Duration,
    },

    // ── Sources ──────────────────────────────────────────────────────

    /// A migration file could not be parsed.
    #[error("Error parsing migration ({migration_id}): {message}")]
    Parse {
        /// The id (file name) of the migration.
        migration_id: String,
        /// What was wrong with it.
        message: String,
    },

    // ── Database ─────────────────────────────────────────────────────

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A uniqueness or other constraint was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// The database could not be reached or a pooled connection failed.
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// A query expected a row but found none.
    #[error("Does not exist: {0}")]
    DoesNotExist(String),

    // ── Configuration / IO ───────────────────────────────────────────

    /// Invalid or missing configuration, unsupported dialect, etc.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Broad category of a [`MigrateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Schema drift: unknown applied migration or bad target version.
    Plan,
    /// A statement or bookkeeping write failed.
    Statement,
    /// The cooperative lock wait timed out.
    LockTimeout,
    /// Configuration, dialect, or migration file problems.
    Configuration,
    /// The database could not be reached.
    Connectivity,
    /// Filesystem failure.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Plan => "plan",
            Self::Statement => "statement",
            Self::LockTimeout => "lock-timeout",
            Self::Configuration => "configuration",
            Self::Connectivity => "connectivity",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

impl MigrateError {
    /// Returns the category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Plan(_) => ErrorKind::Plan,
            Self::Transaction(_)
            | Self::Cancelled(_)
            | Self::DatabaseError(_)
            | Self::IntegrityError(_)
            | Self::DoesNotExist(_) => ErrorKind::Statement,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::Parse { .. } | Self::ConfigurationError(_) => ErrorKind::Configuration,
            Self::OperationalError(_) => ErrorKind::Connectivity,
            Self::IoError(_) => ErrorKind::Io,
        }
    }

    /// Returns the process exit code the CLI uses for this error.
    pub const fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Plan => 2,
            ErrorKind::LockTimeout => 3,
            _ => 1,
        }
    }

    /// Returns `true` for unique-constraint violations.
    pub const fn is_integrity_error(&self) -> bool {
        matches!(self, Self::IntegrityError(_))
    }
}

/// An error from an apply-style operation, together with the number of
/// migration steps that were committed before it happened.
#[derive(Error, Debug)]
#[error("{error} ({applied} migration(s) applied before the failure)")]
pub struct ApplyError {
    /// Steps committed before the failure.
    pub applied: usize,
    /// What went wrong.
    #[source]
    pub error: MigrateError,
}

impl ApplyError {
    /// Creates a new apply error.
    pub const fn new(applied: usize, error: MigrateError) -> Self {
        Self { applied, error }
    }

    /// Returns the category of the wrapped error.
    pub const fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl From<MigrateError> for ApplyError {
    fn from(error: MigrateError) -> Self {
        Self { applied: 0, error }
    }
}

impl From<PlanError> for ApplyError {
    fn from(error: PlanError) -> Self {
        Self::from(MigrateError::Plan(error))
    }
}

/// A convenience type alias for results using [`MigrateError`].
pub type MigrateResult<T> = Result<T, MigrateError>;
