//! Migration data model.
//!
//! A [`Migration`] is an id plus a body that is either already parsed
//! ([`MigrationBody::Loaded`]) or parsed on first use
//! ([`MigrationBody::Pending`]). The planner turns migrations into
//! [`PlannedMigration`]s, each bound to a [`Direction`]. Applied migrations
//! are persisted as [`MigrationRecord`]s.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use once_cell::sync::OnceCell;
use sqlmig_core::MigrateResult;

use crate::ordering;

/// The direction a migration is applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Apply the migration's up statements.
    Up,
    /// Apply the migration's down statements.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => f.write_str("up"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// The parsed body of a migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedMigration {
    /// Statements applied when migrating up.
    pub up: Vec<String>,
    /// Statements applied when migrating down.
    pub down: Vec<String>,
    /// Run the up statements outside a transaction.
    pub disable_transaction_up: bool,
    /// Run the down statements outside a transaction.
    pub disable_transaction_down: bool,
}

impl LoadedMigration {
    /// Creates a transactional migration body from up and down statements.
    pub fn new<U, D>(up: U, down: D) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            up: up.into_iter().map(Into::into).collect(),
            down: down.into_iter().map(Into::into).collect(),
            disable_transaction_up: false,
            disable_transaction_down: false,
        }
    }

    /// Returns the statements for `direction`.
    pub fn statements(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    /// Returns whether `direction` runs inside a transaction.
    pub const fn is_transactional(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => !self.disable_transaction_up,
            Direction::Down => !self.disable_transaction_down,
        }
    }
}

/// Parses a migration body on demand.
pub type Loader = dyn Fn() -> MigrateResult<LoadedMigration> + Send + Sync;

/// A body whose parse is deferred until the migration is scheduled.
pub struct PendingBody {
    loader: Box<Loader>,
    resolved: OnceCell<Arc<LoadedMigration>>,
}

impl fmt::Debug for PendingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingBody")
            .field("resolved", &self.resolved.get().is_some())
            .finish_non_exhaustive()
    }
}

/// A migration body, parsed or waiting to be parsed.
#[derive(Debug, Clone)]
pub enum MigrationBody {
    /// Parsed when the source enumerated it.
    Loaded(Arc<LoadedMigration>),
    /// Parsed the first time it is needed; the result is cached.
    Pending(Arc<PendingBody>),
}

/// A single migration: an id and its up/down statements.
///
/// Migrations are immutable once loaded. Cloning is cheap and clones share
/// the lazily parsed body.
#[derive(Debug, Clone)]
pub struct Migration {
    id: String,
    body: MigrationBody,
}

impl Migration {
    /// Creates a migration with an already-parsed body.
    pub fn new(id: impl Into<String>, body: LoadedMigration) -> Self {
        Self {
            id: id.into(),
            body: MigrationBody::Loaded(Arc::new(body)),
        }
    }

    /// Creates a migration whose body is parsed by `loader` when first needed.
    pub fn lazy<F>(id: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> MigrateResult<LoadedMigration> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            body: MigrationBody::Pending(Arc::new(PendingBody {
                loader: Box::new(loader),
                resolved: OnceCell::new(),
            })),
        }
    }

    /// The migration id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The body, loaded or pending.
    pub const fn body(&self) -> &MigrationBody {
        &self.body
    }

    /// Whether the body has been parsed.
    pub fn is_loaded(&self) -> bool {
        match &self.body {
            MigrationBody::Loaded(_) => true,
            MigrationBody::Pending(pending) => pending.resolved.get().is_some(),
        }
    }

    /// Returns the parsed body, running the loader on first use.
    ///
    /// A failed load is not cached; the next call tries again.
    pub fn load(&self) -> MigrateResult<Arc<LoadedMigration>> {
        match &self.body {
            MigrationBody::Loaded(loaded) => Ok(Arc::clone(loaded)),
            MigrationBody::Pending(pending) => pending
                .resolved
                .get_or_try_init(|| (pending.loader)().map(Arc::new))
                .cloned(),
        }
    }

    /// The numeric version prefix of the id, if it has one.
    pub fn version(&self) -> Option<i64> {
        ordering::version_of(&self.id)
    }

    /// Returns `true` if this migration sorts before `other`.
    pub fn less(&self, other: &Self) -> bool {
        ordering::less(&self.id, &other.id)
    }

    /// Compares two migrations by the id ordering relation.
    pub fn compare(&self, other: &Self) -> Ordering {
        ordering::compare_ids(&self.id, &other.id)
    }
}

/// A migration bound to a direction, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMigration {
    /// The migration id.
    pub id: String,
    /// The direction this step runs in. Catch-up steps are always `Up`.
    pub direction: Direction,
    /// The statements to execute, in order.
    pub statements: Vec<String>,
    /// Whether the step runs inside a transaction.
    pub transactional: bool,
}

impl PlannedMigration {
    /// Binds a loaded migration to `direction`.
    pub fn new(id: impl Into<String>, body: &LoadedMigration, direction: Direction) -> Self {
        Self {
            id: id.into(),
            direction,
            statements: body.statements(direction).to_vec(),
            transactional: body.is_transactional(direction),
        }
    }
}

/// A persisted bookkeeping row: one per applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// The applied migration's id.
    pub id: String,
    /// When the migration was applied.
    pub applied_at: NaiveDateTime,
}
