//! Migration planning.
//!
//! [`plan`] compares the available migrations with the ids recorded in the
//! bookkeeping table and produces the exact sequence of steps needed to
//! reach the requested state. Planning never touches the database; the
//! caller reads the applied ids first.
//!
//! The plan is built in three parts:
//!
//! 1. **Catch-up**: unapplied migrations that sort before the most recently
//!    applied one (the *record*) are applied up first, oldest first. This
//!    repairs gaps left when branches are merged out of order.
//! 2. **Selection**: migrations after the record (up) or at and before it,
//!    newest first (down).
//! 3. **Truncation**: to an exact target version, or to a step limit.

use std::collections::HashSet;

use sqlmig_core::{MigrateError, MigrateResult, PlanError};

use crate::migration::{Direction, Migration, PlannedMigration};
use crate::ordering::{compare_ids, less};

/// What a planning call should achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanRequest {
    /// Which way to migrate.
    pub direction: Direction,
    /// Maximum number of selected steps; `0` means no limit. Catch-up steps
    /// are not counted.
    pub limit: usize,
    /// Stop exactly at the migration with this numeric version.
    pub target_version: Option<i64>,
}

impl PlanRequest {
    /// Every pending step in `direction`.
    pub const fn all(direction: Direction) -> Self {
        Self {
            direction,
            limit: 0,
            target_version: None,
        }
    }

    /// At most `limit` steps in `direction` (`0` for no limit).
    pub const fn max(direction: Direction, limit: usize) -> Self {
        Self {
            direction,
            limit,
            target_version: None,
        }
    }

    /// Every step in `direction` up to and including `version`.
    pub const fn to_version(direction: Direction, version: i64) -> Self {
        Self {
            direction,
            limit: 0,
            target_version: Some(version),
        }
    }
}

fn unknown_version(version: i64) -> MigrateError {
    PlanError::new(
        "",
        format!("unknown migration with version id {version} in database"),
    )
    .into()
}

/// Plans the steps needed to satisfy `request`.
///
/// `candidates` need not be sorted; `applied` are the ids found in the
/// bookkeeping table, in any order.
///
/// # Errors
///
/// Returns [`MigrateError::Plan`] when an applied id is missing from
/// `candidates` (unless `ignore_unknown` is set), when the target version is
/// negative or unreachable, or when a migration passed during a versioned
/// traversal has no numeric version. Errors from lazily loaded migration
/// bodies are returned as-is.
pub fn plan(
    candidates: &[Migration],
    applied: &[String],
    request: &PlanRequest,
    ignore_unknown: bool,
) -> MigrateResult<Vec<PlannedMigration>> {
    if let Some(version) = request.target_version {
        if version < 0 {
            return Err(PlanError::new(
                "",
                format!("target version must not be negative, got {version}"),
            )
            .into());
        }
    }

    let mut sorted: Vec<&Migration> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.compare(b));

    let mut applied_sorted: Vec<&str> = applied.iter().map(String::as_str).collect();
    applied_sorted.sort_by(|a, b| compare_ids(a, b));
    let applied_set: HashSet<&str> = applied_sorted.iter().copied().collect();

    if !ignore_unknown {
        let known: HashSet<&str> = sorted.iter().map(|m| m.id()).collect();
        if let Some(unknown) = applied_sorted.iter().find(|id| !known.contains(*id)) {
            return Err(PlanError::new(*unknown, "unknown migration in database").into());
        }
    }

    let record = applied_sorted.last().copied();
    let mut result = Vec::new();

    if let Some(record) = record {
        for migration in &sorted {
            if !applied_set.contains(migration.id()) && less(migration.id(), record) {
                let body = migration.load()?;
                result.push(PlannedMigration::new(migration.id(), &body, Direction::Up));
            }
        }
    }

    let mut selected: Vec<&Migration> = match (request.direction, record) {
        (Direction::Up, None) => sorted.clone(),
        (Direction::Up, Some(record)) => sorted
            .iter()
            .copied()
            .filter(|m| less(record, m.id()))
            .collect(),
        (Direction::Down, None) => Vec::new(),
        (Direction::Down, Some(record)) => sorted
            .iter()
            .rev()
            .copied()
            .filter(|m| !less(record, m.id()))
            .collect(),
    };

    if let Some(version) = request.target_version {
        let mut count = None;
        for (index, migration) in selected.iter().enumerate() {
            let candidate = migration.version().ok_or_else(|| {
                PlanError::new(
                    migration.id(),
                    format!(
                        "migration id has no numeric version, so version {version} cannot be located"
                    ),
                )
            })?;
            let passed = match request.direction {
                Direction::Up => candidate > version,
                Direction::Down => candidate < version,
            };
            if passed {
                return Err(unknown_version(version));
            }
            if candidate == version {
                count = Some(index + 1);
                break;
            }
        }
        let count = count.ok_or_else(|| unknown_version(version))?;
        selected.truncate(count);
    } else if request.limit > 0 {
        selected.truncate(request.limit);
    }

    for migration in selected {
        let body = migration.load()?;
        result.push(PlannedMigration::new(
            migration.id(),
            &body,
            request.direction,
        ));
    }

    Ok(result)
}
