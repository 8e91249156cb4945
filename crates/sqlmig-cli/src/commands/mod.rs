//! Built-in commands.
//!
//! Each command implements the
//! [`ManagementCommand`](crate::command::ManagementCommand) trait. The
//! helpers here resolve the selected environment into a connected backend,
//! a migration source, and a configured [`MigrationSet`].

pub mod apply;
pub mod down;
pub mod new;
pub mod redo;
pub mod skip;
pub mod status;
pub mod up;

use std::fmt::Write as _;
use std::sync::Arc;

pub use down::DownCommand;
pub use new::NewCommand;
pub use redo::RedoCommand;
pub use skip::SkipCommand;
pub use status::StatusCommand;
pub use up::UpCommand;

use sqlmig_core::{EnvironmentSettings, MigrateResult, Settings};
use sqlmig_db_backends::DatabaseBackend;
use sqlmig_migrations::{FileMigrationSource, MigrationSet, PlannedMigration};

use crate::command::CommandRegistry;

/// Registers all built-in commands into the given registry.
pub fn register_builtin_commands(registry: &mut CommandRegistry) {
    registry.register(Box::new(UpCommand));
    registry.register(Box::new(DownCommand));
    registry.register(Box::new(RedoCommand));
    registry.register(Box::new(StatusCommand));
    registry.register(Box::new(SkipCommand));
    registry.register(Box::new(NewCommand));
}

/// Everything a database-facing command needs for the selected environment.
pub struct MigrationContext {
    /// The connected database.
    pub backend: Arc<dyn DatabaseBackend>,
    /// The environment's migration directory.
    pub source: FileMigrationSource,
    /// Table, schema, and lock options from the environment.
    pub set: MigrationSet,
}

impl MigrationContext {
    /// Connects to the default environment of `settings`.
    pub fn open(settings: &Settings) -> MigrateResult<Self> {
        let env = selected_environment(settings)?;
        env.validate(&settings.default_environment)?;
        tracing::debug!(
            environment = %settings.default_environment,
            dialect = %env.dialect,
            dir = %env.dir.display(),
            "opening migration environment"
        );
        Ok(Self {
            backend: sqlmig_db_backends::connect(&env.dialect, &env.datasource)?,
            source: FileMigrationSource::new(&env.dir).lazy(env.lazy_load),
            set: MigrationSet::from_environment(env),
        })
    }

    /// The backend as a trait object reference.
    pub fn backend(&self) -> &dyn DatabaseBackend {
        self.backend.as_ref()
    }
}

/// The environment selected with `--env`, or the configured default.
pub fn selected_environment(settings: &Settings) -> MigrateResult<&EnvironmentSettings> {
    settings.environment(None)
}

/// Renders planned steps the way a dry run prints them.
pub fn render_plan(steps: &[PlannedMigration]) -> String {
    let mut out = String::new();
    for step in steps {
        let _ = writeln!(
            out,
            "==> Would apply migration {} ({})",
            step.id, step.direction
        );
        for statement in &step.statements {
            let _ = writeln!(out, "{statement}");
        }
    }
    out
}

/// "Applied 1 migration", "Skipped 3 migrations", and so on.
pub fn count_message(verb: &str, n: usize) -> String {
    if n == 1 {
        format!("{verb} 1 migration")
    } else {
        format!("{verb} {n} migrations")
    }
}

#[cfg(test)]
mod tests {
    use sqlmig_migrations::{Direction, LoadedMigration};

    use super::*;

    #[test]
    fn test_register_builtin_commands() {
        let mut registry = CommandRegistry::new();
        register_builtin_commands(&mut registry);
        assert_eq!(
            registry.list_commands(),
            vec!["down", "new", "redo", "skip", "status", "up"]
        );
    }

    #[test]
    fn test_render_plan() {
        let body = LoadedMigration::new(
            ["CREATE TABLE people (id int);\n"],
            ["DROP TABLE people;\n"],
        );
        let steps = vec![
            PlannedMigration::new("1_initial.sql", &body, Direction::Down),
            PlannedMigration::new("1_initial.sql", &body, Direction::Up),
        ];
        assert_eq!(
            render_plan(&steps),
            "==> Would apply migration 1_initial.sql (down)\nDROP TABLE people;\n\n\
             ==> Would apply migration 1_initial.sql (up)\nCREATE TABLE people (id int);\n\n"
        );
    }

    #[test]
    fn test_count_message() {
        assert_eq!(count_message("Applied", 0), "Applied 0 migrations");
        assert_eq!(count_message("Applied", 1), "Applied 1 migration");
        assert_eq!(count_message("Skipped", 4), "Skipped 4 migrations");
    }

    #[test]
    fn test_context_requires_dialect() {
        let mut settings = Settings::default();
        settings.default_environment_mut().datasource = "db.sqlite".into();
        assert!(MigrationContext::open(&settings).is_err());
    }

    #[test]
    fn test_unknown_environment() {
        let mut settings = Settings::default();
        settings.default_environment = "nowhere".into();
        let err = selected_environment(&settings).unwrap_err();
        assert!(err.to_string().contains("'nowhere' not found"));
    }
}
