//! The `up` command.

use async_trait::async_trait;
use sqlmig_core::{MigrateError, Settings};
use sqlmig_migrations::Direction;

use super::apply::{apply_arguments, apply_migrations};
use crate::command::ManagementCommand;

/// Applies pending migrations.
///
/// Unlimited by default; `--limit` caps the number of steps and `--version`
/// stops at an exact version.
pub struct UpCommand;

#[async_trait]
impl ManagementCommand for UpCommand {
    fn name(&self) -> &'static str {
        "up"
    }

    fn help(&self) -> &'static str {
        "Migrates the database to the most recent version available"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        apply_arguments(cmd, "0")
    }

    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> Result<(), MigrateError> {
        apply_migrations(matches, settings, Direction::Up).await
    }
}
