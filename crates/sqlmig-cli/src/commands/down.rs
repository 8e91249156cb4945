//! The `down` command.

use async_trait::async_trait;
use sqlmig_core::{MigrateError, Settings};
use sqlmig_migrations::Direction;

use super::apply::{apply_arguments, apply_migrations};
use crate::command::ManagementCommand;

/// Undoes applied migrations, one at a time unless `--limit` says otherwise.
pub struct DownCommand;

#[async_trait]
impl ManagementCommand for DownCommand {
    fn name(&self) -> &'static str {
        "down"
    }

    fn help(&self) -> &'static str {
        "Undo a database migration"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        apply_arguments(cmd, "1")
    }

    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> Result<(), MigrateError> {
        apply_migrations(matches, settings, Direction::Down).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_down_defaults_to_one_step() {
        let cmd = DownCommand.add_arguments(clap::Command::new("down"));
        let matches = cmd.try_get_matches_from(["down"]).unwrap();
        assert_eq!(matches.get_one::<usize>("limit"), Some(&1));
        assert!(matches.get_one::<i64>("version").is_none());
        assert!(!matches.get_flag("dryrun"));
    }

    #[test]
    fn test_version_flag_parses() {
        let cmd = DownCommand.add_arguments(clap::Command::new("down"));
        let matches = cmd
            .try_get_matches_from(["down", "--version", "20240101120000"])
            .unwrap();
        assert_eq!(matches.get_one::<i64>("version"), Some(&20_240_101_120_000));
    }
}
