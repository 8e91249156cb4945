//! The `skip` command.

use async_trait::async_trait;
use sqlmig_core::{MigrateError, Settings};
use sqlmig_migrations::Direction;

use super::{count_message, MigrationContext};
use crate::command::ManagementCommand;

/// Records pending migrations as applied without running them.
///
/// Useful when the schema was brought up to date by other means.
pub struct SkipCommand;

#[async_trait]
impl ManagementCommand for SkipCommand {
    fn name(&self) -> &'static str {
        "skip"
    }

    fn help(&self) -> &'static str {
        "Sets the database level to the most recent version available, without running the migrations"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("limit")
                .long("limit")
                .value_parser(clap::value_parser!(usize))
                .default_value("0")
                .help("Maximum number of migrations to skip (0 = unlimited)"),
        )
    }

    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> Result<(), MigrateError> {
        let limit = matches.get_one::<usize>("limit").copied().unwrap_or(0);
        let ctx = MigrationContext::open(settings)?;

        match ctx
            .set
            .skip_max(ctx.backend(), &ctx.source, Direction::Up, limit)
            .await
        {
            Ok(skipped) => {
                println!("{}", count_message("Skipped", skipped));
                Ok(())
            }
            Err(e) => {
                if e.applied > 0 {
                    println!("{}", count_message("Skipped", e.applied));
                }
                Err(e.error)
            }
        }
    }
}
