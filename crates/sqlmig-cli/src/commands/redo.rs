//! The `redo` command.

use async_trait::async_trait;
use sqlmig_core::{MigrateError, PlanError, Settings};
use sqlmig_migrations::{Direction, MigrationSource, PlannedMigration};

use super::{render_plan, MigrationContext};
use crate::command::ManagementCommand;

/// Undoes the most recently applied migration and applies it again.
pub struct RedoCommand;

/// Binds the source's copy of `id` to the up direction.
fn up_step(source: &dyn MigrationSource, id: &str) -> Result<PlannedMigration, MigrateError> {
    let migration = source
        .find_migrations()?
        .into_iter()
        .find(|m| m.id() == id)
        .ok_or_else(|| PlanError::new(id, "migration file not found"))?;
    let body = migration.load()?;
    Ok(PlannedMigration::new(id, &body, Direction::Up))
}

#[async_trait]
impl ManagementCommand for RedoCommand {
    fn name(&self) -> &'static str {
        "redo"
    }

    fn help(&self) -> &'static str {
        "Reapply the last migration"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("dryrun")
                .long("dryrun")
                .action(clap::ArgAction::SetTrue)
                .help("Print the migrations that would run without applying them"),
        )
    }

    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> Result<(), MigrateError> {
        let ctx = MigrationContext::open(settings)?;
        let backend = ctx.backend();

        let planned = ctx
            .set
            .plan_migration(backend, &ctx.source, Direction::Down, 1)
            .await?;
        let Some(down) = planned.into_iter().find(|s| s.direction == Direction::Down) else {
            println!("Nothing to do!");
            return Ok(());
        };

        if matches.get_flag("dryrun") {
            let up = up_step(&ctx.source, &down.id)?;
            print!("{}", render_plan(&[down, up]));
            return Ok(());
        }

        ctx.set
            .exec_max(backend, &ctx.source, Direction::Down, 1)
            .await
            .map_err(|e| e.error)?;
        ctx.set
            .exec_max(backend, &ctx.source, Direction::Up, 1)
            .await
            .map_err(|e| e.error)?;
        println!("Reapplied migration {}.", down.id);
        Ok(())
    }
}
