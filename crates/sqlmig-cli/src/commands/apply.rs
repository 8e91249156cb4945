//! Shared implementation of `up` and `down`.

use sqlmig_core::{MigrateResult, Settings};
use sqlmig_migrations::{Direction, PlanRequest};

use super::{count_message, render_plan, MigrationContext};

/// Adds the options `up` and `down` share.
pub fn apply_arguments(cmd: clap::Command, default_limit: &'static str) -> clap::Command {
    cmd.arg(
        clap::Arg::new("limit")
            .long("limit")
            .value_parser(clap::value_parser!(usize))
            .default_value(default_limit)
            .help("Maximum number of migrations to apply (0 = unlimited)"),
    )
    .arg(
        clap::Arg::new("version")
            .long("version")
            .value_parser(clap::value_parser!(i64))
            .help("Migrate up to and including this version"),
    )
    .arg(
        clap::Arg::new("dryrun")
            .long("dryrun")
            .action(clap::ArgAction::SetTrue)
            .help("Print the migrations that would run without applying them"),
    )
    .arg(
        clap::Arg::new("lock")
            .long("lock")
            .action(clap::ArgAction::SetTrue)
            .help("Hold the cooperative lock while migrating"),
    )
}

/// Plans and applies migrations in `direction` as directed by `matches`.
pub async fn apply_migrations(
    matches: &clap::ArgMatches,
    settings: &Settings,
    direction: Direction,
) -> MigrateResult<()> {
    let limit = matches.get_one::<usize>("limit").copied().unwrap_or(0);
    let version = matches.get_one::<i64>("version").copied();
    let dry_run = matches.get_flag("dryrun");
    let use_lock = matches.get_flag("lock");

    let ctx = MigrationContext::open(settings)?;
    let backend = ctx.backend();

    let request = version.map_or_else(
        || PlanRequest::max(direction, limit),
        |v| PlanRequest::to_version(direction, v),
    );

    if dry_run {
        let planned = ctx.set.plan(backend, &ctx.source, &request).await?;
        print!("{}", render_plan(&planned));
        return Ok(());
    }

    let result = if use_lock {
        ctx.set
            .exec_request_with_lock(backend, &ctx.source, &request, None)
            .await
    } else {
        match version {
            Some(v) => ctx.set.exec_version(backend, &ctx.source, direction, v).await,
            None => ctx.set.exec_max(backend, &ctx.source, direction, limit).await,
        }
    };

    match result {
        Ok(applied) => {
            println!("{}", count_message("Applied", applied));
            Ok(())
        }
        Err(e) => {
            if e.applied > 0 {
                println!("{}", count_message("Applied", e.applied));
            }
            Err(e.error)
        }
    }
}
