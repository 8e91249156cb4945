//! The `new` command.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlmig_core::{MigrateError, MigrateResult, Settings};

use super::selected_environment;
use crate::command::ManagementCommand;

const TEMPLATE: &str = "\n-- +migrate Up\n\n-- +migrate Down\n";

/// Creates an empty migration file in the environment's directory.
pub struct NewCommand;

/// Writes `<dir>/<timestamp>-<name>.sql` from the Up/Down template.
///
/// # Errors
///
/// Returns [`MigrateError::ConfigurationError`] when `dir` does not exist,
/// the name is empty or contains a path separator, or the file already
/// exists.
pub fn create_migration_file(
    dir: &Path,
    name: &str,
    now: DateTime<Utc>,
) -> MigrateResult<PathBuf> {
    if !dir.is_dir() {
        return Err(MigrateError::ConfigurationError(format!(
            "Migrations directory {} does not exist",
            dir.display()
        )));
    }
    let name = name.trim();
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(MigrateError::ConfigurationError(format!(
            "Invalid migration name '{name}'"
        )));
    }

    let path = dir.join(format!("{}-{name}.sql", now.format("%Y%m%d%H%M%S")));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                MigrateError::ConfigurationError(format!(
                    "Migration file {} already exists",
                    path.display()
                ))
            } else {
                MigrateError::IoError(e)
            }
        })?;
    file.write_all(TEMPLATE.as_bytes())?;
    Ok(path)
}

#[async_trait]
impl ManagementCommand for NewCommand {
    fn name(&self) -> &'static str {
        "new"
    }

    fn help(&self) -> &'static str {
        "Create a new migration"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd.arg(
            clap::Arg::new("name")
                .help("Name of the migration")
                .required(true),
        )
    }

    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> Result<(), MigrateError> {
        let name = matches
            .get_one::<String>("name")
            .ok_or_else(|| MigrateError::ConfigurationError("A name is required".to_string()))?;
        let env = selected_environment(settings)?;
        let path = create_migration_file(&env.dir, name, Utc::now())?;
        println!("Created migration {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use sqlmig_migrations::parse_migration;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_creates_parseable_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_migration_file(dir.path(), "add_users", now()).unwrap();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("20240506070809-add_users.sql")
        );

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed = parse_migration("20240506070809-add_users.sql", &text).unwrap();
        assert!(parsed.up.is_empty());
        assert!(parsed.down.is_empty());
    }

    #[test]
    fn test_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        create_migration_file(dir.path(), "twice", now()).unwrap();
        let err = create_migration_file(dir.path(), "twice", now()).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_migration_file(&dir.path().join("nope"), "x", now()).unwrap_err();
        assert!(matches!(err, MigrateError::ConfigurationError(_)));
    }

    #[test]
    fn test_rejects_path_in_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(create_migration_file(dir.path(), "../escape", now()).is_err());
        assert!(create_migration_file(dir.path(), "  ", now()).is_err());
    }
}
