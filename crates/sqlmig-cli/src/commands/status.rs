//! The `status` command.

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlmig_core::{MigrateError, Settings};
use sqlmig_migrations::{Migration, MigrationRecord, MigrationSource};

use super::MigrationContext;
use crate::command::ManagementCommand;

/// Shows which migrations have been applied.
pub struct StatusCommand;

/// One line of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    /// The migration id.
    pub id: String,
    /// When it was applied, or `None` if it is pending.
    pub applied_at: Option<NaiveDateTime>,
}

/// Source migrations joined with the bookkeeping records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// One row per source migration, in source order.
    pub rows: Vec<StatusRow>,
    /// Records whose migration is missing from the source.
    pub missing: Vec<String>,
}

impl StatusReport {
    /// Joins `migrations` with `records` by id.
    pub fn build(migrations: &[Migration], records: &[MigrationRecord]) -> Self {
        let rows = migrations
            .iter()
            .map(|m| StatusRow {
                id: m.id().to_string(),
                applied_at: records
                    .iter()
                    .find(|r| r.id == m.id())
                    .map(|r| r.applied_at),
            })
            .collect();
        let missing = records
            .iter()
            .filter(|r| !migrations.iter().any(|m| m.id() == r.id))
            .map(|r| r.id.clone())
            .collect();
        Self { rows, missing }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<(&str, String)> = self
            .rows
            .iter()
            .map(|row| {
                let applied = row.applied_at.map_or_else(
                    || "no".to_string(),
                    |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                );
                (row.id.as_str(), applied)
            })
            .collect();

        let id_width = cells
            .iter()
            .map(|(id, _)| id.len())
            .chain(std::iter::once("MIGRATION".len()))
            .max()
            .unwrap_or_default();
        let applied_width = cells
            .iter()
            .map(|(_, applied)| applied.len())
            .chain(std::iter::once("APPLIED".len()))
            .max()
            .unwrap_or_default();
        let border = format!(
            "+{}+{}+",
            "-".repeat(id_width + 2),
            "-".repeat(applied_width + 2)
        );

        writeln!(f, "{border}")?;
        writeln!(
            f,
            "| {:<id_width$} | {:<applied_width$} |",
            "MIGRATION", "APPLIED"
        )?;
        writeln!(f, "{border}")?;
        for (id, applied) in &cells {
            writeln!(f, "| {id:<id_width$} | {applied:<applied_width$} |")?;
        }
        writeln!(f, "{border}")
    }
}

#[async_trait]
impl ManagementCommand for StatusCommand {
    fn name(&self) -> &'static str {
        "status"
    }

    fn help(&self) -> &'static str {
        "Show migration status"
    }

    async fn handle(
        &self,
        _matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> Result<(), MigrateError> {
        let ctx = MigrationContext::open(settings)?;
        let records = ctx.set.get_migration_records(ctx.backend()).await?;
        let migrations = ctx.source.find_migrations()?;

        let report = StatusReport::build(&migrations, &records);
        for id in &report.missing {
            tracing::warn!(migration = %id, "Could not find migration file: {id}");
        }
        print!("{report}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sqlmig_migrations::LoadedMigration;

    use super::*;

    fn migration(id: &str) -> Migration {
        Migration::new(id, LoadedMigration::new(["SELECT 1;"], ["SELECT 1;"]))
    }

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap()
    }

    #[test]
    fn test_build_joins_records() {
        let migrations = vec![migration("1_a.sql"), migration("2_b.sql")];
        let records = vec![
            MigrationRecord {
                id: "1_a.sql".into(),
                applied_at: at(),
            },
            MigrationRecord {
                id: "0_gone.sql".into(),
                applied_at: at(),
            },
        ];
        let report = StatusReport::build(&migrations, &records);
        assert_eq!(report.rows[0].applied_at, Some(at()));
        assert_eq!(report.rows[1].applied_at, None);
        assert_eq!(report.missing, vec!["0_gone.sql"]);
    }

    #[test]
    fn test_display_table() {
        let report = StatusReport {
            rows: vec![
                StatusRow {
                    id: "1_a.sql".into(),
                    applied_at: Some(at()),
                },
                StatusRow {
                    id: "2_b.sql".into(),
                    applied_at: None,
                },
            ],
            missing: Vec::new(),
        };
        let expected = "\
+-----------+-------------------------+
| MIGRATION | APPLIED                 |
+-----------+-------------------------+
| 1_a.sql   | 2024-03-01 12:30:00 UTC |
| 2_b.sql   | no                      |
+-----------+-------------------------+
";
        assert_eq!(report.to_string(), expected);
    }
}
