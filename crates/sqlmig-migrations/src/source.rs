//! Migration sources.
//!
//! A [`MigrationSource`] enumerates the migrations available to the planner,
//! sorted by the id ordering relation with every id unique. Three sources
//! are provided:
//!
//! - [`MemoryMigrationSource`] - an in-memory list, mostly for tests and
//!   programmatic use
//! - [`FileMigrationSource`] - a directory of `*.sql` files
//! - [`EmbeddedMigrationSource`] - `*.sql` files compiled into the binary
//!   with `rust-embed`

use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rust_embed::Embed;
use sqlmig_core::{MigrateError, MigrateResult};

use crate::migration::{LoadedMigration, Migration};
use crate::parser::parse_migration;

/// Produces the migrations available for planning.
pub trait MigrationSource: Send + Sync {
    /// Returns every migration, sorted by id with no duplicates.
    fn find_migrations(&self) -> MigrateResult<Vec<Migration>>;
}

/// Sorts `migrations` by id and rejects duplicate ids.
fn sorted_unique(mut migrations: Vec<Migration>) -> MigrateResult<Vec<Migration>> {
    let mut seen = HashSet::with_capacity(migrations.len());
    for migration in &migrations {
        if !seen.insert(migration.id()) {
            return Err(MigrateError::ConfigurationError(format!(
                "Duplicate migration id: {}",
                migration.id()
            )));
        }
    }
    migrations.sort_by(Migration::compare);
    Ok(migrations)
}

fn is_migration_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"))
}

// ── Memory ────────────────────────────────────────────────────────────

/// Migrations held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMigrationSource {
    migrations: Vec<Migration>,
}

impl MemoryMigrationSource {
    /// Creates a source from a list of migrations in any order.
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Adds a migration.
    pub fn push(&mut self, migration: Migration) {
        self.migrations.push(migration);
    }
}

impl MigrationSource for MemoryMigrationSource {
    fn find_migrations(&self) -> MigrateResult<Vec<Migration>> {
        sorted_unique(self.migrations.clone())
    }
}

// ── File ──────────────────────────────────────────────────────────────

/// Migrations read from `*.sql` files in one directory.
///
/// The file name (including the extension) is the migration id.
/// Subdirectories are not searched.
#[derive(Debug, Clone)]
pub struct FileMigrationSource {
    dir: PathBuf,
    lazy: bool,
}

impl FileMigrationSource {
    /// Creates a source for `dir`, parsing every file up front.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lazy: false,
        }
    }

    /// Defers reading and parsing each file until it is scheduled.
    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// The directory migrations are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn load_file(id: &str, path: &Path) -> MigrateResult<LoadedMigration> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        MigrateError::ConfigurationError(format!(
            "Cannot read migration file {}: {e}",
            path.display()
        ))
    })?;
    parse_migration(id, &text)
}

impl MigrationSource for FileMigrationSource {
    fn find_migrations(&self) -> MigrateResult<Vec<Migration>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            MigrateError::ConfigurationError(format!(
                "Cannot read migrations directory {}: {e}",
                self.dir.display()
            ))
        })?;

        let mut migrations = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                MigrateError::ConfigurationError(format!("Cannot read directory entry: {e}"))
            })?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if !is_migration_file(&id) {
                continue;
            }

            let migration = if self.lazy {
                let loader_id = id.clone();
                Migration::lazy(id, move || load_file(&loader_id, &path))
            } else {
                let body = load_file(&id, &path)?;
                Migration::new(id, body)
            };
            migrations.push(migration);
        }

        tracing::debug!(
            dir = %self.dir.display(),
            count = migrations.len(),
            lazy = self.lazy,
            "found migration files"
        );
        sorted_unique(migrations)
    }
}

// ── Embedded ──────────────────────────────────────────────────────────

/// Migrations compiled into the binary.
///
/// ```ignore
/// use rust_embed::Embed;
/// use sqlmig_migrations::EmbeddedMigrationSource;
///
/// #[derive(Embed)]
/// #[folder = "migrations/"]
/// struct Migrations;
///
/// let source = EmbeddedMigrationSource::<Migrations>::new();
/// ```
pub struct EmbeddedMigrationSource<E: Embed> {
    prefix: Option<String>,
    lazy: bool,
    _assets: PhantomData<fn() -> E>,
}

impl<E: Embed> std::fmt::Debug for EmbeddedMigrationSource<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedMigrationSource")
            .field("prefix", &self.prefix)
            .field("lazy", &self.lazy)
            .finish()
    }
}

impl<E: Embed> Default for EmbeddedMigrationSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Embed> EmbeddedMigrationSource<E> {
    /// Uses the `*.sql` files at the root of the embedded folder.
    pub const fn new() -> Self {
        Self {
            prefix: None,
            lazy: false,
            _assets: PhantomData,
        }
    }

    /// Uses the `*.sql` files directly inside `dir` of the embedded folder.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        let dir = dir.trim_matches('/');
        self.prefix = if dir.is_empty() {
            None
        } else {
            Some(format!("{dir}/"))
        };
        self
    }

    /// Defers parsing each file until it is scheduled.
    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    fn file_id<'p>(&self, path: &'p str) -> Option<&'p str> {
        let rest = match &self.prefix {
            Some(prefix) => path.strip_prefix(prefix.as_str())?,
            None => path,
        };
        (!rest.contains('/') && is_migration_file(rest)).then_some(rest)
    }
}

fn load_embedded<E: Embed>(id: &str, path: &str) -> MigrateResult<LoadedMigration> {
    let file = E::get(path).ok_or_else(|| {
        MigrateError::ConfigurationError(format!("Embedded migration {path} not found"))
    })?;
    let text = std::str::from_utf8(file.data.as_ref()).map_err(|e| MigrateError::Parse {
        migration_id: id.to_string(),
        message: format!("not valid UTF-8: {e}"),
    })?;
    parse_migration(id, text)
}

impl<E: Embed + 'static> MigrationSource for EmbeddedMigrationSource<E> {
    fn find_migrations(&self) -> MigrateResult<Vec<Migration>> {
        let mut migrations = Vec::new();
        for path in E::iter() {
            let Some(id) = self.file_id(path.as_ref()) else {
                continue;
            };
            let id = id.to_string();
            let migration = if self.lazy {
                let path = path.into_owned();
                let loader_id = id.clone();
                Migration::lazy(id, move || load_embedded::<E>(&loader_id, &path))
            } else {
                let body = load_embedded::<E>(&id, path.as_ref())?;
                Migration::new(id, body)
            };
            migrations.push(migration);
        }
        sorted_unique(migrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migration(id: &str) -> Migration {
        Migration::new(id, LoadedMigration::new(["SELECT 1;"], ["SELECT 0;"]))
    }

    fn ids(migrations: &[Migration]) -> Vec<&str> {
        migrations.iter().map(Migration::id).collect()
    }

    const BODY: &str = "-- +migrate Up\nCREATE TABLE t (id int);\n-- +migrate Down\nDROP TABLE t;\n";

    #[test]
    fn test_memory_source_sorts() {
        let source = MemoryMigrationSource::new(vec![
            migration("10_c"),
            migration("efg"),
            migration("2_b"),
        ]);
        let found = source.find_migrations().unwrap();
        assert_eq!(ids(&found), vec!["2_b", "10_c", "efg"]);
    }

    #[test]
    fn test_memory_source_rejects_duplicates() {
        let mut source = MemoryMigrationSource::default();
        source.push(migration("125"));
        source.push(migration("125"));
        let err = source.find_migrations().unwrap_err();
        assert!(matches!(err, MigrateError::ConfigurationError(_)));
        assert!(err.to_string().contains("Duplicate migration id: 125"));
    }

    #[test]
    fn test_file_source_reads_sql_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10_second.sql"), BODY).unwrap();
        std::fs::write(dir.path().join("2_first.sql"), BODY).unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();
        std::fs::create_dir(dir.path().join("3_nested.sql")).unwrap();

        let found = FileMigrationSource::new(dir.path()).find_migrations().unwrap();
        assert_eq!(ids(&found), vec!["2_first.sql", "10_second.sql"]);
        assert!(found.iter().all(Migration::is_loaded));
        assert_eq!(found[0].load().unwrap().down, vec!["DROP TABLE t;\n"]);
    }

    #[test]
    fn test_file_source_eager_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1_bad.sql"), "SELECT 1;\n").unwrap();
        let err = FileMigrationSource::new(dir.path())
            .find_migrations()
            .unwrap_err();
        assert!(matches!(err, MigrateError::Parse { .. }));
    }

    #[test]
    fn test_file_source_lazy_defers_parse() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1_bad.sql"), "SELECT 1;\n").unwrap();
        std::fs::write(dir.path().join("2_good.sql"), BODY).unwrap();

        let found = FileMigrationSource::new(dir.path())
            .lazy(true)
            .find_migrations()
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(!found[0].is_loaded());
        assert!(found[0].load().is_err());
        assert_eq!(found[1].load().unwrap().up.len(), 1);
    }

    #[test]
    fn test_file_source_missing_dir() {
        let err = FileMigrationSource::new("/definitely/not/here")
            .find_migrations()
            .unwrap_err();
        assert!(err.to_string().contains("Cannot read migrations directory"));
    }

    #[test]
    fn test_is_migration_file() {
        assert!(is_migration_file("1_init.sql"));
        assert!(is_migration_file("1_init.SQL"));
        assert!(!is_migration_file("1_init.sql.bak"));
        assert!(!is_migration_file("sql"));
    }
}
