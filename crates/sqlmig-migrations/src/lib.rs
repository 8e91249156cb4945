//! # sqlmig-migrations
//!
//! Migration engine for sqlmig. Discovers SQL migration files, decides
//! which ones need to run, applies them transactionally, and keeps the
//! bookkeeping table in step with the schema.
//!
//! ## Architecture
//!
//! - [`Migration`] is an identified pair of up/down statement lists, loaded
//!   eagerly or on first use.
//! - [`MigrationSource`] finds migrations in memory, in a directory, or in
//!   files embedded in the binary.
//! - [`plan`] turns the available migrations and the applied ids into an
//!   ordered list of [`PlannedMigration`] steps.
//! - [`Executor`] applies steps, each in its own transaction, and writes the
//!   bookkeeping row through a [`MigrationRecorder`].
//! - [`CooperativeLock`] serializes runs across processes sharing a database.
//! - [`MigrationSet`] ties the pieces together behind one configured value.
//!
//! ## Module Overview
//!
//! - [`ordering`] - Migration id ordering
//! - [`migration`] - `Migration`, `Direction`, `PlannedMigration`
//! - [`parser`] - The annotated SQL file format
//! - [`source`] - `MigrationSource` and its implementations
//! - [`planner`] - `plan`, `PlanRequest`
//! - [`recorder`] - `MigrationRecorder`
//! - [`executor`] - `Executor`, `StepScope`
//! - [`lock`] - `CooperativeLock`
//! - [`migration_set`] - `MigrationSet`

#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::cognitive_complexity)]

pub mod executor;
pub mod lock;
pub mod migration;
pub mod migration_set;
pub mod ordering;
pub mod parser;
pub mod planner;
pub mod recorder;
pub mod source;

// Re-export key types at the crate root.
pub use executor::{trim_statement, Executor, StepScope};
pub use lock::{CooperativeLock, LockOutcome};
pub use migration::{
    Direction, LoadedMigration, Migration, MigrationRecord, PlannedMigration,
};
pub use migration_set::MigrationSet;
pub use ordering::compare_ids;
pub use parser::parse_migration;
pub use planner::{plan, PlanRequest};
pub use recorder::MigrationRecorder;
pub use source::{
    EmbeddedMigrationSource, FileMigrationSource, MemoryMigrationSource, MigrationSource,
};
