//! # sqlmig
//!
//! Ordered, exactly-once SQL schema migrations with a cooperative database
//! lock.
//!
//! This is the meta-crate that re-exports the sub-crates for convenient
//! access. Depend on `sqlmig` to get everything, or on individual crates for
//! finer-grained control.
//!
//! ```rust,ignore
//! use sqlmig::migrations::{Direction, FileMigrationSource, MigrationSet};
//!
//! let backend = sqlmig::db_backends::connect("sqlite3", "app.db")?;
//! let applied = MigrationSet::new()
//!     .exec(backend.as_ref(), &FileMigrationSource::new("migrations"), Direction::Up)
//!     .await?;
//! ```

/// Error types, settings, settings loading, and logging.
pub use sqlmig_core as core;

/// Database backends: `PostgreSQL`, `MySQL`, `SQLite`.
pub use sqlmig_db_backends as db_backends;

/// Ordering, parsing, planning, execution, and the cooperative lock.
pub use sqlmig_migrations as migrations;

/// Command framework and built-in commands.
#[cfg(feature = "cli")]
pub use sqlmig_cli as cli;

/// Third-party crates callers commonly need alongside sqlmig.
pub mod reexports {
    pub use async_trait;
    pub use chrono;
    pub use rust_embed;
    pub use tokio;
    pub use tracing;
    pub use tracing_subscriber;
}

pub use sqlmig_core::{ApplyError, MigrateError, MigrateResult, Settings};
pub use sqlmig_migrations::{Direction, MigrationSet, MigrationSource};
