//! # sqlmig-core
//!
//! Core types shared by every sqlmig crate: the error taxonomy, settings and
//! their loaders, and tracing setup. This crate has no database dependencies.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Environment-scoped migration settings
//! - [`settings_loader`] - TOML/JSON loading with environment overrides
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{ApplyError, ErrorKind, MigrateError, MigrateResult, PlanError, TxError};
pub use settings::{EnvironmentSettings, LockSettings, Settings};
