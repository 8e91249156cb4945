//! Command framework for the `sqlmig` binary.
//!
//! This module provides the [`ManagementCommand`] trait for defining CLI commands
//! and [`CommandRegistry`] for registering and dispatching them.
//!
//! ## Defining a Custom Command
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use sqlmig_cli::command::ManagementCommand;
//! use sqlmig_core::{MigrateError, Settings};
//!
//! struct PingCommand;
//!
//! #[async_trait]
//! impl ManagementCommand for PingCommand {
//!     fn name(&self) -> &str { "ping" }
//!     fn help(&self) -> &str { "Check the configuration loads" }
//!
//!     async fn handle(
//!         &self,
//!         _matches: &clap::ArgMatches,
//!         settings: &Settings,
//!     ) -> Result<(), MigrateError> {
//!         println!("environment: {}", settings.default_environment);
//!         Ok(())
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use sqlmig_core::{settings_loader, MigrateError, Settings};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "sqlmig.toml";

/// A command that can be registered and invoked through the CLI.
///
/// Implementations define a name, help text, optional arguments, and an
/// async handler. All commands must be `Send + Sync`.
#[async_trait]
pub trait ManagementCommand: Send + Sync {
    /// Returns the name of this command (used to invoke it from the CLI).
    fn name(&self) -> &str;

    /// Returns a short help description for this command.
    fn help(&self) -> &str;

    /// Adds custom arguments to the clap command.
    ///
    /// The default implementation returns the command unchanged.
    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        cmd
    }

    /// Executes the command with the given argument matches and settings.
    ///
    /// `settings.default_environment` is the environment selected with
    /// `--env` (or the configured default).
    async fn handle(
        &self,
        matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> Result<(), MigrateError>;
}

/// A registry of commands, keyed by name.
pub struct CommandRegistry {
    commands: HashMap<String, Box<dyn ManagementCommand>>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Creates a new empty command registry.
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Registers a command, replacing any command with the same name.
    pub fn register(&mut self, command: Box<dyn ManagementCommand>) {
        let name = command.name().to_string();
        self.commands.insert(name, command);
    }

    /// Returns the command with the given name, if registered.
    pub fn get(&self, name: &str) -> Option<&dyn ManagementCommand> {
        self.commands.get(name).map(AsRef::as_ref)
    }

    /// Returns a sorted list of all registered command names.
    pub fn list_commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if no commands are registered.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Builds the top-level clap `Command` with the global `--config` and
    /// `--env` options and one subcommand per registered command.
    pub fn build_cli(&self) -> clap::Command {
        let mut app = clap::Command::new("sqlmig")
            .about("SQL schema migration tool")
            .subcommand_required(true)
            .arg(
                clap::Arg::new("config")
                    .long("config")
                    .global(true)
                    .help("Configuration file (TOML, or JSON by extension)"),
            )
            .arg(
                clap::Arg::new("env")
                    .long("env")
                    .global(true)
                    .help("Environment to use"),
            );

        let mut entries: Vec<_> = self.commands.iter().collect();
        entries.sort_by_key(|(name, _)| (*name).clone());

        for (name, cmd) in entries {
            // clap wants &'static str names; commands are registered once at
            // startup.
            let static_name: &'static str = Box::leak(name.clone().into_boxed_str());
            let subcmd = clap::Command::new(static_name).about(cmd.help().to_string());
            let subcmd = cmd.add_arguments(subcmd);
            app = app.subcommand(subcmd);
        }

        app
    }

    /// Dispatches to the subcommand named in `matches`.
    pub async fn execute(
        &self,
        matches: &clap::ArgMatches,
        settings: &Settings,
    ) -> Result<(), MigrateError> {
        let (name, sub_matches) = matches.subcommand().ok_or_else(|| {
            MigrateError::ConfigurationError("No subcommand specified".to_string())
        })?;

        let cmd = self.get(name).ok_or_else(|| {
            MigrateError::ConfigurationError(format!("Unknown command: {name}"))
        })?;

        cmd.handle(sub_matches, settings).await
    }
}

/// Loads settings for a parsed command line.
///
/// Reads `--config` (or [`DEFAULT_CONFIG_FILE`] when present), applies the
/// `SQLMIG_*` environment overrides, then selects `--env` as the default
/// environment.
///
/// # Errors
///
/// Returns an error when an explicitly named config file cannot be read or
/// parsed.
pub fn load_settings(matches: &clap::ArgMatches) -> Result<Settings, MigrateError> {
    let mut settings = match matches.get_one::<String>("config") {
        Some(path) => settings_loader::from_file_with_env(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            settings_loader::from_file_with_env(DEFAULT_CONFIG_FILE)?
        }
        None => settings_loader::from_env(),
    };
    if let Some(env) = matches.get_one::<String>("env") {
        settings.default_environment.clone_from(env);
    }
    Ok(settings)
}
