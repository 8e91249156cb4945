//! Settings loading from configuration files.
//!
//! This module provides functions to load [`Settings`] from TOML files, JSON
//! files, and to apply environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Expand `$VAR` / `${VAR}` references in every environment's datasource.
//! 4. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `SQLMIG_LOG_LEVEL` | `log_level` |
//! | `SQLMIG_DEBUG` | `debug` |
//! | `SQLMIG_ENV` | `default_environment` |
//! | `SQLMIG_DIALECT` | `dialect` of the default environment |
//! | `SQLMIG_DATASOURCE` | `datasource` of the default environment |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use sqlmig_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("sqlmig.toml").unwrap();
//! let env = settings.environment(None).unwrap();
//! println!("migrating {} from {}", env.dialect, env.dir.display());
//! ```
//!
//! A TOML file looks like:
//!
//! ```toml
//! default_environment = "development"
//!
//! [environments.development]
//! dialect = "sqlite3"
//! datasource = "test.db"
//! dir = "migrations/sqlite3"
//!
//! [environments.production]
//! dialect = "postgres"
//! datasource = "host=${DB_HOST} dbname=app user=app"
//! dir = "migrations/postgres"
//! table = "migrations"
//! ```

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::MigrateError;
use crate::settings::Settings;

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("valid regex")
});

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, MigrateError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| MigrateError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;
    from_json_value(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, MigrateError> {
    from_toml_str(&read_config(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, MigrateError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, MigrateError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| MigrateError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    from_json_value(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, MigrateError> {
    from_json_str(&read_config(path.as_ref(), "JSON")?)
}

/// Loads settings from a JSON file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file_with_env(path: impl AsRef<Path>) -> Result<Settings, MigrateError> {
    let mut settings = from_json_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a file, picking the format from its extension
/// (`.json` is JSON, anything else is TOML), then applies env overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Settings, MigrateError> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        from_json_file_with_env(path)
    } else {
        from_toml_file_with_env(path)
    }
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies environment variable overrides to a settings struct.
///
/// - `SQLMIG_LOG_LEVEL` -> `log_level`
/// - `SQLMIG_DEBUG` -> `debug` (values: "true"/"1"/"yes" => true, anything else => false)
/// - `SQLMIG_ENV` -> `default_environment`
/// - `SQLMIG_DIALECT` -> default environment's `dialect`
/// - `SQLMIG_DATASOURCE` -> default environment's `datasource` (expanded)
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("SQLMIG_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("SQLMIG_DEBUG") {
        settings.debug = matches!(val.to_lowercase().as_str(), "true" | "1" | "yes");
    }

    if let Ok(val) = std::env::var("SQLMIG_ENV") {
        if !val.trim().is_empty() {
            settings.default_environment = val;
        }
    }

    if let Ok(val) = std::env::var("SQLMIG_DIALECT") {
        settings.default_environment_mut().dialect = val;
    }

    if let Ok(val) = std::env::var("SQLMIG_DATASOURCE") {
        settings.default_environment_mut().datasource = expand_env(&val);
    }
}

/// Replaces `$VAR` and `${VAR}` with the value of the environment variable.
///
/// Unset variables expand to the empty string.
///
/// # Examples
///
/// ```
/// use sqlmig_core::settings_loader::expand_env;
///
/// assert_eq!(expand_env("no references"), "no references");
/// ```
pub fn expand_env(input: &str) -> String {
    ENV_REFERENCE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

// ============================================================
// Helpers
// ============================================================

fn read_config(path: &Path, format: &str) -> Result<String, MigrateError> {
    std::fs::read_to_string(path).map_err(|e| {
        MigrateError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

/// Merges a parsed document over the defaults and expands datasources.
fn from_json_value(value: serde_json::Value, format: &str) -> Result<Settings, MigrateError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        MigrateError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    let mut settings: Settings = serde_json::from_value(merged).map_err(|e| {
        MigrateError::ConfigurationError(format!(
            "Failed to deserialize settings from {format}: {e}"
        ))
    })?;

    for env in settings.environments.values_mut() {
        env.datasource = expand_env(&env.datasource);
    }
    Ok(settings)
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_environments() {
        let toml = r#"
            default_environment = "production"

            [environments.production]
            dialect = "postgres"
            datasource = "host=localhost dbname=app"
            dir = "migrations/postgres"
            table = "migrations"
            schema = "deploy"
            ignore_unknown = true
        "#;

        let settings = from_toml_str(toml).unwrap();
        let env = settings.environment(None).unwrap();
        assert_eq!(env.dialect, "postgres");
        assert_eq!(env.dir, PathBuf::from("migrations/postgres"));
        assert_eq!(env.table, "migrations");
        assert_eq!(env.schema.as_deref(), Some("deploy"));
        assert!(env.ignore_unknown);
        // Defaults preserved inside the environment
        assert_eq!(env.lock.table, "gorp_lock");
        assert!(!env.disable_create_table);
    }

    #[test]
    fn test_from_toml_str_lock_section() {
        let toml = r#"
            [environments.development]
            dialect = "mysql"
            datasource = "mysql://root@localhost/app"

            [environments.development.lock]
            wait_timeout_secs = 5
            poll_interval_ms = 25
        "#;

        let settings = from_toml_str(toml).unwrap();
        let lock = &settings.environment(None).unwrap().lock;
        assert_eq!(lock.wait_timeout_secs, 5);
        assert_eq!(lock.poll_interval_ms, 25);
        assert_eq!(lock.stale_after_secs, 300);
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_toml_str_wrong_type() {
        let toml = r#"
            [environments.development]
            ignore_unknown = "yes please"
        "#;
        assert!(from_toml_str(toml).is_err());
    }

    #[test]
    fn test_from_toml_str_expands_datasource() {
        std::env::set_var("SQLMIG_TEST_DB_HOST", "db.internal");
        let toml = r#"
            [environments.development]
            dialect = "postgres"
            datasource = "host=${SQLMIG_TEST_DB_HOST} port=$SQLMIG_TEST_UNSET_PORT"
        "#;
        let settings = from_toml_str(toml).unwrap();
        assert_eq!(
            settings.environment(None).unwrap().datasource,
            "host=db.internal port="
        );
        std::env::remove_var("SQLMIG_TEST_DB_HOST");
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{
            "log_level": "debug",
            "environments": {
                "development": {"dialect": "sqlite3", "datasource": "test.db"}
            }
        }"#;

        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.log_level, "debug");
        let env = settings.environment(None).unwrap();
        assert_eq!(env.datasource, "test.db");
        assert_eq!(env.table, "gorp_migrations");
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{invalid json").is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlmig.toml");
        std::fs::write(
            &path,
            "[environments.development]\ndialect = \"sqlite3\"\ndatasource = \"x.db\"\n",
        )
        .unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.environment(None).unwrap().dialect, "sqlite3");
    }

    #[test]
    fn test_from_file_with_env_picks_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sqlmig.json");
        std::fs::write(&path, r#"{"default_environment": "ci"}"#).unwrap();

        let settings = from_file_with_env(&path).unwrap();
        assert_eq!(settings.default_environment, "ci");
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/path/sqlmig.toml");
        assert!(result.is_err());
    }

    // ── Environment variable overrides ──────────────────────────────

    #[test]
    fn test_apply_env_overrides_datasource() {
        let mut settings = Settings::default();
        std::env::set_var("SQLMIG_TEST_PASSWORD", "hunter2");
        std::env::set_var("SQLMIG_DATASOURCE", "postgres://app:${SQLMIG_TEST_PASSWORD}@db/app");
        std::env::set_var("SQLMIG_DIALECT", "postgres");
        apply_env_overrides(&mut settings);
        let env = settings.environment(None).unwrap();
        assert_eq!(env.datasource, "postgres://app:hunter2@db/app");
        assert_eq!(env.dialect, "postgres");
        std::env::remove_var("SQLMIG_DATASOURCE");
        std::env::remove_var("SQLMIG_DIALECT");
        std::env::remove_var("SQLMIG_TEST_PASSWORD");
    }

    #[test]
    fn test_apply_env_overrides_debug() {
        let mut settings = Settings::default();
        std::env::set_var("SQLMIG_DEBUG", "1");
        apply_env_overrides(&mut settings);
        assert!(settings.debug);
        std::env::remove_var("SQLMIG_DEBUG");
    }

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn test_expand_env_unset_is_empty() {
        assert_eq!(expand_env("a${SQLMIG_TEST_NEVER_SET}b"), "ab");
    }

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"outer": {"a": 1, "b": 2}});
        let over = serde_json::json!({"outer": {"b": 3}});
        let merged = merge_json(base, over);
        assert_eq!(merged["outer"]["a"], 1);
        assert_eq!(merged["outer"]["b"], 3);
    }

    #[test]
    fn test_toml_to_json() {
        let toml_val: toml::Value = toml::from_str(
            r#"
            name = "test"
            count = 42
            [nested]
            key = "value"
        "#,
        )
        .unwrap();

        let json = toml_to_json(toml_val);
        assert_eq!(json["name"], "test");
        assert_eq!(json["count"], 42);
        assert_eq!(json["nested"]["key"], "value");
    }
}
