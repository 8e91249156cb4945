//! Logging integration for sqlmig.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating the spans that
//! migration runs and lock holders log under.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The filter is read from `settings.log_level` (e.g. "debug", "info",
/// "sqlmig_migrations=trace"). In debug mode a pretty, human-readable format
/// is used; otherwise a structured JSON format is used. Calling this more
/// than once is harmless: later calls leave the first subscriber in place.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one migration run against a bookkeeping table.
///
/// # Examples
///
/// ```
/// use sqlmig_core::logging::migration_span;
///
/// let span = migration_span("gorp_migrations", "up");
/// let _guard = span.enter();
/// tracing::info!("planning");
/// ```
pub fn migration_span(table: &str, direction: &str) -> tracing::Span {
    tracing::info_span!("migrate", table = table, direction = direction)
}

/// Creates a tracing span for a cooperative lock holder.
///
/// Every log entry emitted while acquiring, holding, or waiting on the lock
/// carries the holder id, so interleaved logs from several processes can be
/// told apart.
pub fn lock_span(holder: &str, lock_table: &str) -> tracing::Span {
    tracing::info_span!("lock", holder = holder, table = lock_table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_is_idempotent() {
        let settings = Settings::default();
        setup_logging(&settings);
        setup_logging(&settings);
    }

    #[test]
    fn test_setup_logging_bad_filter_falls_back() {
        let settings = Settings {
            log_level: "not a [valid filter".to_string(),
            ..Settings::default()
        };
        setup_logging(&settings);
    }

    #[test]
    fn test_spans_can_be_entered() {
        let span = lock_span("holder-1", "gorp_lock");
        let _guard = span.enter();
        let inner = migration_span("gorp_migrations", "down");
        let _inner_guard = inner.enter();
        tracing::debug!("inside spans");
    }
}
