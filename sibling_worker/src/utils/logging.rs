//! # Logging Initialization
//!
//! `init_logging()` installs the global `tracing` subscriber once per process
//! (guarded by `std::sync::Once`).
//!
//! - **Filter**: `RUST_LOG` when set, otherwise `"{level},sibling_worker=debug"`.
//! - **File** (`log_to_file = true`): daily rolling `sibling.log` in the user
//!   cache directory from `directories`, non-blocking, no ANSI colours.
//! - **Stderr**: used when requested, or when the cache directory is missing or
//!   not writable. ANSI colours on.
//!
//! Binaries call `init_logging("info", true)`; tests call `init_test_logging()`.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, path::Path, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

/// Trace-level logging to stderr for tests.
pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}

/// Initializes the global subscriber. Later calls are no-ops.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},sibling_worker=debug")))
        };

        if log_to_file
            && let Some(proj_dirs) = ProjectDirs::from("dev", "Sibling", "sibling")
            && can_write_to(proj_dirs.cache_dir())
        {
            let file_appender =
                tracing_appender::rolling::daily(proj_dirs.cache_dir(), "sibling.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let initialized = tracing_subscriber::registry()
                .with(env_filter())
                .with(layer().with_writer(non_blocking).with_ansi(false))
                .try_init()
                .is_ok();
            if initialized {
                // Leaked so buffered lines are flushed on exit.
                Box::leak(Box::new(guard));
                return;
            }
        }

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(layer().with_writer(stderr).with_ansi(true))
            .try_init();
    });

    Ok(())
}

/// `tracing_appender::rolling::daily` panics on an unwritable directory, so
/// probe it first.
fn can_write_to(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = dir.join(".sibling_log_test");
    match std::fs::write(&probe, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_test_logging();
        init_logging("info", false).unwrap();
        tracing::debug!("logging initialized twice without panicking");
    }

    #[test]
    fn test_write_probe() {
        let dir = tempfile::tempdir().unwrap();
        assert!(can_write_to(&dir.path().join("nested")));
    }
}
