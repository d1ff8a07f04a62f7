//! Tracing setup for the `tunnelbar` binary.
//!
//! Everything goes to stderr (stdout is reserved for JSON output). When a
//! log directory is given, a daily-rolling file is written there as well.
//!
//! The filter comes from `TUNNELBAR_LOG`, then `RUST_LOG`, then
//! [`DEFAULT_FILTER`].

use crate::error::{MonitorError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Filter used when neither environment variable is set.
pub const DEFAULT_FILTER: &str = "tunnelbar=info";

/// Log file name prefix inside the log directory.
pub const LOG_FILE_PREFIX: &str = "tunnelbar.log";

/// Keeps the non-blocking writers flushing. Hold until the process exits.
#[must_use = "dropping the guards stops log output"]
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

/// Pick the filter directive from the two candidate variables.
pub fn filter_directive(tunnelbar_log: Option<String>, rust_log: Option<String>) -> String {
    tunnelbar_log
        .or(rust_log)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

fn env_filter() -> EnvFilter {
    let directive = filter_directive(
        std::env::var("TUNNELBAR_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
    );
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber.
pub fn init(log_dir: Option<&Path>) -> Result<LogGuards> {
    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                MonitorError::Logging(format!("cannot create log dir {}: {e}", dir.display()))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (nb_file, file_guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(nb_file);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer)
                .with(file_layer)
                .try_init()
                .map_err(|e| MonitorError::Logging(e.to_string()))?;
            Ok(LogGuards {
                _guards: vec![stderr_guard, file_guard],
            })
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr_layer)
                .try_init()
                .map_err(|e| MonitorError::Logging(e.to_string()))?;
            Ok(LogGuards {
                _guards: vec![stderr_guard],
            })
        }
    }
}
