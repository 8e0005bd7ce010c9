//! Tracing setup for the server and CLI.
//!
//! Everything goes to a daily-rotated file under the XDG state dir
//! (`$XDG_STATE_HOME/beaconlens/beaconlens.log`); `-v` runs mirror it to
//! stderr.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Base name of the rolling log file.
pub const LOG_FILE_NAME: &str = "beaconlens.log";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `logging.level`. Hold the returned guard until
/// exit; dropping it flushes buffered lines.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let (file_writer, guard) = tracing_appender::non_blocking(rolling_file(&log_dir, config.max_files)?);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    let stderr_layer = config
        .stderr
        .then(|| fmt::layer().compact().with_writer(std::io::stderr).with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!(
        file = %log_file_path().display(),
        level = %config.level,
        stderr = config.stderr,
        "Logging initialized"
    );

    Ok(LoggingGuard { _file: guard })
}

fn rolling_file(dir: &Path, max_files: usize) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_NAME)
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot open log file in {}: {}", dir.display(), e)))
}

/// Test subscriber writing through the test harness. Safe to call from
/// every test; only the first call installs it.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Keeps the non-blocking file writer running.
pub struct LoggingGuard {
    _file: WorkerGuard,
}

pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path() {
        assert!(log_file_path().ends_with(LOG_FILE_NAME));
    }

    #[test]
    fn test_rolling_file_opens_in_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(rolling_file(dir.path(), 0).is_ok());
    }
}
