//! Logging setup.
//!
//! The library only emits `tracing` events. Binaries call [`init_logging`]
//! once at startup to install a subscriber:
//!
//! ```text
//! registry
//!   ├── EnvFilter        (MIDASFLOW_LOG, else the configured level)
//!   ├── fmt layer        → stderr
//!   └── fmt layer        → <directory>/midasflow.YYYY-MM-DD.log   (optional)
//!                           via tracing_appender::non_blocking
//! ```
//!
//! # Example
//!
//! ```ignore
//! let _guard = init_logging(&LoggingConfig::default().with_level("debug"))?;
//! // keep `_guard` alive until exit so the file writer flushes
//! ```

use std::path::PathBuf;

use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigFile, DEFAULT_LOG_LEVEL};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV_VAR: &str = "MIDASFLOW_LOG";

/// Prefix of rolled log file names.
pub const DEFAULT_LOG_FILE_PREFIX: &str = "midasflow";

/// Errors from installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("cannot create log directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open log file in {}: {reason}", path.display())]
    Appender { path: PathBuf, reason: String },

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `midasflow=debug`.
    pub level: String,
    /// Directory for daily log files; stderr only when `None`.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
    /// Colored stderr output.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
            file_prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Takes level and directory from the `[logging]` section.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        Self {
            level: config.logging.level.clone(),
            directory: config.logging.directory.clone(),
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }
}

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes buffered log lines.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, LoggingError> {
    let filter = match EnvFilter::try_from_env(LOG_ENV_VAR) {
        Ok(filter) => filter,
        Err(_) => {
            EnvFilter::try_new(&config.level).map_err(|e| LoggingError::InvalidFilter {
                filter: config.level.clone(),
                reason: e.to_string(),
            })?
        }
    };

    let timer = OffsetTime::local_rfc_3339()
        .unwrap_or_else(|_| OffsetTime::new(UtcOffset::UTC, Rfc3339));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(timer.clone())
        .with_ansi(config.ansi);

    let (file_layer, file_guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::Directory {
                path: dir.clone(),
                source,
            })?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(dir)
                .map_err(|e| LoggingError::Appender {
                    path: dir.clone(),
                    reason: e.to_string(),
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_timer(timer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_file() {
        let mut file = ConfigFile::default();
        file.logging.level = "debug".to_string();
        file.logging.directory = Some(PathBuf::from("/tmp/mf-logs"));
        let config = LoggingConfig::from_config_file(&file);
        assert_eq!(config.level, "debug");
        assert_eq!(config.directory, Some(PathBuf::from("/tmp/mf-logs")));
        assert_eq!(config.file_prefix, DEFAULT_LOG_FILE_PREFIX);
    }

    #[test]
    fn test_builders() {
        let config = LoggingConfig::default()
            .with_level("warn")
            .with_directory("/tmp/x")
            .with_ansi(false);
        assert_eq!(config.level, "warn");
        assert!(!config.ansi);
        assert!(config.directory.is_some());
    }
}
