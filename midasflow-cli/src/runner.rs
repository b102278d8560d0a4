//! Shared setup for the operation commands.
//!
//! A [`CliRunner`] loads the configuration file, installs logging, and
//! hands out [`EngineConfig`]s whose cancel token is wired to Ctrl+C.

use std::path::Path;

use tracing::{error, info, warn};

use midasflow::config::{config_file_path, ConfigFile, EngineConfig};
use midasflow::logging::{init_logging, LoggingConfig, LoggingGuard};
use midasflow::scheduler::CancelToken;
use midasflow::Status;

use crate::commands::RunReport;
use crate::error::CliError;

/// Per-invocation state of an operation command.
pub struct CliRunner {
    config: ConfigFile,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Loads the configuration and starts logging.
    ///
    /// A missing configuration file means defaults; an unreadable one is an
    /// error.
    pub fn new() -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let logging = init_logging(&LoggingConfig::from_config_file(&config))?;
        Ok(Self {
            config,
            _logging: logging,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = midasflow::VERSION,
            command,
            config = %config_file_path().display(),
            "midasflow starting"
        );
    }

    /// Engine settings from the configuration file.
    ///
    /// The returned config carries a cancel token that Ctrl+C sets.
    pub fn engine(&self) -> Result<EngineConfig, CliError> {
        let cancel = CancelToken::new();
        let handler_token = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Received interrupt, cancelling...");
            handler_token.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

        Ok(EngineConfig::from_config_file(&self.config).with_cancel_token(cancel))
    }

    /// Logs the outcome of a run, writes its report when asked, and returns
    /// the exit status.
    pub fn complete<R: RunReport>(
        &self,
        operation: &str,
        result: midasflow::Result<R>,
        report_path: Option<&Path>,
    ) -> Status {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                let status = e.status();
                error!(operation, %status, error = %e, "run failed");
                eprintln!("Error: {}", e);
                return status;
            }
        };

        report.log();
        report.print_summary();
        if let Some(path) = report_path {
            if let Err(e) = midasflow::ops::write_report(&report, path) {
                warn!(path = %path.display(), error = %e, "report not written");
                eprintln!("Error: {}", e);
                return e.status();
            }
            println!("Report: {}", path.display());
        }
        Status::Success
    }
}
