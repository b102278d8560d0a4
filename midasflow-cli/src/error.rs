//! CLI error type.

use midasflow::config::ConfigError;
use midasflow::logging::LoggingError;
use midasflow::Status;
use thiserror::Error;

/// Errors raised by the command-line front end itself.
///
/// Engine failures are not `CliError`s; they surface as the run's status.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] LoggingError),
}

impl CliError {
    /// Process exit status for this error.
    pub fn status(&self) -> Status {
        match self {
            CliError::Logging(_) => Status::ResourceError,
            CliError::Config(_) | CliError::ConfigFile(_) => Status::InputError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        assert_eq!(CliError::Config("bad".into()).status(), Status::InputError);
        let err = CliError::from(ConfigError::UnknownKey("x.y".into()));
        assert_eq!(err.status(), Status::InputError);
    }
}
