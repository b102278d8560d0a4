//! INI configuration file.
//!
//! Settings live in `~/.config/midasflow/config.ini`:
//!
//! ```ini
//! [engine]
//! num_threads = 0
//! tracing_stack_size = 4096
//! seed_chunk_size = 1024
//!
//! [lessmem]
//! max_local_tiles = 9
//!
//! [output]
//! compress = false
//!
//! [logging]
//! level = info
//! directory = /var/log/midasflow
//! ```
//!
//! Missing files and missing keys fall back to the built-in defaults.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use super::engine::{DEFAULT_MAX_LOCAL_TILES, DEFAULT_SEED_CHUNK_SIZE, DEFAULT_TRACING_STACK_SIZE};

/// Directory name under the platform config directory.
pub const CONFIG_DIR_NAME: &str = "midasflow";

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors from loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// Returns the path of the user configuration file.
///
/// Falls back to the current directory when the platform has no config
/// directory.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

/// Parsed configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub engine: EngineSettings,
    pub lessmem: LessMemSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Worker threads; 0 uses every logical CPU.
    pub num_threads: usize,
    pub tracing_stack_size: usize,
    pub seed_chunk_size: usize,
}

/// `[lessmem]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LessMemSettings {
    /// Tiles each traversal task may hold at once.
    pub max_local_tiles: usize,
}

/// `[output]` section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputSettings {
    pub compress: bool,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub directory: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            num_threads: 0,
            tracing_stack_size: DEFAULT_TRACING_STACK_SIZE,
            seed_chunk_size: DEFAULT_SEED_CHUNK_SIZE,
        }
    }
}

impl Default for LessMemSettings {
    fn default() -> Self {
        Self {
            max_local_tiles: DEFAULT_MAX_LOCAL_TILES,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            lessmem: LessMemSettings::default(),
            output: OutputSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ConfigFile {
    /// Loads the user configuration file, or defaults if it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Loads a configuration file, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::default();
        for key in super::ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|props| props.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Saves to the user configuration file.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Saves to a specific path, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut ini = Ini::new();
        for key in super::ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini.write_to_file(path).map_err(write_err)
    }
}
