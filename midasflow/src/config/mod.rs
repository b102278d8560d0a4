//! Configuration.
//!
//! [`ConfigFile`] is the persisted INI file and [`ConfigKey`] addresses its
//! individual settings. [`EngineConfig`] is the resolved form handed to the
//! engines; explicit arguments override the file, which overrides the
//! built-in defaults.

mod engine;
mod file;
mod keys;

pub use engine::{
    EngineConfig, DEFAULT_MAX_LOCAL_TILES, DEFAULT_SEED_CHUNK_SIZE, DEFAULT_TRACING_STACK_SIZE,
};
pub use file::{
    config_file_path, ConfigError, ConfigFile, EngineSettings, LessMemSettings, LoggingSettings,
    OutputSettings, CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_LOG_LEVEL,
};
pub use keys::ConfigKey;
