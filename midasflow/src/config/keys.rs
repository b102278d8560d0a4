//! Addressable configuration keys for `config get|set|list`.

use std::path::PathBuf;
use std::str::FromStr;

use super::file::{ConfigError, ConfigFile};

/// Every `section.key` the configuration file understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    EngineNumThreads,
    EngineTracingStackSize,
    EngineSeedChunkSize,
    LessMemMaxLocalTiles,
    OutputCompress,
    LoggingLevel,
    LoggingDirectory,
}

const ALL_KEYS: [ConfigKey; 7] = [
    ConfigKey::EngineNumThreads,
    ConfigKey::EngineTracingStackSize,
    ConfigKey::EngineSeedChunkSize,
    ConfigKey::LessMemMaxLocalTiles,
    ConfigKey::OutputCompress,
    ConfigKey::LoggingLevel,
    ConfigKey::LoggingDirectory,
];

const NOT_SET: &str = "(not set)";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl ConfigKey {
    /// All keys, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &ALL_KEYS
    }

    /// Full `section.key` name.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::EngineNumThreads
            | ConfigKey::EngineTracingStackSize
            | ConfigKey::EngineSeedChunkSize => "engine",
            ConfigKey::LessMemMaxLocalTiles => "lessmem",
            ConfigKey::OutputCompress => "output",
            ConfigKey::LoggingLevel | ConfigKey::LoggingDirectory => "logging",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::EngineNumThreads => "num_threads",
            ConfigKey::EngineTracingStackSize => "tracing_stack_size",
            ConfigKey::EngineSeedChunkSize => "seed_chunk_size",
            ConfigKey::LessMemMaxLocalTiles => "max_local_tiles",
            ConfigKey::OutputCompress => "compress",
            ConfigKey::LoggingLevel => "level",
            ConfigKey::LoggingDirectory => "directory",
        }
    }

    /// Current value as a string; empty when unset.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::EngineNumThreads => config.engine.num_threads.to_string(),
            ConfigKey::EngineTracingStackSize => config.engine.tracing_stack_size.to_string(),
            ConfigKey::EngineSeedChunkSize => config.engine.seed_chunk_size.to_string(),
            ConfigKey::LessMemMaxLocalTiles => config.lessmem.max_local_tiles.to_string(),
            ConfigKey::OutputCompress => config.output.compress.to_string(),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
            ConfigKey::LoggingDirectory => config
                .logging
                .directory
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Value as shown to users; `(not set)` when empty.
    pub fn display_value(&self, config: &ConfigFile) -> String {
        let value = self.get(config);
        if value.is_empty() {
            NOT_SET.to_string()
        } else {
            value
        }
    }

    /// One-line description for listings.
    pub fn help(&self) -> &'static str {
        match self {
            ConfigKey::EngineNumThreads => "worker threads, 0 = all CPUs",
            ConfigKey::EngineTracingStackSize => "inline frames before work spills to a new task",
            ConfigKey::EngineSeedChunkSize => "start nodes handed to one task",
            ConfigKey::LessMemMaxLocalTiles => "tiles a task keeps leased in less-memory mode",
            ConfigKey::OutputCompress => "gzip output layers",
            ConfigKey::LoggingLevel => "trace, debug, info, warn or error",
            ConfigKey::LoggingDirectory => "daily log files; stderr only when unset",
        }
    }

    /// Keys grouped by section, in file order.
    pub fn by_section() -> Vec<(&'static str, Vec<ConfigKey>)> {
        let mut sections: Vec<(&'static str, Vec<ConfigKey>)> = Vec::new();
        for &key in Self::all() {
            match sections.last_mut() {
                Some((section, keys)) if *section == key.section() => keys.push(key),
                _ => sections.push((key.section(), vec![key])),
            }
        }
        sections
    }

    /// Parses and stores a value.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            ConfigKey::EngineNumThreads => config.engine.num_threads = self.parse_count(value, 0)?,
            ConfigKey::EngineTracingStackSize => {
                config.engine.tracing_stack_size = self.parse_count(value, 1)?
            }
            ConfigKey::EngineSeedChunkSize => {
                config.engine.seed_chunk_size = self.parse_count(value, 1)?
            }
            ConfigKey::LessMemMaxLocalTiles => {
                config.lessmem.max_local_tiles = self.parse_count(value, 1)?
            }
            ConfigKey::OutputCompress => config.output.compress = self.parse_bool(value)?,
            ConfigKey::LoggingLevel => {
                let level = value.to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(self.invalid(value, "expected trace, debug, info, warn or error"));
                }
                config.logging.level = level;
            }
            ConfigKey::LoggingDirectory => {
                config.logging.directory = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
        }
        Ok(())
    }

    fn parse_count(&self, value: &str, min: usize) -> Result<usize, ConfigError> {
        let n: usize = value
            .parse()
            .map_err(|_| self.invalid(value, "expected a non-negative integer"))?;
        if n < min {
            return Err(self.invalid(value, &format!("must be at least {}", min)));
        }
        Ok(n)
    }

    fn parse_bool(&self, value: &str) -> Result<bool, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(self.invalid(value, "expected true or false")),
        }
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ALL_KEYS
            .iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}
