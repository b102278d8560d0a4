//! Resolved engine settings.

use crate::error::{MidasError, Result};
use crate::scheduler::CancelToken;

use super::file::ConfigFile;

/// Default trace stack capacity in frames per task.
///
/// Frames pushed past this bound are handed to the worker pool as new tasks.
pub const DEFAULT_TRACING_STACK_SIZE: usize = 4096;

/// Default number of seed nodes handed to one task.
pub const DEFAULT_SEED_CHUNK_SIZE: usize = 1024;

/// Default number of tiles a task keeps leased in less-memory mode.
///
/// Nine covers a tile and its eight neighbors.
pub const DEFAULT_MAX_LOCAL_TILES: usize = 9;

/// Settings shared by every engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker threads; 0 uses every logical CPU.
    pub num_threads: usize,
    /// Inline frame capacity of each task's trace stack.
    pub tracing_stack_size: usize,
    /// Seeds per spawned task.
    pub seed_chunk_size: usize,
    /// Tile lease bound per task in less-memory mode.
    pub max_local_tiles: usize,
    /// Shared cancellation flag.
    pub cancel: CancelToken,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            tracing_stack_size: DEFAULT_TRACING_STACK_SIZE,
            seed_chunk_size: DEFAULT_SEED_CHUNK_SIZE,
            max_local_tiles: DEFAULT_MAX_LOCAL_TILES,
            cancel: CancelToken::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds engine settings from a configuration file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        Self {
            num_threads: config.engine.num_threads,
            tracing_stack_size: config.engine.tracing_stack_size,
            seed_chunk_size: config.engine.seed_chunk_size,
            max_local_tiles: config.lessmem.max_local_tiles,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_tracing_stack_size(mut self, size: usize) -> Self {
        self.tracing_stack_size = size;
        self
    }

    pub fn with_seed_chunk_size(mut self, size: usize) -> Self {
        self.seed_chunk_size = size;
        self
    }

    pub fn with_max_local_tiles(mut self, tiles: usize) -> Self {
        self.max_local_tiles = tiles;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Number of workers the pool will actually run.
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.num_threads
        }
    }

    /// Checks that every bound is usable.
    pub fn validate(&self) -> Result<()> {
        if self.tracing_stack_size == 0 {
            return Err(MidasError::invalid_parameter(
                "tracing_stack_size",
                "must be at least 1",
            ));
        }
        if self.seed_chunk_size == 0 {
            return Err(MidasError::invalid_parameter(
                "seed_chunk_size",
                "must be at least 1",
            ));
        }
        if self.max_local_tiles == 0 {
            return Err(MidasError::invalid_parameter(
                "max_local_tiles",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
