//! Flow accumulation run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::accumulation::{Accumulation, FlowAccumulation};
use crate::config::EngineConfig;
use crate::dataset::{write_node_values, Compression, LoadedNetwork, StagedOutputs, ValueType};
use crate::diagnostics::{Diagnostics, Issue};
use crate::error::Result;
use crate::network::{DrainageNetwork, NetworkKind};
use crate::scheduler::{MetricsSnapshot, TraversalScheduler};

use super::{elapsed_ms, finish, log_cache_stats, open_network, run_engine};

/// Output path used when none is given.
pub const DEFAULT_ACCUM_PATH: &str = "accumulation";

/// Value column of table outputs.
pub const ACCUMULATION_COLUMN: &str = "accumulation";

/// Grid cells that are not nodes.
pub const ACCUMULATION_NODATA: f64 = -9999.0;

/// Inputs of a flow accumulation run.
#[derive(Debug, Clone, Default)]
pub struct MefaOptions {
    pub input_dir: PathBuf,
    pub dir_opts: Option<String>,
    pub encoding: Option<String>,
    pub accum_path: Option<PathBuf>,
    pub use_lessmem: bool,
    pub compress_output: bool,
    /// Worker threads; 0 uses every logical CPU.
    pub num_threads: usize,
}

impl MefaOptions {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_accum_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.accum_path = Some(path.into());
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }
}

/// Outcome of a successful flow accumulation run.
#[derive(Debug, Clone, Serialize)]
pub struct AccumulationReport {
    pub network: &'static str,
    pub nodes: usize,
    pub headwaters: usize,
    pub orphans: usize,
    pub max_accumulation: Option<f64>,
    pub outputs: Vec<PathBuf>,
    pub metrics: MetricsSnapshot,
    pub elapsed_ms: u64,
    pub diagnostics: Diagnostics,
}

impl AccumulationReport {
    pub fn log(&self) {
        self.diagnostics.log_summary("mefa");
        info!(
            network = self.network,
            nodes = self.nodes,
            headwaters = self.headwaters,
            orphans = self.orphans,
            max = self.max_accumulation,
            elapsed_ms = self.elapsed_ms,
            "flow accumulation finished"
        );
    }
}

/// Computes flow accumulation and writes it to `accum_path`.
pub fn run_mefa(options: &MefaOptions, engine: &EngineConfig) -> Result<AccumulationReport> {
    let started = Instant::now();
    let engine = run_engine(engine, options.num_threads, None)?;
    let mut diagnostics = Diagnostics::new();

    let network = open_network(
        &options.input_dir,
        options.dir_opts.as_deref(),
        options.encoding.as_deref(),
        options.use_lessmem,
        &engine,
        &mut diagnostics,
    )?;
    let scheduler = TraversalScheduler::new(&engine)?;

    let target = options
        .accum_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ACCUM_PATH));
    let mut outputs = StagedOutputs::new();
    let staged = outputs.stage(&target)?;
    let compression = Compression::from_flag(options.compress_output);

    let accumulation = match &network {
        LoadedNetwork::Grid(grid) => {
            accumulate(grid, &scheduler, &staged, compression, &mut diagnostics)?
        }
        LoadedNetwork::Table(table) => {
            accumulate(table, &scheduler, &staged, compression, &mut diagnostics)?
        }
    };
    log_cache_stats(&network);
    let committed = outputs.commit()?;

    Ok(AccumulationReport {
        network: network.kind_name(),
        nodes: accumulation.nodes,
        headwaters: accumulation.headwaters,
        orphans: accumulation.orphans,
        max_accumulation: accumulation.max(),
        outputs: committed,
        metrics: accumulation.metrics,
        elapsed_ms: elapsed_ms(started),
        diagnostics,
    })
}

/// Flow accumulation entry point returning a status code.
pub fn mefa(options: &MefaOptions, engine: &EngineConfig) -> i32 {
    finish("mefa", run_mefa(options, engine), AccumulationReport::log)
}

fn accumulate<N: DrainageNetwork>(
    network: &N,
    scheduler: &TraversalScheduler,
    staged: &Path,
    compression: Compression,
    diagnostics: &mut Diagnostics,
) -> Result<Accumulation> {
    let accumulation = FlowAccumulation::compute(network, scheduler)?;
    if accumulation.orphans > 0 {
        diagnostics.push(Issue::OrphanNodes {
            count: accumulation.orphans,
            sample: accumulation
                .orphan_sample
                .iter()
                .map(|&node| network.describe(node))
                .collect(),
        });
    }

    let nodata = match network.kind() {
        NetworkKind::Grid => Some(ACCUMULATION_NODATA),
        NetworkKind::Table => None,
    };
    write_node_values(
        staged,
        network.layout(),
        ACCUMULATION_COLUMN,
        ValueType::F64,
        nodata,
        |node| accumulation.value_or(node, ACCUMULATION_NODATA),
        compression,
    )?;
    Ok(accumulation)
}
