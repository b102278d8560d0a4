//! Operation entry points.
//!
//! Each operation has two front doors:
//!
//! - `run_*` returns a report on success and a
//!   [`MidasError`](crate::error::MidasError) on failure
//! - the plain function (`mefa`, `meshed`, `melfp`) logs the outcome and
//!   returns the integer status code
//!
//! # Run lifecycle
//!
//! ```text
//!   options ──► EngineConfig (per-run overrides) ──► open dataset
//!          ──► load network ──► engine ──► write into staging area
//!          ──► commit all outputs (rename) ──► report
//! ```
//!
//! Any error before the commit drops the staging area, so a failed run
//! leaves no output behind.

mod mefa;
mod melfp;
mod meshed;

pub use mefa::{
    mefa, run_mefa, AccumulationReport, MefaOptions, ACCUMULATION_COLUMN, ACCUMULATION_NODATA,
    DEFAULT_ACCUM_PATH,
};
pub use melfp::{
    melfp, run_melfp, LongestFlowPathReport, MelfpOptions, COORDS_HEADER, DEFAULT_LFP_NAME,
    DEFAULT_LFP_OUTPUT,
};
pub use meshed::{
    meshed, run_meshed, MeshReport, MeshedOptions, BASINS_LAYER, BASIN_COLUMN,
    DEFAULT_BASINS_OUTPUT, HIERARCHY_FILE,
};

use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::dataset::{
    read_outlets, write_feature_collection, Compression, Dataset, Feature, Geometry,
    LoadedNetwork, OpenOptions, OutletOptions,
};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::network::DrainageNetwork;
use crate::outlets::OutletSet;
use crate::scheduler::TraversalScheduler;

/// File name of the re-materialized outlet layer.
pub const OUTLETS_FILE: &str = "outlets.geojson";

/// Writes a run report as JSON.
pub fn write_report<R: Serialize>(report: &R, path: &Path) -> Result<()> {
    crate::dataset::write_json(path, report, Compression::None)
}

/// Engine settings of one run.
fn run_engine(
    engine: &EngineConfig,
    num_threads: usize,
    tracing_stack_size: Option<usize>,
) -> Result<EngineConfig> {
    let mut engine = engine.clone().with_num_threads(num_threads);
    if let Some(size) = tracing_stack_size {
        engine = engine.with_tracing_stack_size(size);
    }
    engine.validate()?;
    Ok(engine)
}

/// Opens the input dataset and loads its network.
fn open_network(
    input_dir: &Path,
    dir_opts: Option<&str>,
    encoding: Option<&str>,
    use_lessmem: bool,
    engine: &EngineConfig,
    diagnostics: &mut Diagnostics,
) -> Result<LoadedNetwork> {
    let options = OpenOptions::parse(dir_opts.unwrap_or_default(), diagnostics)?;
    let dataset = Dataset::open(input_dir, options)?;
    dataset.load_network(encoding, use_lessmem, engine)
}

/// Where and how to read outlets.
struct OutletSource<'a> {
    path: &'a Path,
    layer: Option<&'a str>,
    options: Option<&'a str>,
    id_col: Option<&'a str>,
    oid_col: Option<&'a str>,
}

impl OutletSource<'_> {
    /// Reads the layer and snaps every outlet onto `network`.
    fn resolve<N: DrainageNetwork>(
        &self,
        network: &N,
        scheduler: &TraversalScheduler,
        diagnostics: &mut Diagnostics,
    ) -> Result<OutletSet> {
        let options = OutletOptions::parse(self.options.unwrap_or_default(), diagnostics)?;
        let records = read_outlets(self.path, self.layer, &options, self.id_col, self.oid_col)?;
        OutletSet::resolve(records, network, options.snap, scheduler, diagnostics)
    }
}

/// Writes the accepted outlets at their snapped positions.
fn write_outlets(path: &Path, outlets: &OutletSet) -> Result<()> {
    let features: Vec<Feature> = outlets
        .accepted()
        .iter()
        .map(|outlet| {
            Feature::new(Some(Geometry::Point(outlet.position)))
                .with_property("id", outlet.id)
                .with_property("ordinal", outlet.ordinal)
                .with_property("oid", outlet.oid.clone())
        })
        .collect();
    write_feature_collection(path, "outlets", &features)
}

fn log_cache_stats(network: &LoadedNetwork) {
    if let LoadedNetwork::Grid(grid) = network {
        if let Some(stats) = grid.cache_stats() {
            info!(
                loads = stats.loads,
                hits = stats.hits,
                evictions = stats.evictions,
                peak_resident = stats.peak_resident,
                "tile cache"
            );
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Logs the outcome of a run and converts it to a status code.
fn finish<R>(operation: &str, result: Result<R>, log: impl FnOnce(&R)) -> i32 {
    match result {
        Ok(report) => {
            log(&report);
            0
        }
        Err(e) => {
            let status = e.status();
            error!(operation, %status, error = %e, "run failed");
            status.code()
        }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
