//! Hierarchical basin mesh run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::config::EngineConfig;
use crate::dataset::{
    write_feature_collection, write_node_values, Compression, Feature, LoadedNetwork,
    StagedOutputs, ValueType,
};
use crate::diagnostics::{Diagnostics, Issue};
use crate::error::{MidasError, Result};
use crate::mesh::{Mesh, MeshBuilder, UNASSIGNED};
use crate::network::DrainageNetwork;
use crate::scheduler::{DownstreamSweep, MetricsSnapshot, TraversalScheduler, ValidateOnly};

use super::{
    elapsed_ms, finish, log_cache_stats, open_network, run_engine, write_outlets, OutletSource,
    OUTLETS_FILE,
};

/// Output directory used when none is given.
pub const DEFAULT_BASINS_OUTPUT: &str = "basins";

/// Value column of table outputs.
pub const BASIN_COLUMN: &str = "basin";

/// Boundary layer inside the output directory.
pub const BASINS_LAYER: &str = "basins";

/// Hierarchy file inside the output directory when no path is given.
pub const HIERARCHY_FILE: &str = "hierarchy.csv";

/// Inputs of a mesh run.
#[derive(Debug, Clone, Default)]
pub struct MeshedOptions {
    pub input_dir: PathBuf,
    pub dir_opts: Option<String>,
    pub encoding: Option<String>,
    /// Outlet layer file or directory; the input directory when absent.
    pub outlets_path: Option<PathBuf>,
    pub outlets_layer: Option<String>,
    pub outlets_opts: Option<String>,
    pub id_col: Option<String>,
    pub output_path: Option<PathBuf>,
    pub hier_path: Option<PathBuf>,
    pub use_lessmem: bool,
    pub compress_output: bool,
    pub save_outlets: bool,
    pub num_threads: usize,
    pub tracing_stack_size: Option<usize>,
}

impl MeshedOptions {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_outlets(mut self, path: impl Into<PathBuf>, id_col: Option<&str>) -> Self {
        self.outlets_path = Some(path.into());
        self.id_col = id_col.map(str::to_string);
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }
}

/// Outcome of a successful mesh run.
#[derive(Debug, Clone, Serialize)]
pub struct MeshReport {
    pub network: &'static str,
    pub nodes: usize,
    pub outlets_read: usize,
    pub basins: usize,
    pub roots: usize,
    pub unassigned: usize,
    pub outputs: Vec<PathBuf>,
    pub metrics: MetricsSnapshot,
    pub elapsed_ms: u64,
    pub diagnostics: Diagnostics,
}

impl MeshReport {
    pub fn log(&self) {
        self.diagnostics.log_summary("meshed");
        info!(
            network = self.network,
            nodes = self.nodes,
            basins = self.basins,
            roots = self.roots,
            unassigned = self.unassigned,
            elapsed_ms = self.elapsed_ms,
            "basin mesh finished"
        );
    }
}

struct MeshOutcome {
    nodes: usize,
    outlets_read: usize,
    mesh: Mesh,
}

/// Builds the basin mesh for an outlet layer and writes it out.
pub fn run_meshed(options: &MeshedOptions, engine: &EngineConfig) -> Result<MeshReport> {
    let started = Instant::now();
    let engine = run_engine(engine, options.num_threads, options.tracing_stack_size)?;
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

    let source = OutletSource {
        path: options.outlets_path.as_deref().unwrap_or(&options.input_dir),
        layer: options.outlets_layer.as_deref(),
        options: options.outlets_opts.as_deref(),
        id_col: options.id_col.as_deref(),
        oid_col: None,
    };
    let target = options
        .output_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BASINS_OUTPUT));
    let mut outputs = StagedOutputs::new();
    let staged = outputs.stage(&target)?;
    let hierarchy_path = match &options.hier_path {
        Some(path) => outputs.stage(path)?,
        None => staged.join(HIERARCHY_FILE),
    };
    let files = MeshFiles {
        dir: &staged,
        hierarchy: &hierarchy_path,
        compression: Compression::from_flag(options.compress_output),
        save_outlets: options.save_outlets,
    };

    let outcome = match &network {
        LoadedNetwork::Grid(grid) => {
            build_mesh(grid, &source, &files, &scheduler, &mut diagnostics)?
        }
        LoadedNetwork::Table(table) => {
            build_mesh(table, &source, &files, &scheduler, &mut diagnostics)?
        }
    };
    log_cache_stats(&network);
    let committed = outputs.commit()?;

    let hierarchy = &outcome.mesh.hierarchy;
    Ok(MeshReport {
        network: network.kind_name(),
        nodes: outcome.nodes,
        outlets_read: outcome.outlets_read,
        basins: hierarchy.len(),
        roots: hierarchy.roots().len(),
        unassigned: outcome.mesh.unassigned,
        outputs: committed,
        metrics: outcome.mesh.metrics,
        elapsed_ms: elapsed_ms(started),
        diagnostics,
    })
}

/// Mesh entry point returning a status code.
pub fn meshed(options: &MeshedOptions, engine: &EngineConfig) -> i32 {
    finish("meshed", run_meshed(options, engine), MeshReport::log)
}

/// Staged locations of the mesh outputs.
struct MeshFiles<'a> {
    dir: &'a Path,
    hierarchy: &'a Path,
    compression: Compression,
    save_outlets: bool,
}

fn build_mesh<N: DrainageNetwork>(
    network: &N,
    source: &OutletSource<'_>,
    files: &MeshFiles<'_>,
    scheduler: &TraversalScheduler,
    diagnostics: &mut Diagnostics,
) -> Result<MeshOutcome> {
    // Structural errors must surface before any claim is made.
    let integrity = DownstreamSweep::run(network, &ValidateOnly, scheduler)?;

    let outlets = source.resolve(network, scheduler, diagnostics)?;
    if outlets.is_empty() {
        return Err(MidasError::EmptyMesh {
            rejected: outlets.rejected().len(),
        });
    }

    let mesh = MeshBuilder::build(network, &outlets, scheduler)?;
    if mesh.unassigned > 0 {
        diagnostics.push(Issue::UnassignedNodes {
            count: mesh.unassigned,
        });
    }
    let boundaries = MeshBuilder::boundaries(network, &mesh, scheduler)?;

    write_node_values(
        files.dir,
        network.layout(),
        BASIN_COLUMN,
        ValueType::U32,
        Some(f64::from(UNASSIGNED)),
        |node| mesh.assignments[node],
        files.compression,
    )?;

    let features: Vec<Feature> = boundaries
        .into_iter()
        .map(|(id, geometry)| {
            let summary = mesh.hierarchy.get(id);
            Feature::new(geometry)
                .with_property("id", id)
                .with_property("down_id", summary.and_then(|s| s.down_id))
                .with_property("nodes", summary.map_or(0, |s| s.nodes))
        })
        .collect();
    write_feature_collection(
        &files.dir.join(format!("{}.geojson", BASINS_LAYER)),
        BASINS_LAYER,
        &features,
    )?;
    mesh.hierarchy.write_csv(files.hierarchy)?;
    if files.save_outlets {
        write_outlets(&files.dir.join(OUTLETS_FILE), &outlets)?;
    }

    Ok(MeshOutcome {
        nodes: integrity.nodes,
        outlets_read: outlets.records().len(),
        mesh,
    })
}
