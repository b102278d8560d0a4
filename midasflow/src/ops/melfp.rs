//! Longest flow path run.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::config::EngineConfig;
use crate::coord::Point;
use crate::dataset::{write_feature_collection, Feature, Geometry, LoadedNetwork, StagedOutputs};
use crate::diagnostics::Diagnostics;
use crate::error::{MidasError, Result};
use crate::lfp::{LongestFlowPathExtractor, LongestFlowPaths, LongestPath};
use crate::network::DrainageNetwork;
use crate::scheduler::{MetricsSnapshot, TraversalScheduler};

use super::{
    csv_field, elapsed_ms, finish, log_cache_stats, open_network, run_engine, write_outlets,
    OutletSource, OUTLETS_FILE,
};

/// Output directory used when none is given.
pub const DEFAULT_LFP_OUTPUT: &str = "lfp";

/// Path layer name used when none is given.
pub const DEFAULT_LFP_NAME: &str = "lfp";

/// Header of the coordinates file.
pub const COORDS_HEADER: &str = "id,oid,length,head_x,head_y,outlet_x,outlet_y";

/// Inputs of a longest flow path run.
#[derive(Debug, Clone, Default)]
pub struct MelfpOptions {
    pub input_dir: PathBuf,
    pub dir_opts: Option<String>,
    pub encoding: Option<String>,
    /// Outlet layer file or directory; the input directory when absent.
    pub outlets_path: Option<PathBuf>,
    pub outlets_layer: Option<String>,
    pub outlets_opts: Option<String>,
    pub id_col: Option<String>,
    pub output_path: Option<PathBuf>,
    /// Groups outlets into objects; one path per object.
    pub oid_col: Option<String>,
    pub lfp_name: Option<String>,
    /// Head point layer; not written when absent.
    pub heads_name: Option<String>,
    /// Coordinates CSV; not written when absent.
    pub coors_path: Option<PathBuf>,
    /// Rebuild path geometry, not only lengths.
    pub find_full: bool,
    pub use_lessmem: bool,
    pub save_outlets: bool,
    pub num_threads: usize,
    pub tracing_stack_size: Option<usize>,
}

impl MelfpOptions {
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

    pub fn with_find_full(mut self, find_full: bool) -> Self {
        self.find_full = find_full;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }
}

/// Outcome of a successful longest flow path run.
#[derive(Debug, Clone, Serialize)]
pub struct LongestFlowPathReport {
    pub network: &'static str,
    pub nodes: usize,
    pub outlets_read: usize,
    pub paths: usize,
    pub flagged: usize,
    pub max_length: Option<f64>,
    pub outputs: Vec<PathBuf>,
    pub metrics: MetricsSnapshot,
    pub elapsed_ms: u64,
    pub diagnostics: Diagnostics,
}

impl LongestFlowPathReport {
    pub fn log(&self) {
        self.diagnostics.log_summary("melfp");
        info!(
            network = self.network,
            nodes = self.nodes,
            paths = self.paths,
            flagged = self.flagged,
            max_length = self.max_length,
            elapsed_ms = self.elapsed_ms,
            "longest flow paths finished"
        );
    }
}

/// Extracts the longest flow path of every outlet and writes it out.
pub fn run_melfp(options: &MelfpOptions, engine: &EngineConfig) -> Result<LongestFlowPathReport> {
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
        oid_col: options.oid_col.as_deref(),
    };
    let target = options
        .output_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LFP_OUTPUT));
    let mut outputs = StagedOutputs::new();
    let staged = outputs.stage(&target)?;
    let coords = options
        .coors_path
        .as_ref()
        .map(|path| outputs.stage(path))
        .transpose()?;
    let files = PathFiles {
        dir: &staged,
        lfp_name: options.lfp_name.as_deref().unwrap_or(DEFAULT_LFP_NAME),
        heads_name: options.heads_name.as_deref(),
        coords: coords.as_deref(),
        save_outlets: options.save_outlets,
    };

    let (outlets_read, paths) = match &network {
        LoadedNetwork::Grid(grid) => {
            extract(grid, &source, options, &files, &scheduler, &mut diagnostics)?
        }
        LoadedNetwork::Table(table) => {
            extract(table, &source, options, &files, &scheduler, &mut diagnostics)?
        }
    };
    log_cache_stats(&network);
    let committed = outputs.commit()?;

    Ok(LongestFlowPathReport {
        network: network.kind_name(),
        nodes: paths.nodes,
        outlets_read,
        paths: paths.paths.len(),
        flagged: paths.flagged(),
        max_length: paths.paths.iter().filter_map(|p| p.length).reduce(f64::max),
        outputs: committed,
        metrics: paths.metrics,
        elapsed_ms: elapsed_ms(started),
        diagnostics,
    })
}

/// Longest flow path entry point returning a status code.
pub fn melfp(options: &MelfpOptions, engine: &EngineConfig) -> i32 {
    finish("melfp", run_melfp(options, engine), LongestFlowPathReport::log)
}

/// Staged locations of the path outputs.
struct PathFiles<'a> {
    dir: &'a Path,
    lfp_name: &'a str,
    heads_name: Option<&'a str>,
    coords: Option<&'a Path>,
    save_outlets: bool,
}

fn extract<N: DrainageNetwork>(
    network: &N,
    source: &OutletSource<'_>,
    options: &MelfpOptions,
    files: &PathFiles<'_>,
    scheduler: &TraversalScheduler,
    diagnostics: &mut Diagnostics,
) -> Result<(usize, LongestFlowPaths)> {
    let outlets = source.resolve(network, scheduler, diagnostics)?;
    let paths = LongestFlowPathExtractor::extract(
        network,
        &outlets,
        options.find_full,
        options.oid_col.is_some(),
        scheduler,
        diagnostics,
    )?;

    fs::create_dir_all(files.dir).map_err(|source| MidasError::WriteFailed {
        path: files.dir.to_path_buf(),
        source,
    })?;
    let features: Vec<Feature> = paths
        .paths
        .iter()
        .map(|path| path_feature(path.path.as_deref().map(line_geometry), path))
        .collect();
    write_feature_collection(
        &files.dir.join(format!("{}.geojson", files.lfp_name)),
        files.lfp_name,
        &features,
    )?;

    if let Some(heads_name) = files.heads_name {
        let heads: Vec<Feature> = paths
            .paths
            .iter()
            .map(|path| path_feature(path.head.map(Geometry::Point), path))
            .collect();
        write_feature_collection(
            &files.dir.join(format!("{}.geojson", heads_name)),
            heads_name,
            &heads,
        )?;
    }
    if let Some(coords) = files.coords {
        write_coords(coords, &paths.paths)?;
    }
    if files.save_outlets {
        write_outlets(&files.dir.join(OUTLETS_FILE), &outlets)?;
    }
    Ok((outlets.records().len(), paths))
}

/// A path of a single node has no line; it is written as its point.
fn line_geometry(points: &[Point]) -> Geometry {
    match points {
        [point] => Geometry::Point(*point),
        _ => Geometry::LineString(points.to_vec()),
    }
}

fn path_feature(geometry: Option<Geometry>, path: &LongestPath) -> Feature {
    Feature::new(geometry)
        .with_property("id", path.id)
        .with_property("oid", path.oid.clone())
        .with_property("length", path.length)
        .with_property("basin", path.basin)
        .with_property("flagged", path.flagged)
}

fn write_coords(path: &Path, paths: &[LongestPath]) -> Result<()> {
    let write_err = |source| MidasError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();

    let mut out = BufWriter::new(File::create(path).map_err(write_err)?);
    writeln!(out, "{}", COORDS_HEADER).map_err(write_err)?;
    for p in paths {
        writeln!(
            out,
            "{},{},{},{},{},{},{}",
            p.id.map(|id| id.to_string()).unwrap_or_default(),
            csv_field(p.oid.as_deref().unwrap_or_default()),
            opt(p.length),
            opt(p.head.map(|h| h.x)),
            opt(p.head.map(|h| h.y)),
            opt(p.outlet.map(|o| o.x)),
            opt(p.outlet.map(|o| o.y)),
        )
        .map_err(write_err)?;
    }
    out.flush().map_err(write_err)
}
