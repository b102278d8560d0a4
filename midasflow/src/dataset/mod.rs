//! Dataset adapter.
//!
//! Reads drainage networks and outlet layers from dataset directories and
//! writes analysis results back out.
//!
//! # Layout
//!
//! ```text
//! <dataset>/
//! ├── dataset.json          manifest (kind, shape, encoding, ...)
//! ├── tiles/<r>_<c>.bin     grid tiles, bincode, optionally .gz
//! └── nodes.json            node table of a table dataset
//! ```
//!
//! # Example
//!
//! ```ignore
//! let options = OpenOptions::parse("nodata=255", &mut diagnostics)?;
//! let dataset = Dataset::open(Path::new("fdr"), options)?;
//! let network = dataset.load_network(Some("taudem"), false, &engine)?;
//! ```

mod manifest;
mod outlets;
mod output;
mod tile_io;
mod vector;
mod writer;

pub use manifest::{
    AttributeManifest, Compression, GridManifest, Manifest, TableManifest, ValueType,
    DEFAULT_NODES_FILE, MANIFEST_FILE,
};
pub use outlets::{read_outlets, OutletOptions, DEFAULT_OUTLETS_LAYER};
pub use output::StagedOutputs;
pub use tile_io::{read_tile, tile_path, write_tile, TilePayload, TILES_DIR};
pub use vector::{write_feature_collection, Feature, Geometry};
pub use writer::{read_node_values, write_node_values, NodeValues};
pub(crate) use writer::write_json;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::cache::TileCache;
use crate::config::EngineConfig;
use crate::coord::GridShape;
use crate::diagnostics::{Diagnostics, Issue};
use crate::encoding::DirectionEncoding;
use crate::error::{MidasError, Result};
use crate::network::{GridGeometry, GridNetwork, NodeRecord, TableNetwork, TileLayer};

// =============================================================================
// Option strings
// =============================================================================

/// Splits `key=value,key=value` into pairs. Blank entries are skipped.
pub(crate) fn parse_pairs(options: &str) -> Result<Vec<(String, String)>> {
    options
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => Ok((key.trim().to_lowercase(), value.trim().to_string())),
            None => Err(MidasError::InvalidOption {
                name: entry.to_string(),
                value: String::new(),
                reason: "expected key=value".to_string(),
            }),
        })
        .collect()
}

pub(crate) fn parse_number(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| MidasError::InvalidOption {
            name: key.to_string(),
            value: value.to_string(),
            reason: "expected a number".to_string(),
        })
}

/// Parsed directory-read options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenOptions {
    /// Overrides the manifest nodata value.
    pub nodata: Option<f64>,
    /// Weight dataset; relative paths resolve against the working directory.
    pub weights: Option<PathBuf>,
    /// Sub-directory holding the dataset.
    pub layer: Option<String>,
}

impl OpenOptions {
    /// Parses a directory-read option string. Unknown keys are recorded and
    /// ignored.
    pub fn parse(options: &str, diagnostics: &mut Diagnostics) -> Result<Self> {
        let mut parsed = OpenOptions::default();
        for (key, value) in parse_pairs(options)? {
            match key.as_str() {
                "nodata" => parsed.nodata = Some(parse_number(&key, &value)?),
                "weights" => parsed.weights = Some(PathBuf::from(value)),
                "layer" => parsed.layer = Some(value),
                _ => diagnostics.push(Issue::UnknownOption {
                    source: "directory",
                    key,
                }),
            }
        }
        Ok(parsed)
    }
}

// =============================================================================
// Dataset
// =============================================================================

/// A network loaded from a dataset.
pub enum LoadedNetwork {
    Grid(GridNetwork),
    Table(TableNetwork),
}

impl LoadedNetwork {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LoadedNetwork::Grid(_) => "grid",
            LoadedNetwork::Table(_) => "table",
        }
    }
}

/// An opened dataset directory.
#[derive(Debug, Clone)]
pub struct Dataset {
    root: PathBuf,
    manifest: Manifest,
    options: OpenOptions,
}

impl Dataset {
    /// Opens `dir`, or `dir/<layer>` when the options name a layer.
    pub fn open(dir: &Path, options: OpenOptions) -> Result<Self> {
        let root = match &options.layer {
            Some(layer) => dir.join(layer),
            None => dir.to_path_buf(),
        };
        if !root.is_dir() {
            return Err(MidasError::DatasetNotFound(root));
        }
        let manifest = Manifest::read(&root)?;
        debug!(path = %root.display(), "dataset opened");
        Ok(Self {
            root,
            manifest,
            options,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Loads the drainage network.
    ///
    /// `encoding` overrides the manifest encoding of grid datasets. With
    /// `use_lessmem`, grid tiles are paged through a shared tile cache instead
    /// of being loaded up front.
    pub fn load_network(
        &self,
        encoding: Option<&str>,
        use_lessmem: bool,
        engine: &EngineConfig,
    ) -> Result<LoadedNetwork> {
        match &self.manifest {
            Manifest::Grid(grid) => {
                let network = self.load_grid(grid, encoding, use_lessmem, engine)?;
                Ok(LoadedNetwork::Grid(network))
            }
            Manifest::Table(table) => {
                if use_lessmem {
                    info!("table networks stay resident in less-memory mode");
                }
                Ok(LoadedNetwork::Table(self.load_table(table)?))
            }
            Manifest::Attribute(_) => Err(MidasError::invalid_dataset(
                &self.root,
                "attribute datasets hold no drainage network",
            )),
        }
    }

    fn load_grid(
        &self,
        grid: &GridManifest,
        encoding: Option<&str>,
        use_lessmem: bool,
        engine: &EngineConfig,
    ) -> Result<GridNetwork> {
        if grid.value_type != ValueType::I32 {
            return Err(MidasError::invalid_dataset(
                &self.root,
                "flow directions must be stored as i32",
            ));
        }
        let encoding: DirectionEncoding = match encoding.filter(|e| !e.is_empty()) {
            Some(name) => name.parse()?,
            None => match &grid.encoding {
                Some(name) => name.parse()?,
                None => DirectionEncoding::default(),
            },
        };
        let shape = grid.shape();
        let geometry = GridGeometry::new(shape, grid.transform);
        let nodata = self.options.nodata.or(grid.nodata);

        let directions = if use_lessmem {
            TileLayer::paged(&self.root, grid.compression, Arc::new(TileCache::new()))
        } else {
            TileLayer::load_resident(&self.root, &shape, grid.compression)?
        };
        info!(
            rows = shape.rows,
            cols = shape.cols,
            tiles = shape.tile_rows() * shape.tile_cols(),
            paged = use_lessmem,
            %encoding,
            "grid network loaded"
        );

        let mut network = GridNetwork::new(geometry, encoding, nodata, directions)
            .with_max_local_tiles(engine.max_local_tiles);

        let weights_dir = match (&self.options.weights, &grid.weights) {
            (Some(path), _) => Some(path.clone()),
            (None, Some(name)) => Some(sibling(&self.root, name)),
            (None, None) => None,
        };
        if let Some(dir) = weights_dir {
            let (layer, nodata) = load_weights(&dir, &shape, use_lessmem)?;
            debug!(path = %dir.display(), "weights attached");
            network = network.with_weights(layer, nodata);
        }
        Ok(network)
    }

    fn load_table(&self, table: &TableManifest) -> Result<TableNetwork> {
        let path = self.root.join(&table.nodes);
        let records: Vec<NodeRecord> = read_json(&path)?;
        let count = records.len();
        let network = TableNetwork::from_records(records, table.sink_id)
            .map_err(|reason| MidasError::invalid_dataset(&path, reason))?;
        info!(nodes = count, "table network loaded");
        Ok(network)
    }
}

fn sibling(root: &Path, name: &str) -> PathBuf {
    match root.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

fn load_weights(
    dir: &Path,
    shape: &GridShape,
    use_lessmem: bool,
) -> Result<(TileLayer<f64>, Option<f64>)> {
    let Manifest::Grid(grid) = Manifest::read(dir)? else {
        return Err(MidasError::invalid_dataset(dir, "weights must be a grid dataset"));
    };
    if grid.value_type != ValueType::F64 {
        return Err(MidasError::invalid_dataset(dir, "weights must be stored as f64"));
    }
    if grid.shape() != *shape {
        return Err(MidasError::invalid_dataset(
            dir,
            format!(
                "weights are {}x{} in tiles of {}, directions are {}x{} in tiles of {}",
                grid.rows, grid.cols, grid.tile_size, shape.rows, shape.cols, shape.tile_size
            ),
        ));
    }
    let layer = if use_lessmem {
        TileLayer::paged(dir, grid.compression, Arc::new(TileCache::new()))
    } else {
        TileLayer::load_resident(dir, shape, grid.compression)?
    };
    Ok((layer, grid.nodata))
}

/// Reads a JSON file, gunzipping it when the name ends in `.gz`.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|source| MidasError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    serde_json::from_reader(reader).map_err(|e| MidasError::invalid_dataset(path, e.to_string()))
}
