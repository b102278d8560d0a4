//! `dataset.json` manifests.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coord::{GeoTransform, GridShape};
use crate::error::{MidasError, Result};

/// Manifest file name inside a dataset directory.
pub const MANIFEST_FILE: &str = "dataset.json";

/// Default node table file name.
pub const DEFAULT_NODES_FILE: &str = "nodes.json";

/// Tile payload compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn from_flag(compress: bool) -> Self {
        if compress {
            Compression::Gzip
        } else {
            Compression::None
        }
    }

    /// File name suffix appended after the base extension.
    pub fn suffix(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
        }
    }
}

/// Cell value type of a grid layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    I32,
    U32,
    F64,
}

/// Top-level manifest, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Manifest {
    Grid(GridManifest),
    Table(TableManifest),
    Attribute(AttributeManifest),
}

/// Tiled raster layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridManifest {
    pub rows: usize,
    pub cols: usize,
    pub tile_size: usize,
    #[serde(default)]
    pub transform: GeoTransform,
    /// Value marking cells that are not nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodata: Option<f64>,
    /// Flow direction encoding name or custom code list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    pub value_type: ValueType,
    #[serde(default)]
    pub compression: Compression,
    /// Sibling grid dataset holding per-cell weights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

impl GridManifest {
    pub fn shape(&self) -> GridShape {
        GridShape::new(self.rows, self.cols, self.tile_size)
    }
}

/// Node table of a vector drainage network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableManifest {
    #[serde(default = "default_nodes_file")]
    pub nodes: String,
    /// Downstream id meaning "drains out of the network".
    #[serde(default)]
    pub sink_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

/// Per-node values keyed by node id, written for table networks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeManifest {
    /// Name of the value column.
    pub column: String,
    /// Records file relative to the dataset directory.
    pub records: String,
    pub count: usize,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

fn default_nodes_file() -> String {
    DEFAULT_NODES_FILE.to_string()
}

impl Manifest {
    /// Reads `<dir>/dataset.json`.
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(MidasError::DatasetNotFound(dir.to_path_buf()));
        }
        let text = std::fs::read_to_string(&path).map_err(|source| MidasError::ReadFailed {
            path: path.clone(),
            source,
        })?;
        let manifest: Manifest = serde_json::from_str(&text)
            .map_err(|e| MidasError::invalid_dataset(&path, e.to_string()))?;
        manifest.check(&path)?;
        Ok(manifest)
    }

    /// Writes `<dir>/dataset.json`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let text = serde_json::to_string_pretty(self).map_err(|e| MidasError::EncodeFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, text).map_err(|source| MidasError::WriteFailed {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn check(&self, path: &Path) -> Result<()> {
        if let Manifest::Grid(grid) = self {
            if grid.tile_size == 0 {
                return Err(MidasError::invalid_dataset(path, "tile_size must be positive"));
            }
            if grid.rows.checked_mul(grid.cols).is_none() {
                return Err(MidasError::invalid_dataset(path, "grid is too large"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grid_manifest() {
        let json = r#"{
            "kind": "grid",
            "rows": 4, "cols": 5, "tile_size": 2,
            "transform": [0.0, 30.0, 0.0, 120.0, 0.0, -30.0],
            "nodata": -1,
            "encoding": "taudem",
            "value_type": "i32",
            "compression": "gzip"
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        let Manifest::Grid(grid) = manifest else {
            panic!("expected a grid manifest");
        };
        assert_eq!(grid.shape(), GridShape::new(4, 5, 2));
        assert_eq!(grid.nodata, Some(-1.0));
        assert_eq!(grid.encoding.as_deref(), Some("taudem"));
        assert_eq!(grid.compression, Compression::Gzip);
        assert_eq!(grid.transform.pixel_width, 30.0);
    }

    #[test]
    fn test_table_manifest_defaults() {
        let manifest: Manifest = serde_json::from_str(r#"{"kind": "table"}"#).unwrap();
        assert_eq!(
            manifest,
            Manifest::Table(TableManifest {
                nodes: DEFAULT_NODES_FILE.to_string(),
                sink_id: 0,
                created: None,
            })
        );
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::Attribute(AttributeManifest {
            column: "accumulation".to_string(),
            records: "accumulation.json".to_string(),
            count: 3,
            compression: Compression::None,
            created: Some(Utc::now()),
        });
        manifest.write(dir.path()).unwrap();
        assert_eq!(Manifest::read(dir.path()).unwrap(), manifest);
    }

    #[test]
    fn test_missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Manifest::read(dir.path()).unwrap_err();
        assert!(matches!(err, MidasError::DatasetNotFound(_)));
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"kind":"grid","rows":1,"cols":1,"tile_size":0,"value_type":"i32"}"#,
        )
        .unwrap();
        assert!(Manifest::read(dir.path()).is_err());
    }
}
