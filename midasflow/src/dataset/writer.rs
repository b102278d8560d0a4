//! Node-indexed value layers.
//!
//! Grid networks write a tiled raster with the input's geometry; table
//! networks write an attribute dataset of `{id, <column>}` records.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use flate2::write::GzEncoder;
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::coord::GridShape;
use crate::error::{MidasError, Result};
use crate::network::{NodeId, NodeLayout};

use super::{
    read_json, read_tile, write_tile, AttributeManifest, Compression, GridManifest, Manifest,
    TilePayload, ValueType,
};

/// Values read back from a node layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValues<T> {
    /// Row-major cell values.
    Grid { shape: GridShape, values: Vec<T> },
    /// `(id, value)` in record order.
    Table(Vec<(i64, T)>),
}

/// Writes one value per node slot into a new dataset at `dir`.
///
/// `value` is called with every node id; grid tiles are assembled one at a
/// time so no dense copy of the layer is held. For grids, slots that are not
/// nodes must yield `nodata`.
pub fn write_node_values<T, F>(
    dir: &Path,
    layout: NodeLayout<'_>,
    column: &str,
    value_type: ValueType,
    nodata: Option<f64>,
    value: F,
    compression: Compression,
) -> Result<()>
where
    T: Serialize + Send,
    F: Fn(NodeId) -> T + Sync,
{
    fs::create_dir_all(dir).map_err(|source| MidasError::WriteFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    match layout {
        NodeLayout::Grid(geometry) => {
            let shape = geometry.shape;
            let tiles: Vec<_> = shape.tiles().collect();
            tiles.par_iter().try_for_each(|&tile| {
                let (rows, cols) = shape.tile_dims(tile);
                let r0 = tile.row as usize * shape.tile_size;
                let c0 = tile.col as usize * shape.tile_size;
                let mut data = Vec::with_capacity(rows * cols);
                for r in r0..r0 + rows {
                    let start = r * shape.cols + c0;
                    data.extend((start..start + cols).map(&value));
                }
                let payload = TilePayload {
                    rows: rows as u32,
                    cols: cols as u32,
                    values: data,
                };
                write_tile(dir, tile, compression, &payload)
            })?;
            Manifest::Grid(GridManifest {
                rows: shape.rows,
                cols: shape.cols,
                tile_size: shape.tile_size,
                transform: geometry.transform,
                nodata,
                encoding: None,
                value_type,
                compression,
                weights: None,
                created: Some(Utc::now()),
            })
            .write(dir)?;
        }
        NodeLayout::Table(ids) => {
            let records_name = format!("{}.json{}", column, compression.suffix());
            let path = dir.join(&records_name);
            let records: Vec<Value> = ids
                .iter()
                .enumerate()
                .map(|(node, &id)| {
                    let mut record = Map::new();
                    record.insert("id".to_string(), Value::from(id));
                    record.insert(column.to_string(), to_value(&path, &value(node))?);
                    Ok(Value::Object(record))
                })
                .collect::<Result<_>>()?;
            write_json(&path, &records, compression)?;
            Manifest::Attribute(AttributeManifest {
                column: column.to_string(),
                records: records_name,
                count: ids.len(),
                compression,
                created: Some(Utc::now()),
            })
            .write(dir)?;
        }
    }
    Ok(())
}

/// Reads a layer written by [`write_node_values`].
pub fn read_node_values<T>(dir: &Path) -> Result<NodeValues<T>>
where
    T: DeserializeOwned + Copy + Send,
{
    match Manifest::read(dir)? {
        Manifest::Grid(grid) => {
            let shape = grid.shape();
            let mut values = Vec::with_capacity(shape.len());
            let tiles: Vec<Vec<T>> = shape
                .tiles()
                .map(|tile| read_tile(dir, tile, grid.compression, shape.tile_dims(tile)))
                .collect::<Result<_>>()?;
            for r in 0..shape.rows {
                for c in 0..shape.cols {
                    let (tile, offset) = shape.locate(r, c);
                    values.push(tiles[shape.tile_index(tile)][offset]);
                }
            }
            Ok(NodeValues::Grid { shape, values })
        }
        Manifest::Attribute(attribute) => {
            let path = dir.join(&attribute.records);
            let records: Vec<Map<String, Value>> = read_json(&path)?;
            records
                .into_iter()
                .map(|record| {
                    let id = record.get("id").and_then(Value::as_i64);
                    let value = record.get(&attribute.column).cloned();
                    match (id, value) {
                        (Some(id), Some(value)) => serde_json::from_value(value)
                            .map(|v| (id, v))
                            .map_err(|e| MidasError::invalid_dataset(&path, e.to_string())),
                        _ => Err(MidasError::invalid_dataset(&path, "incomplete record")),
                    }
                })
                .collect::<Result<_>>()
                .map(NodeValues::Table)
        }
        Manifest::Table(_) => Err(MidasError::invalid_dataset(dir, "not a value layer")),
    }
}

fn to_value<T: Serialize>(path: &Path, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| MidasError::EncodeFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Writes JSON, gzip-wrapped when compressed.
pub(crate) fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    compression: Compression,
) -> Result<()> {
    let write_err = |source| MidasError::WriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let encode_err = |e: serde_json::Error| MidasError::EncodeFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let file = BufWriter::new(File::create(path).map_err(write_err)?);
    match compression {
        Compression::None => {
            let mut writer = file;
            serde_json::to_writer(&mut writer, value).map_err(encode_err)?;
            writer.flush().map_err(write_err)
        }
        Compression::Gzip => {
            let mut writer = GzEncoder::new(file, flate2::Compression::default());
            serde_json::to_writer(&mut writer, value).map_err(encode_err)?;
            writer.finish().map_err(write_err)?.flush().map_err(write_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::GeoTransform;
    use crate::network::GridGeometry;

    #[test]
    fn test_grid_layer_keeps_geometry() {
        let tmp = tempfile::tempdir().unwrap();
        let geometry = GridGeometry::new(
            GridShape::new(3, 5, 2),
            GeoTransform::from([100.0, 10.0, 0.0, 50.0, 0.0, -10.0]),
        );
        let values: Vec<f64> = (0..15).map(|v| v as f64).collect();
        write_node_values(
            tmp.path(),
            NodeLayout::Grid(&geometry),
            "accumulation",
            ValueType::F64,
            Some(-9999.0),
            |node| values[node],
            Compression::Gzip,
        )
        .unwrap();

        let Manifest::Grid(grid) = Manifest::read(tmp.path()).unwrap() else {
            panic!("expected a grid manifest");
        };
        assert_eq!(grid.transform, geometry.transform);
        assert_eq!(grid.nodata, Some(-9999.0));
        assert_eq!(grid.compression, Compression::Gzip);

        let read: NodeValues<f64> = read_node_values(tmp.path()).unwrap();
        assert_eq!(
            read,
            NodeValues::Grid {
                shape: geometry.shape,
                values
            }
        );
    }

    #[test]
    fn test_table_layer_records() {
        let tmp = tempfile::tempdir().unwrap();
        let ids = [30i64, 10, 20];
        write_node_values(
            tmp.path(),
            NodeLayout::Table(&ids),
            "basin",
            ValueType::U32,
            None,
            |node| [1u32, 0, 2][node],
            Compression::None,
        )
        .unwrap();
        assert!(tmp.path().join("basin.json").is_file());

        let read: NodeValues<u32> = read_node_values(tmp.path()).unwrap();
        assert_eq!(read, NodeValues::Table(vec![(30, 1), (10, 0), (20, 2)]));
    }
}
