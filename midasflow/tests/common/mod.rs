//! Synthetic dataset builders shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;

use serde_json::{json, Value};

use midasflow::coord::{GeoTransform, GridShape, TileId};
use midasflow::dataset::{
    write_tile, Compression, GridManifest, Manifest, TableManifest, TilePayload, ValueType,
    DEFAULT_NODES_FILE,
};

/// One node table row: `(id, down_id, x, y)`.
pub type Row = (i64, i64, f64, f64);

/// Writes a table dataset with sink id 0.
pub fn table_dataset(dir: &Path, rows: &[Row]) {
    let nodes: Vec<Value> = rows
        .iter()
        .map(|&(id, down_id, x, y)| json!({"id": id, "down_id": down_id, "x": x, "y": y}))
        .collect();
    write_table(dir, &nodes);
}

/// Writes a table dataset from raw node records.
pub fn write_table(dir: &Path, nodes: &[Value]) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join(DEFAULT_NODES_FILE),
        serde_json::to_string(nodes).unwrap(),
    )
    .unwrap();
    Manifest::Table(TableManifest {
        nodes: DEFAULT_NODES_FILE.to_string(),
        sink_id: 0,
        created: None,
    })
    .write(dir)
    .unwrap();
}

/// Writes a power2-encoded direction grid with a unit transform.
pub fn grid_dataset(dir: &Path, rows: usize, cols: usize, tile_size: usize, values: &[i32]) {
    assert_eq!(values.len(), rows * cols);
    std::fs::create_dir_all(dir).unwrap();
    let shape = GridShape::new(rows, cols, tile_size);
    for tile in shape.tiles() {
        write_tile(
            dir,
            tile,
            Compression::None,
            &tile_payload(&shape, tile, values),
        )
        .unwrap();
    }
    Manifest::Grid(GridManifest {
        rows,
        cols,
        tile_size,
        transform: GeoTransform::unit(),
        nodata: Some(255.0),
        encoding: None,
        value_type: ValueType::I32,
        compression: Compression::None,
        weights: None,
        created: None,
    })
    .write(dir)
    .unwrap();
}

fn tile_payload(shape: &GridShape, tile: TileId, values: &[i32]) -> TilePayload<i32> {
    let (rows, cols) = shape.tile_dims(tile);
    let r0 = tile.row as usize * shape.tile_size;
    let c0 = tile.col as usize * shape.tile_size;
    let mut data = Vec::with_capacity(rows * cols);
    for r in r0..r0 + rows {
        for c in c0..c0 + cols {
            data.push(values[r * shape.cols + c]);
        }
    }
    TilePayload {
        rows: rows as u32,
        cols: cols as u32,
        values: data,
    }
}

/// One outlet feature.
pub struct OutletSpec {
    pub x: f64,
    pub y: f64,
    pub id: Option<i64>,
    pub oid: Option<&'static str>,
}

pub fn outlet(x: f64, y: f64, id: i64) -> OutletSpec {
    OutletSpec {
        x,
        y,
        id: Some(id),
        oid: None,
    }
}

/// Writes a GeoJSON outlet layer with `id` and `oid` properties.
pub fn outlets_layer(path: &Path, outlets: &[OutletSpec]) {
    let features: Vec<Value> = outlets
        .iter()
        .map(|o| {
            json!({
                "type": "Feature",
                "properties": {"id": o.id, "oid": o.oid},
                "geometry": {"type": "Point", "coordinates": [o.x, o.y]},
            })
        })
        .collect();
    let layer = json!({"type": "FeatureCollection", "name": "outlets", "features": features});
    std::fs::write(path, layer.to_string()).unwrap();
}

/// Reads a GeoJSON layer written by the engine.
pub fn read_layer(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// Entries left in `dir`, sorted by name.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
