//! Raster drainage networks.
//!
//! Every non-nodata cell of the flow direction layer is a node. A cell
//! drains into the D8 neighbor named by its direction value; pits (value 0)
//! and pointers that leave the grid or enter a nodata cell drain out of the
//! network. Upstream neighbors are listed in the order E, SE, S, SW, W, NW,
//! N, NE of their position around the cell.

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use serde::de::DeserializeOwned;

use crate::cache::{CacheStats, TileCache, TileKey, TileLease};
use crate::coord::{GeoTransform, GridShape, Point, TileId};
use crate::dataset::{read_tile, Compression};
use crate::encoding::{Decoded, Direction, DirectionEncoding};
use crate::error::{Dangling, Result};

use super::{
    Downstream, DrainageNetwork, NetworkKind, NetworkReader, NodeId, NodeLayout, UpstreamNodes,
};

/// Shape and georeferencing of a grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub shape: GridShape,
    pub transform: GeoTransform,
}

impl GridGeometry {
    pub fn new(shape: GridShape, transform: GeoTransform) -> Self {
        Self { shape, transform }
    }

    #[inline]
    pub fn center(&self, node: NodeId) -> Point {
        let (row, col) = self.shape.cell(node);
        self.transform.cell_center(row, col)
    }
}

// =============================================================================
// Tile layers
// =============================================================================

/// Cell values of one grid layer, either fully loaded or paged on demand.
pub enum TileLayer<T> {
    Resident {
        tiles: Vec<Arc<Vec<T>>>,
    },
    Paged {
        path: Arc<Path>,
        compression: Compression,
        cache: Arc<TileCache<Vec<T>>>,
    },
}

impl<T> TileLayer<T>
where
    T: DeserializeOwned + Copy + Send + Sync,
{
    /// Loads every tile of a layer in parallel.
    pub fn load_resident(dir: &Path, shape: &GridShape, compression: Compression) -> Result<Self> {
        let ids: Vec<TileId> = shape.tiles().collect();
        let tiles = ids
            .par_iter()
            .map(|&tile| read_tile(dir, tile, compression, shape.tile_dims(tile)).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(TileLayer::Resident { tiles })
    }

    /// Pages tiles through a shared cache.
    pub fn paged(dir: &Path, compression: Compression, cache: Arc<TileCache<Vec<T>>>) -> Self {
        TileLayer::Paged {
            path: Arc::from(dir),
            compression,
            cache,
        }
    }

    /// Splits row-major cell values into resident tiles.
    pub fn from_values(shape: &GridShape, values: &[T]) -> Self {
        let tiles = shape
            .tiles()
            .map(|tile| {
                let (rows, cols) = shape.tile_dims(tile);
                let r0 = tile.row as usize * shape.tile_size;
                let c0 = tile.col as usize * shape.tile_size;
                let mut data = Vec::with_capacity(rows * cols);
                for r in r0..r0 + rows {
                    let start = r * shape.cols + c0;
                    data.extend_from_slice(&values[start..start + cols]);
                }
                Arc::new(data)
            })
            .collect();
        TileLayer::Resident { tiles }
    }

    pub fn is_paged(&self) -> bool {
        matches!(self, TileLayer::Paged { .. })
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        match self {
            TileLayer::Resident { .. } => None,
            TileLayer::Paged { cache, .. } => Some(cache.stats()),
        }
    }

    fn cursor(&self, max_tiles: usize) -> LayerCursor<'_, T> {
        LayerCursor {
            layer: self,
            lease: TileLease::new(max_tiles),
        }
    }
}

/// Per-task read position in a layer.
struct LayerCursor<'a, T: Send + Sync> {
    layer: &'a TileLayer<T>,
    lease: TileLease<Vec<T>>,
}

impl<'a, T> LayerCursor<'a, T>
where
    T: DeserializeOwned + Copy + Send + Sync,
{
    #[inline]
    fn value(&mut self, shape: &GridShape, row: usize, col: usize) -> Result<T> {
        let (tile, offset) = shape.locate(row, col);
        match self.layer {
            TileLayer::Resident { tiles } => Ok(tiles[shape.tile_index(tile)][offset]),
            TileLayer::Paged {
                path,
                compression,
                cache,
            } => {
                let key = TileKey::new(Arc::clone(path), tile);
                let compression = *compression;
                let data = self.lease.get(cache, &key, || {
                    read_tile(path, tile, compression, shape.tile_dims(tile))
                })?;
                Ok(data[offset])
            }
        }
    }
}

// =============================================================================
// GridNetwork
// =============================================================================

/// Optional per-cell weights.
pub struct WeightLayer {
    pub layer: TileLayer<f64>,
    pub nodata: Option<f64>,
}

/// Drainage network over a flow direction raster.
pub struct GridNetwork {
    geometry: GridGeometry,
    encoding: DirectionEncoding,
    nodata: Option<i64>,
    directions: TileLayer<i32>,
    weights: Option<WeightLayer>,
    max_local_tiles: usize,
}

impl GridNetwork {
    pub fn new(
        geometry: GridGeometry,
        encoding: DirectionEncoding,
        nodata: Option<f64>,
        directions: TileLayer<i32>,
    ) -> Self {
        Self {
            geometry,
            encoding,
            nodata: nodata.and_then(integral_nodata),
            directions,
            weights: None,
            max_local_tiles: crate::config::DEFAULT_MAX_LOCAL_TILES,
        }
    }

    /// Builds a resident network from row-major direction values.
    pub fn from_directions(
        geometry: GridGeometry,
        encoding: DirectionEncoding,
        nodata: Option<f64>,
        values: &[i32],
    ) -> Self {
        let layer = TileLayer::from_values(&geometry.shape, values);
        Self::new(geometry, encoding, nodata, layer)
    }

    pub fn with_weights(mut self, layer: TileLayer<f64>, nodata: Option<f64>) -> Self {
        self.weights = Some(WeightLayer { layer, nodata });
        self
    }

    pub fn with_max_local_tiles(mut self, max_local_tiles: usize) -> Self {
        self.max_local_tiles = max_local_tiles.max(1);
        self
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn encoding(&self) -> DirectionEncoding {
        self.encoding
    }

    pub fn is_paged(&self) -> bool {
        self.directions.is_paged()
    }

    /// Cache counters of the direction layer in less-memory mode.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.directions.cache_stats()
    }
}

fn integral_nodata(value: f64) -> Option<i64> {
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

impl DrainageNetwork for GridNetwork {
    type Reader<'a> = GridReader<'a>;

    fn reader(&self) -> GridReader<'_> {
        GridReader {
            net: self,
            directions: self.directions.cursor(self.max_local_tiles),
            weights: self
                .weights
                .as_ref()
                .map(|w| w.layer.cursor(self.max_local_tiles)),
        }
    }

    fn node_slots(&self) -> usize {
        self.geometry.shape.len()
    }

    fn kind(&self) -> NetworkKind {
        NetworkKind::Grid
    }

    fn layout(&self) -> NodeLayout<'_> {
        NodeLayout::Grid(&self.geometry)
    }

    fn position(&self, node: NodeId) -> Point {
        self.geometry.center(node)
    }

    /// Snaps to the cell containing the point; the cell must be a node.
    fn snap(&self, point: Point, _max_distance: Option<f64>) -> Result<Option<NodeId>> {
        let Some((col, row)) = self.geometry.transform.to_pixel(point) else {
            return Ok(None);
        };
        let (row, col) = (row.floor(), col.floor());
        if !row.is_finite() || !col.is_finite() {
            return Ok(None);
        }
        if !self.geometry.shape.contains(row as i64, col as i64) {
            return Ok(None);
        }
        let node = self.geometry.shape.node(row as usize, col as usize);
        let mut reader = self.reader();
        let found = reader.is_node(node)?;
        reader.release();
        Ok(found.then_some(node))
    }

    fn describe(&self, node: NodeId) -> String {
        let (row, col) = self.geometry.shape.cell(node);
        format!("cell ({}, {})", row, col)
    }
}

// =============================================================================
// GridReader
// =============================================================================

/// Per-task reader over a [`GridNetwork`].
pub struct GridReader<'a> {
    net: &'a GridNetwork,
    directions: LayerCursor<'a, i32>,
    weights: Option<LayerCursor<'a, f64>>,
}

impl<'a> GridReader<'a> {
    /// Stored direction value, or `None` for a nodata cell.
    #[inline]
    fn code(&mut self, row: usize, col: usize) -> Result<Option<i64>> {
        let value = self.directions.value(&self.net.geometry.shape, row, col)? as i64;
        Ok((Some(value) != self.net.nodata).then_some(value))
    }

    #[inline]
    fn neighbor(&self, row: usize, col: usize, dir: Direction) -> Option<(usize, usize)> {
        let (dr, dc) = dir.offset();
        let (r, c) = (row as i64 + dr, col as i64 + dc);
        self.net
            .geometry
            .shape
            .contains(r, c)
            .then_some((r as usize, c as usize))
    }
}

impl<'a> NetworkReader for GridReader<'a> {
    fn is_node(&mut self, node: NodeId) -> Result<bool> {
        let (row, col) = self.net.geometry.shape.cell(node);
        Ok(self.code(row, col)?.is_some())
    }

    fn downstream(&mut self, node: NodeId) -> Result<Downstream> {
        let (row, col) = self.net.geometry.shape.cell(node);
        let Some(code) = self.code(row, col)? else {
            return Ok(Downstream::Sink);
        };
        let dir = match self.net.encoding.decode(code) {
            Decoded::Sink => return Ok(Downstream::Sink),
            Decoded::Invalid => return Ok(Downstream::Dangling(Dangling::InvalidCode(code))),
            Decoded::Direction(dir) => dir,
        };
        let Some((r, c)) = self.neighbor(row, col, dir) else {
            return Ok(Downstream::Sink);
        };
        if self.code(r, c)?.is_none() {
            return Ok(Downstream::Sink);
        }
        Ok(Downstream::Node(self.net.geometry.shape.node(r, c)))
    }

    fn upstream(&mut self, node: NodeId, out: &mut UpstreamNodes) -> Result<()> {
        out.clear();
        let (row, col) = self.net.geometry.shape.cell(node);
        for dir in Direction::ALL {
            let Some((r, c)) = self.neighbor(row, col, dir) else {
                continue;
            };
            let Some(code) = self.code(r, c)? else {
                continue;
            };
            if self.net.encoding.decode(code) == Decoded::Direction(dir.opposite()) {
                out.push(self.net.geometry.shape.node(r, c));
            }
        }
        Ok(())
    }

    fn weight(&mut self, node: NodeId) -> Result<f64> {
        let Some(cursor) = self.weights.as_mut() else {
            return Ok(1.0);
        };
        let (row, col) = self.net.geometry.shape.cell(node);
        let value = cursor.value(&self.net.geometry.shape, row, col)?;
        let nodata = self.net.weights.as_ref().and_then(|w| w.nodata);
        if value.is_nan() || Some(value) == nodata {
            Ok(0.0)
        } else {
            Ok(value)
        }
    }

    fn edge_length(&mut self, from: NodeId, to: NodeId) -> f64 {
        self.net
            .geometry
            .center(from)
            .distance(&self.net.geometry.center(to))
    }

    fn release(&mut self) {
        self.directions.lease.clear();
        if let Some(weights) = self.weights.as_mut() {
            weights.lease.clear();
        }
    }
}
