//! Grid geometry and map coordinates.
//!
//! A grid dataset is a `rows × cols` raster split into square tiles of
//! `tile_size` cells. Cells are addressed by `(row, col)` with row 0 at the
//! top, and map coordinates come from a [`GeoTransform`] in GDAL order:
//!
//! ```text
//! x = t[0] + col * t[1] + row * t[2]
//! y = t[3] + col * t[4] + row * t[5]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::network::NodeId;

/// Affine transform from pixel space to map space, GDAL coefficient order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Unit transform: cell `(r, c)` has its top-left corner at `(c, -r)`.
    pub fn unit() -> Self {
        Self::from([0.0, 1.0, 0.0, 0.0, 0.0, -1.0])
    }

    /// Map coordinates of a fractional pixel position.
    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> Point {
        Point {
            x: self.origin_x + col * self.pixel_width + row * self.row_rotation,
            y: self.origin_y + col * self.col_rotation + row * self.pixel_height,
        }
    }

    /// Center of cell `(row, col)`.
    #[inline]
    pub fn cell_center(&self, row: usize, col: usize) -> Point {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Pixel corner `(row, col)`; `row` may equal the row count.
    #[inline]
    pub fn corner(&self, row: usize, col: usize) -> Point {
        self.apply(col as f64, row as f64)
    }

    /// Inverse transform to fractional `(col, row)`.
    ///
    /// Returns `None` for a degenerate transform.
    pub fn to_pixel(&self, point: Point) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation;
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = point.x - self.origin_x;
        let dy = point.y - self.origin_y;
        let col = (dx * self.pixel_height - dy * self.row_rotation) / det;
        let row = (dy * self.pixel_width - dx * self.col_rotation) / det;
        Some((col, row))
    }

    /// Whether the pixel axes map to a right-handed map frame.
    ///
    /// North-up rasters have a negative determinant, which flips the
    /// orientation of rings traced in pixel space.
    pub fn flips_orientation(&self) -> bool {
        self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation < 0.0
    }
}

impl From<[f64; 6]> for GeoTransform {
    fn from(t: [f64; 6]) -> Self {
        Self {
            origin_x: t[0],
            pixel_width: t[1],
            row_rotation: t[2],
            origin_y: t[3],
            col_rotation: t[4],
            pixel_height: t[5],
        }
    }
}

impl From<GeoTransform> for [f64; 6] {
    fn from(t: GeoTransform) -> Self {
        [
            t.origin_x,
            t.pixel_width,
            t.row_rotation,
            t.origin_y,
            t.col_rotation,
            t.pixel_height,
        ]
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::unit()
    }
}

/// A point in map coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// GeoJSON position array.
    pub fn to_array(self) -> [f64; 2] {
        [self.x, self.y]
    }
}

// =============================================================================
// Tiling
// =============================================================================

/// Identifier of a tile within a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub row: u32,
    pub col: u32,
}

impl TileId {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.row, self.col)
    }
}

/// Shape of a tiled grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
    pub tile_size: usize,
}

impl GridShape {
    pub fn new(rows: usize, cols: usize, tile_size: usize) -> Self {
        Self {
            rows,
            cols,
            tile_size: tile_size.max(1),
        }
    }

    /// Total number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tile rows.
    pub fn tile_rows(&self) -> usize {
        self.rows.div_ceil(self.tile_size)
    }

    /// Number of tile columns.
    pub fn tile_cols(&self) -> usize {
        self.cols.div_ceil(self.tile_size)
    }

    /// Iterates all tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = TileId> + '_ {
        let tile_cols = self.tile_cols();
        (0..self.tile_rows()).flat_map(move |r| (0..tile_cols).map(move |c| TileId::new(r as u32, c as u32)))
    }

    /// Row-major index of a tile in [`Self::tiles`] order.
    #[inline]
    pub fn tile_index(&self, tile: TileId) -> usize {
        tile.row as usize * self.tile_cols() + tile.col as usize
    }

    /// Cell dimensions `(rows, cols)` of a tile, smaller at the right and bottom edges.
    pub fn tile_dims(&self, tile: TileId) -> (usize, usize) {
        let r0 = tile.row as usize * self.tile_size;
        let c0 = tile.col as usize * self.tile_size;
        (
            self.tile_size.min(self.rows.saturating_sub(r0)),
            self.tile_size.min(self.cols.saturating_sub(c0)),
        )
    }

    /// Tile holding a cell and the cell's offset in the tile payload.
    #[inline]
    pub fn locate(&self, row: usize, col: usize) -> (TileId, usize) {
        let tile = TileId::new((row / self.tile_size) as u32, (col / self.tile_size) as u32);
        let (_, tile_width) = self.tile_dims(tile);
        let offset = (row % self.tile_size) * tile_width + col % self.tile_size;
        (tile, offset)
    }

    #[inline]
    pub fn contains(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.rows && (col as usize) < self.cols
    }

    /// Dense node index of a cell.
    #[inline]
    pub fn node(&self, row: usize, col: usize) -> NodeId {
        row * self.cols + col
    }

    /// Cell `(row, col)` of a dense node index.
    #[inline]
    pub fn cell(&self, node: NodeId) -> (usize, usize) {
        (node / self.cols, node % self.cols)
    }
}
