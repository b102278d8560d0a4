//! Basin outlines on grids.
//!
//! Every cell side between a basin cell and a cell of another basin (or the
//! grid edge) becomes a directed edge that keeps the basin on its inner side.
//! Chaining the edges of one basin gives closed rings: outer rings have a
//! negative signed area in pixel space and holes a positive one. Where two cells
//! of the same basin only touch at a corner, the walk turns inward so the
//! rings never pinch.
//!
//! ```text
//!   (r,c) ◄────── (r,c+1)        pixel corners, row down
//!     │   cell      ▲
//!     ▼  (r,c)      │
//!  (r+1,c) ────► (r+1,c+1)
//! ```

use rayon::prelude::*;

use crate::coord::{GeoTransform, GridShape, Point};
use crate::dataset::Geometry;
use crate::error::{MidasError, Result};

use super::claim::UNASSIGNED;

/// Pixel corner `(row, col)`.
type Vertex = (u32, u32);

#[derive(Debug, Clone, Copy)]
struct Edge {
    basin: u32,
    from: Vertex,
    to: Vertex,
    /// Basin cell on the inner side.
    cell: Vertex,
}

impl Edge {
    /// Direction as `(dcol, drow)`.
    fn dir(&self) -> (i64, i64) {
        (
            self.to.1 as i64 - self.from.1 as i64,
            self.to.0 as i64 - self.from.0 as i64,
        )
    }
}

struct Ring {
    vertices: Vec<Vertex>,
    /// Twice the signed area in pixel space.
    area2: i64,
    probe: (f64, f64),
}

/// Traces the outline of every basin in `assignments`, ordered by basin id.
pub fn trace_basin_polygons(
    assignments: &[u32],
    shape: &GridShape,
    transform: &GeoTransform,
) -> Result<Vec<(u32, Geometry)>> {
    let mut edges: Vec<Edge> = (0..shape.rows)
        .into_par_iter()
        .flat_map_iter(|r| row_edges(assignments, shape, r))
        .collect();
    edges.par_sort_unstable_by_key(|e| (e.basin, e.from, e.to));

    let mut groups = Vec::new();
    let mut start = 0;
    while start < edges.len() {
        let basin = edges[start].basin;
        let end = start + edges[start..].partition_point(|e| e.basin == basin);
        groups.push(&edges[start..end]);
        start = end;
    }

    let reverse = !transform.flips_orientation();
    groups
        .into_par_iter()
        .map(|group| {
            let basin = group[0].basin;
            let rings = trace_rings(group)?;
            let polygons = assemble(basin, rings)?;
            Ok((basin, to_geometry(polygons, transform, reverse)))
        })
        .collect()
}

fn row_edges(assignments: &[u32], shape: &GridShape, r: usize) -> Vec<Edge> {
    let at = |row: i64, col: i64| {
        if shape.contains(row, col) {
            assignments[shape.node(row as usize, col as usize)]
        } else {
            UNASSIGNED
        }
    };
    let mut out = Vec::new();
    let (ri, r32) = (r as i64, r as u32);
    for c in 0..shape.cols {
        let basin = assignments[shape.node(r, c)];
        if basin == UNASSIGNED {
            continue;
        }
        let (ci, c32) = (c as i64, c as u32);
        let cell = (r32, c32);
        let mut push = |from: Vertex, to: Vertex| out.push(Edge { basin, from, to, cell });
        if at(ri - 1, ci) != basin {
            push((r32, c32 + 1), (r32, c32));
        }
        if at(ri, ci - 1) != basin {
            push((r32, c32), (r32 + 1, c32));
        }
        if at(ri + 1, ci) != basin {
            push((r32 + 1, c32), (r32 + 1, c32 + 1));
        }
        if at(ri, ci + 1) != basin {
            push((r32 + 1, c32 + 1), (r32, c32 + 1));
        }
    }
    out
}

/// Chains one basin's edges, sorted by start vertex, into closed rings.
fn trace_rings(edges: &[Edge]) -> Result<Vec<Ring>> {
    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut vertices = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            vertices.push(edges[current].from);
            let next = next_edge(edges, &used, current, start).ok_or_else(|| {
                MidasError::Internal(format!(
                    "open outline for basin {} at corner {:?}",
                    edges[current].basin, edges[current].to
                ))
            })?;
            if next == start {
                break;
            }
            current = next;
        }

        let (r, c) = edges[start].cell;
        rings.push(Ring {
            area2: signed_area2(&vertices),
            vertices: simplify(vertices),
            probe: (c as f64 + 0.5, r as f64 + 0.5),
        });
    }
    Ok(rings)
}

/// Picks the continuation of `current`: inward turn, then straight, then
/// outward turn.
fn next_edge(edges: &[Edge], used: &[bool], current: usize, start: usize) -> Option<usize> {
    let vertex = edges[current].to;
    let first = edges.partition_point(|e| e.from < vertex);
    let (dc, dr) = edges[current].dir();
    let preferences = [(dr, -dc), (dc, dr), (-dr, dc)];

    let candidates = (first..edges.len())
        .take_while(|&i| edges[i].from == vertex)
        .filter(|&i| !used[i] || i == start);
    candidates.min_by_key(|&i| {
        let dir = edges[i].dir();
        preferences
            .iter()
            .position(|&p| p == dir)
            .unwrap_or(preferences.len())
    })
}

fn signed_area2(vertices: &[Vertex]) -> i64 {
    let n = vertices.len();
    (0..n)
        .map(|i| {
            let (r0, c0) = vertices[i];
            let (r1, c1) = vertices[(i + 1) % n];
            c0 as i64 * r1 as i64 - c1 as i64 * r0 as i64
        })
        .sum()
}

/// Drops corners where the outline runs straight on.
fn simplify(vertices: Vec<Vertex>) -> Vec<Vertex> {
    let n = vertices.len();
    let dir = |a: Vertex, b: Vertex| {
        (
            (b.0 as i64 - a.0 as i64).signum(),
            (b.1 as i64 - a.1 as i64).signum(),
        )
    };
    (0..n)
        .filter(|&i| {
            let prev = vertices[(i + n - 1) % n];
            let next = vertices[(i + 1) % n];
            dir(prev, vertices[i]) != dir(vertices[i], next)
        })
        .map(|i| vertices[i])
        .collect()
}

fn contains(ring: &[Vertex], (x, y): (f64, f64)) -> bool {
    let n = ring.len();
    let mut inside = false;
    for i in 0..n {
        let (yi, xi) = (ring[i].0 as f64, ring[i].1 as f64);
        let (yj, xj) = (ring[(i + n - 1) % n].0 as f64, ring[(i + n - 1) % n].1 as f64);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
    }
    inside
}

/// Groups holes under the smallest outer ring around them.
fn assemble(basin: u32, rings: Vec<Ring>) -> Result<Vec<Vec<Ring>>> {
    let (outers, holes): (Vec<Ring>, Vec<Ring>) = rings.into_iter().partition(|r| r.area2 < 0);
    let mut polygons: Vec<Vec<Ring>> = outers.into_iter().map(|r| vec![r]).collect();

    for hole in holes {
        let owner = polygons
            .iter()
            .enumerate()
            .filter(|(_, p)| contains(&p[0].vertices, hole.probe))
            .min_by_key(|(_, p)| -p[0].area2)
            .map(|(i, _)| i)
            .ok_or_else(|| {
                MidasError::Internal(format!("hole of basin {} has no outer ring", basin))
            })?;
        polygons[owner].push(hole);
    }
    Ok(polygons)
}

fn to_geometry(polygons: Vec<Vec<Ring>>, transform: &GeoTransform, reverse: bool) -> Geometry {
    let mut converted: Vec<Vec<Vec<Point>>> = polygons
        .into_iter()
        .map(|rings| {
            rings
                .into_iter()
                .map(|ring| {
                    let mut points: Vec<Point> = ring
                        .vertices
                        .iter()
                        .map(|&(r, c)| transform.corner(r as usize, c as usize))
                        .collect();
                    if reverse {
                        points.reverse();
                    }
                    points
                })
                .collect()
        })
        .collect();
    if converted.len() == 1 {
        Geometry::Polygon(converted.remove(0))
    } else {
        Geometry::MultiPolygon(converted)
    }
}
