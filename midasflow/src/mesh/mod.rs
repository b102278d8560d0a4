//! Hierarchical basin mesh.
//!
//! Every accepted outlet anchors a basin. Each node upstream of an outlet
//! belongs to the basin of the nearest outlet downstream of it, and each
//! basin links to the basin its outlet drains into.
//!
//! # Architecture
//!
//! ```text
//!   outlets (input order) ──► claim outlet nodes sequentially
//!                                      │
//!                                      ▼
//!        one upstream traversal per outlet on the worker pool
//!        (CAS claim per node, stops at other outlet nodes)
//!                                      │
//!                                      ▼
//!        down_id = basin of the outlet's downstream node
//! ```
//!
//! Because outlet nodes are claimed before any traversal starts and every
//! traversal stops at them, the regions walked by different outlets never
//! overlap. A failed claim therefore means an engine defect and is reported
//! as an internal error.

mod boundary;
mod claim;
mod hierarchy;
mod hull;

pub use boundary::trace_basin_polygons;
pub use claim::{BasinClaims, UNASSIGNED};
pub use hierarchy::{BasinHierarchy, BasinSummary};
pub use hull::{convex_hull, hull_geometry};

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::dataset::Geometry;
use crate::error::{MidasError, Result};
use crate::network::{
    Downstream, DrainageNetwork, NetworkKind, NetworkReader, NodeId, NodeLayout, UpstreamNodes,
};
use crate::outlets::OutletSet;
use crate::scheduler::{MetricsSnapshot, TraceStack, Traversal, TraversalScheduler};

/// Basin assignment of a whole network.
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Basin id per node slot, [`UNASSIGNED`] where none.
    pub assignments: Vec<u32>,
    pub hierarchy: BasinHierarchy,
    /// Nodes draining to no outlet.
    pub unassigned: usize,
    pub metrics: MetricsSnapshot,
}

impl Mesh {
    pub fn basin_of(&self, node: NodeId) -> Option<u32> {
        match self.assignments.get(node) {
            Some(&UNASSIGNED) | None => None,
            Some(&basin) => Some(basin),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClaimFrame {
    node: NodeId,
    basin: u32,
}

struct ClaimTraversal<'a, N: DrainageNetwork> {
    network: &'a N,
    claims: &'a BasinClaims,
    outlet_nodes: &'a HashSet<NodeId>,
}

struct ClaimLocal<'a, N: DrainageNetwork + 'a> {
    reader: N::Reader<'a>,
    upstream: UpstreamNodes,
}

impl<'a, N: DrainageNetwork + 'a> Traversal for ClaimTraversal<'a, N> {
    type Frame = ClaimFrame;
    type Local = ClaimLocal<'a, N>;

    fn local(&self) -> ClaimLocal<'a, N> {
        ClaimLocal {
            reader: self.network.reader(),
            upstream: UpstreamNodes::new(),
        }
    }

    fn visit(
        &self,
        frame: ClaimFrame,
        local: &mut ClaimLocal<'a, N>,
        stack: &mut TraceStack<ClaimFrame>,
    ) -> Result<()> {
        local.reader.upstream(frame.node, &mut local.upstream)?;
        for &up in &local.upstream {
            if self.outlet_nodes.contains(&up) {
                continue;
            }
            if let Err(held) = self.claims.claim(up, frame.basin) {
                return Err(MidasError::ClaimConflict {
                    node: self.network.describe(up),
                    held,
                    claimant: frame.basin,
                });
            }
            stack.push(ClaimFrame {
                node: up,
                basin: frame.basin,
            });
        }
        Ok(())
    }

    fn finish(&self, mut local: ClaimLocal<'a, N>) {
        local.reader.release();
    }
}

/// Builds basin meshes.
pub struct MeshBuilder;

impl MeshBuilder {
    /// Assigns nodes to the accepted outlets of `outlets`.
    ///
    /// The network must already have passed an integrity sweep; the claim
    /// traversal does not detect cycles on its own.
    pub fn build<N: DrainageNetwork>(
        network: &N,
        outlets: &OutletSet,
        scheduler: &TraversalScheduler,
    ) -> Result<Mesh> {
        let before = scheduler.metrics();
        let claims = scheduler.install(|| BasinClaims::new(network.node_slots()));

        let mut outlet_nodes = HashSet::with_capacity(outlets.accepted().len());
        for outlet in outlets.accepted() {
            if let Err(held) = claims.claim(outlet.node, outlet.id) {
                return Err(MidasError::ClaimConflict {
                    node: network.describe(outlet.node),
                    held,
                    claimant: outlet.id,
                });
            }
            outlet_nodes.insert(outlet.node);
        }

        let traversal = ClaimTraversal {
            network,
            claims: &claims,
            outlet_nodes: &outlet_nodes,
        };
        let seeds = outlets
            .accepted()
            .iter()
            .map(|o| ClaimFrame {
                node: o.node,
                basin: o.id,
            })
            .collect();
        scheduler.run(&traversal, seeds)?;

        // Downstream links need every claim in place.
        let mut reader = network.reader();
        let mut summaries = Vec::with_capacity(outlets.accepted().len());
        for outlet in outlets.accepted() {
            let down_id = match reader.downstream(outlet.node)? {
                Downstream::Node(down) => claims.basin(down),
                Downstream::Sink | Downstream::Dangling(_) => None,
            };
            summaries.push(BasinSummary {
                id: outlet.id,
                ordinal: outlet.ordinal,
                node: outlet.node,
                down_id,
                nodes: 0,
            });
        }
        reader.release();

        let assignments = claims.into_vec();
        let (counts, unassigned) = scheduler.install(|| count_basins(network, &assignments))?;
        for summary in &mut summaries {
            summary.nodes = counts.get(&summary.id).copied().unwrap_or(0);
        }
        let hierarchy = BasinHierarchy::new(summaries)?;

        let metrics = scheduler.metrics().since(&before);
        debug!(
            frames = metrics.frames_visited,
            tasks = metrics.tasks_spawned,
            "claim traversal finished"
        );
        info!(
            basins = hierarchy.len(),
            roots = hierarchy.roots().len(),
            unassigned,
            "basin mesh built"
        );

        Ok(Mesh {
            assignments,
            hierarchy,
            unassigned,
            metrics,
        })
    }

    /// Outline of every basin: traced cell unions on grids, convex hulls of
    /// node positions on tables. Ordered by basin id.
    pub fn boundaries<N: DrainageNetwork>(
        network: &N,
        mesh: &Mesh,
        scheduler: &TraversalScheduler,
    ) -> Result<Vec<(u32, Option<Geometry>)>> {
        scheduler.install(|| match network.layout() {
            NodeLayout::Grid(geometry) => {
                let traced =
                    trace_basin_polygons(&mesh.assignments, &geometry.shape, &geometry.transform)?;
                Ok(traced.into_iter().map(|(id, g)| (id, Some(g))).collect())
            }
            NodeLayout::Table(_) => {
                let mut members: HashMap<u32, Vec<_>> = HashMap::new();
                for (node, &basin) in mesh.assignments.iter().enumerate() {
                    if basin != UNASSIGNED {
                        members.entry(basin).or_default().push(network.position(node));
                    }
                }
                let mut hulls: Vec<(u32, Option<Geometry>)> = members
                    .into_par_iter()
                    .map(|(id, points)| (id, hull_geometry(&points)))
                    .collect();
                hulls.sort_by_key(|(id, _)| *id);
                Ok(hulls)
            }
        })
    }
}

/// Node count per basin, and the number of nodes in no basin.
fn count_basins<N: DrainageNetwork>(
    network: &N,
    assignments: &[u32],
) -> Result<(HashMap<u32, usize>, usize)> {
    let is_grid = network.kind() == NetworkKind::Grid;
    assignments
        .par_iter()
        .enumerate()
        .map_init(
            || network.reader(),
            |reader, (node, &basin)| -> Result<(u32, bool)> {
                let is_node = !is_grid || basin != UNASSIGNED || reader.is_node(node)?;
                Ok((basin, is_node))
            },
        )
        .try_fold(
            || (HashMap::new(), 0usize),
            |(mut counts, mut unassigned), item| {
                let (basin, is_node) = item?;
                if basin != UNASSIGNED {
                    *counts.entry(basin).or_insert(0) += 1;
                } else if is_node {
                    unassigned += 1;
                }
                Ok((counts, unassigned))
            },
        )
        .try_reduce(
            || (HashMap::new(), 0),
            |(mut a, ua), (b, ub)| {
                for (basin, n) in b {
                    *a.entry(basin).or_insert(0) += n;
                }
                Ok((a, ua + ub))
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::coord::{GeoTransform, GridShape, Point};
    use crate::diagnostics::Diagnostics;
    use crate::encoding::DirectionEncoding;
    use crate::network::{GridGeometry, GridNetwork, NodeRecord, TableNetwork};
    use crate::outlets::OutletRecord;

    fn scheduler(threads: usize, stack: usize) -> TraversalScheduler {
        let config = EngineConfig::new()
            .with_num_threads(threads)
            .with_tracing_stack_size(stack);
        TraversalScheduler::new(&config).unwrap()
    }

    fn node(id: i64, down: i64) -> NodeRecord {
        NodeRecord {
            id,
            down_id: Some(down),
            x: id as f64,
            y: 0.0,
            weight: None,
            length: None,
        }
    }

    /// 1 -> 2 -> 3 -> 4 -> out, with 5 -> 2 and 6 -> 5.
    fn network() -> TableNetwork {
        TableNetwork::from_records(
            vec![
                node(1, 2),
                node(2, 3),
                node(3, 4),
                node(4, 0),
                node(5, 2),
                node(6, 5),
            ],
            0,
        )
        .unwrap()
    }

    fn outlets(net: &TableNetwork, at: &[(u32, f64)], sched: &TraversalScheduler) -> OutletSet {
        let records = at
            .iter()
            .enumerate()
            .map(|(i, &(id, x))| OutletRecord::new(i + 1, id, Point::new(x, 0.0)))
            .collect();
        OutletSet::resolve(records, net, None, sched, &mut Diagnostics::new()).unwrap()
    }

    #[test]
    fn test_nearest_downstream_outlet_claims() {
        let net = network();
        let sched = scheduler(4, 2);
        let set = outlets(&net, &[(10, 4.0), (20, 5.0)], &sched);
        let mesh = MeshBuilder::build(&net, &set, &sched).unwrap();

        assert_eq!(mesh.assignments, vec![10, 10, 10, 10, 20, 20]);
        assert_eq!(mesh.unassigned, 0);
        assert_eq!(mesh.hierarchy.parent(20), Some(10));
        assert_eq!(mesh.hierarchy.get(10).unwrap().nodes, 4);
        assert_eq!(mesh.hierarchy.get(20).unwrap().nodes, 2);
    }

    #[test]
    fn test_nodes_below_outlets_stay_unassigned() {
        let net = network();
        let sched = scheduler(2, 8);
        let set = outlets(&net, &[(7, 2.0)], &sched);
        let mesh = MeshBuilder::build(&net, &set, &sched).unwrap();
        assert_eq!(mesh.basin_of(0), Some(7));
        assert_eq!(mesh.basin_of(2), None);
        assert_eq!(mesh.unassigned, 2);
        assert_eq!(mesh.hierarchy.roots(), vec![7]);
    }

    #[test]
    fn test_table_boundaries_are_hulls() {
        let net = network();
        let sched = scheduler(1, 8);
        let set = outlets(&net, &[(10, 4.0), (20, 6.0)], &sched);
        let mesh = MeshBuilder::build(&net, &set, &sched).unwrap();
        let outlines = MeshBuilder::boundaries(&net, &mesh, &sched).unwrap();
        assert_eq!(outlines.len(), 2);
        assert_eq!(outlines[0].0, 10);
        // all nodes lie on y = 0, so hulls are lines or points
        assert!(matches!(outlines[0].1, Some(Geometry::LineString(_))));
        assert_eq!(outlines[1].1, Some(Geometry::Point(Point::new(6.0, 0.0))));
    }

    #[test]
    fn test_grid_mesh_skips_nodata() {
        // S  S  ND
        // E  0  W
        #[rustfmt::skip]
        let values = [
            4, 4, -1,
            1, 0, 16,
        ];
        let net = GridNetwork::from_directions(
            GridGeometry::new(GridShape::new(2, 3, 2), GeoTransform::unit()),
            DirectionEncoding::POWER2,
            Some(-1.0),
            &values,
        );
        let sched = scheduler(2, 4);
        let records = vec![
            OutletRecord::new(1, 1, Point::new(1.5, -1.5)),
            OutletRecord::new(2, 2, Point::new(0.5, -0.5)),
        ];
        let set = OutletSet::resolve(records, &net, None, &sched, &mut Diagnostics::new()).unwrap();
        let mesh = MeshBuilder::build(&net, &set, &sched).unwrap();
        assert_eq!(mesh.assignments, vec![2, 1, 0, 1, 1, 1]);
        assert_eq!(mesh.unassigned, 0);
        assert_eq!(mesh.hierarchy.parent(2), Some(1));

        let outlines = MeshBuilder::boundaries(&net, &mesh, &sched).unwrap();
        assert_eq!(outlines.len(), 2);
    }
}
