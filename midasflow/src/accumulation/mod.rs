//! Flow accumulation.
//!
//! The accumulation of a node is its own weight plus the accumulation of
//! every node draining directly into it. Values are computed in a single
//! [`DownstreamSweep`], so a node is summed only after all of its upstream
//! nodes are final.
//!
//! # Architecture
//!
//! ```text
//!   headwaters ──► finalize(node) ──► last upstream arrival continues
//!                     │                      downstream
//!                     ▼
//!       acc[node] = weight(node) + Σ acc[upstream]
//! ```
//!
//! Values live in one `AtomicU64` per node slot holding `f64` bits. Each slot
//! is written once by the worker that finalizes it and read by the worker
//! that finalizes its downstream node.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::Result;
use crate::network::{Downstream, DrainageNetwork, NetworkReader, NodeId, UpstreamNodes};
use crate::scheduler::{DownstreamSweep, MetricsSnapshot, SweepVisitor, TraversalScheduler};

/// Number of orphan nodes named in diagnostics.
pub const ORPHAN_SAMPLE: usize = 5;

/// Accumulated weight of every node slot.
///
/// Holds the sweep's atomic slots directly; this array is the only per-node
/// value store, so a run needs 8 bytes per node slot beyond the network.
#[derive(Debug)]
pub struct Accumulation {
    /// `f64` bits indexed by node id; all ones for slots that are not nodes.
    values: Vec<AtomicU64>,
    pub nodes: usize,
    pub headwaters: usize,
    /// Nodes with neither upstream nor downstream neighbors.
    pub orphans: usize,
    /// The first orphans by node id.
    pub orphan_sample: Vec<NodeId>,
    pub metrics: MetricsSnapshot,
}

impl Accumulation {
    pub fn get(&self, node: NodeId) -> Option<f64> {
        let bits = self.values.get(node)?.load(Ordering::Relaxed);
        (bits != UNSET).then(|| f64::from_bits(bits))
    }

    /// Value of `node`, or `nodata` when the slot is not a node.
    pub fn value_or(&self, node: NodeId, nodata: f64) -> f64 {
        self.get(node).unwrap_or(nodata)
    }

    /// Number of node slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest accumulated value.
    pub fn max(&self) -> Option<f64> {
        (0..self.values.len())
            .filter_map(|node| self.get(node))
            .reduce(f64::max)
    }
}

struct AccumulateVisitor {
    values: Vec<AtomicU64>,
}

const UNSET: u64 = u64::MAX;

impl<N: DrainageNetwork> SweepVisitor<N> for AccumulateVisitor {
    fn finalize(
        &self,
        node: NodeId,
        upstream: &[NodeId],
        _downstream: Downstream,
        reader: &mut N::Reader<'_>,
    ) -> Result<()> {
        let mut sum = reader.weight(node)?;
        for &up in upstream {
            sum += f64::from_bits(self.values[up].load(Ordering::Acquire));
        }
        self.values[node].store(sum.to_bits(), Ordering::Release);
        Ok(())
    }
}

/// Flow accumulation engine.
pub struct FlowAccumulation;

impl FlowAccumulation {
    /// Accumulates weights over the whole network.
    ///
    /// Fails on a cycle or a dangling pointer.
    pub fn compute<N: DrainageNetwork>(
        network: &N,
        scheduler: &TraversalScheduler,
    ) -> Result<Accumulation> {
        let slots = network.node_slots();
        let values: Vec<AtomicU64> = scheduler.install(|| {
            (0..slots)
                .into_par_iter()
                .map(|_| AtomicU64::new(UNSET))
                .collect()
        });
        let visitor = AccumulateVisitor { values };
        let outcome = DownstreamSweep::run(network, &visitor, scheduler)?;

        let orphans = find_orphans(network, scheduler)?;
        let orphan_sample = orphans.iter().take(ORPHAN_SAMPLE).copied().collect();
        debug!(
            nodes = outcome.nodes,
            frames = outcome.metrics.frames_visited,
            tasks = outcome.metrics.tasks_spawned,
            "accumulation sweep finished"
        );
        info!(
            nodes = outcome.nodes,
            headwaters = outcome.headwaters,
            orphans = orphans.len(),
            "flow accumulation computed"
        );

        Ok(Accumulation {
            values: visitor.values,
            nodes: outcome.nodes,
            headwaters: outcome.headwaters,
            orphans: orphans.len(),
            orphan_sample,
            metrics: outcome.metrics,
        })
    }
}

/// Nodes that drain out of the network and receive nothing, in id order.
fn find_orphans<N: DrainageNetwork>(
    network: &N,
    scheduler: &TraversalScheduler,
) -> Result<Vec<NodeId>> {
    scheduler.install(|| {
        (0..network.node_slots())
            .into_par_iter()
            .map_init(
                || (network.reader(), UpstreamNodes::new()),
                |(reader, upstream), node| -> Result<Option<NodeId>> {
                    if !reader.is_node(node)? {
                        return Ok(None);
                    }
                    if reader.downstream(node)? != Downstream::Sink {
                        return Ok(None);
                    }
                    reader.upstream(node, upstream)?;
                    Ok(upstream.is_empty().then_some(node))
                },
            )
            .filter_map(|r| r.transpose())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::coord::{GeoTransform, GridShape};
    use crate::encoding::DirectionEncoding;
    use crate::network::{GridGeometry, GridNetwork, NodeRecord, TableNetwork};

    fn scheduler(threads: usize) -> TraversalScheduler {
        TraversalScheduler::new(&EngineConfig::new().with_num_threads(threads)).unwrap()
    }

    fn node(id: i64, down: i64, weight: Option<f64>) -> NodeRecord {
        NodeRecord {
            id,
            down_id: Some(down),
            x: id as f64,
            y: 0.0,
            weight,
            length: None,
        }
    }

    #[test]
    fn test_chain_with_branch() {
        // 1 -> 2 -> 3 -> 4 -> 5 -> out, 6 -> 3
        let net = TableNetwork::from_records(
            vec![
                node(1, 2, None),
                node(2, 3, None),
                node(3, 4, None),
                node(4, 5, None),
                node(5, 0, None),
                node(6, 3, Some(2.5)),
            ],
            0,
        )
        .unwrap();
        let acc = FlowAccumulation::compute(&net, &scheduler(3)).unwrap();
        let by_id: Vec<f64> = (0..6).map(|n| acc.get(n).unwrap()).collect();
        assert_eq!(by_id, vec![1.0, 2.0, 5.5, 6.5, 7.5, 2.5]);
        assert_eq!(acc.headwaters, 2);
        assert_eq!(acc.orphans, 0);
        assert_eq!(acc.max(), Some(7.5));
    }

    #[test]
    fn test_orphans_reported() {
        let net = TableNetwork::from_records(
            vec![node(1, 0, None), node(2, 3, None), node(3, 0, None), node(4, 0, None)],
            0,
        )
        .unwrap();
        let acc = FlowAccumulation::compute(&net, &scheduler(2)).unwrap();
        assert_eq!(acc.orphans, 2);
        assert_eq!(acc.orphan_sample, vec![0, 3]);
        assert_eq!(acc.get(0), Some(1.0));
    }

    #[test]
    fn test_grid_non_nodes_have_no_value() {
        // E  E  0
        // ND N  W
        #[rustfmt::skip]
        let values = [
            1, 1, 0,
            -1, 64, 16,
        ];
        let net = GridNetwork::from_directions(
            GridGeometry::new(GridShape::new(2, 3, 2), GeoTransform::unit()),
            DirectionEncoding::POWER2,
            Some(-1.0),
            &values,
        );
        let acc = FlowAccumulation::compute(&net, &scheduler(2)).unwrap();
        assert_eq!(acc.get(3), None);
        // cell (0,1) receives (0,0) and (1,1); (1,1) receives (1,2)
        assert_eq!(acc.get(4), Some(2.0));
        assert_eq!(acc.get(1), Some(4.0));
        assert_eq!(acc.get(2), Some(5.0));
        assert_eq!(acc.value_or(3, -9999.0), -9999.0);
        assert_eq!(acc.len(), 6);
    }
}
