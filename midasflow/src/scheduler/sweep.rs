//! Reverse topological sweep from headwaters to sinks.
//!
//! 1. A parallel pass counts, for every node, how many upstream nodes still
//!    have to be finalized, and rejects dangling pointers.
//! 2. Nodes with nothing upstream seed the traversal.
//! 3. Finalizing a node decrements its downstream node's count; the worker
//!    that brings it to zero continues with that node.
//!
//! A node's visitor therefore runs only after every upstream node's visitor
//! has finished. Nodes on a cycle never reach zero, so any node left
//! unfinalized is reported as a cycle.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::debug;

use crate::error::{MidasError, Result};
use crate::network::{Downstream, DrainageNetwork, NetworkReader, NodeId, UpstreamNodes};

use super::{MetricsSnapshot, TraceStack, Traversal, TraversalScheduler};

const NOT_A_NODE: u32 = u32::MAX;

/// Work done on each node once its upstream nodes are final.
pub trait SweepVisitor<N: DrainageNetwork>: Sync {
    fn finalize(
        &self,
        node: NodeId,
        upstream: &[NodeId],
        downstream: Downstream,
        reader: &mut N::Reader<'_>,
    ) -> Result<()>;
}

/// Visitor that only checks the network's integrity.
pub struct ValidateOnly;

impl<N: DrainageNetwork> SweepVisitor<N> for ValidateOnly {
    fn finalize(
        &self,
        _node: NodeId,
        _upstream: &[NodeId],
        _downstream: Downstream,
        _reader: &mut N::Reader<'_>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Counts from a completed sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOutcome {
    /// Nodes in the network.
    pub nodes: usize,
    /// Nodes with no upstream neighbor.
    pub headwaters: usize,
    pub metrics: MetricsSnapshot,
}

/// Entry point for the sweep.
pub struct DownstreamSweep;

impl DownstreamSweep {
    /// Finalizes every node in upstream-to-downstream order.
    ///
    /// Fails with a structural integrity error on a dangling pointer or a
    /// cycle.
    pub fn run<N, V>(network: &N, visitor: &V, scheduler: &TraversalScheduler) -> Result<SweepOutcome>
    where
        N: DrainageNetwork,
        V: SweepVisitor<N>,
    {
        let before = scheduler.metrics();
        let slots = network.node_slots();

        let (pending, nodes) = scheduler.install(|| count_pending(network, scheduler))?;
        scheduler.check_cancelled()?;

        let seeds: Vec<NodeId> = scheduler.install(|| {
            (0..slots)
                .into_par_iter()
                .filter(|&node| pending[node].load(Ordering::Relaxed) == 0)
                .collect()
        });
        let headwaters = seeds.len();
        debug!(nodes, headwaters, "downstream sweep starting");

        let sweep = Sweep {
            network,
            visitor,
            pending: &pending,
            finalized: AtomicUsize::new(0),
            _marker: PhantomData,
        };
        scheduler.run(&sweep, seeds)?;

        let finalized = sweep.finalized.load(Ordering::Acquire);
        if finalized < nodes {
            // Only nodes on a cycle keep a positive count, so the first one
            // found is on the cycle.
            let on_cycle = scheduler.install(|| {
                (0..slots).into_par_iter().find_first(|&node| {
                    let count = pending[node].load(Ordering::Relaxed);
                    count != 0 && count != NOT_A_NODE
                })
            });
            let node = on_cycle.map(|n| network.describe(n)).unwrap_or_default();
            debug!(finalized, nodes, %node, "sweep stalled on a cycle");
            return Err(MidasError::CycleDetected { node });
        }

        Ok(SweepOutcome {
            nodes,
            headwaters,
            metrics: scheduler.metrics().since(&before),
        })
    }
}

/// Returns per-node pending upstream counts and the number of nodes.
fn count_pending<N: DrainageNetwork>(
    network: &N,
    scheduler: &TraversalScheduler,
) -> Result<(Vec<AtomicU32>, usize)> {
    let slots = network.node_slots();
    let pending: Vec<AtomicU32> = (0..slots)
        .into_par_iter()
        .map(|_| AtomicU32::new(0))
        .collect();

    let nodes = (0..slots)
        .into_par_iter()
        .map_init(
            || network.reader(),
            |reader, node| -> Result<usize> {
                scheduler.check_cancelled()?;
                if !reader.is_node(node)? {
                    pending[node].store(NOT_A_NODE, Ordering::Relaxed);
                    return Ok(0);
                }
                match reader.downstream(node)? {
                    Downstream::Node(down) => {
                        pending[down].fetch_add(1, Ordering::Relaxed);
                    }
                    Downstream::Sink => {}
                    Downstream::Dangling(reason) => {
                        return Err(MidasError::DanglingPointer {
                            node: network.describe(node),
                            reason,
                        });
                    }
                }
                Ok(1)
            },
        )
        .try_reduce(|| 0, |a, b| Ok(a + b))?;

    Ok((pending, nodes))
}

struct Sweep<'a, N: DrainageNetwork, V> {
    network: &'a N,
    visitor: &'a V,
    pending: &'a [AtomicU32],
    finalized: AtomicUsize,
    _marker: PhantomData<fn(&N)>,
}

struct SweepLocal<'a, N: DrainageNetwork + 'a> {
    reader: N::Reader<'a>,
    upstream: UpstreamNodes,
    finalized: usize,
}

impl<'a, N, V> Traversal for Sweep<'a, N, V>
where
    N: DrainageNetwork + 'a,
    V: SweepVisitor<N>,
{
    type Frame = NodeId;
    type Local = SweepLocal<'a, N>;

    fn local(&self) -> SweepLocal<'a, N> {
        SweepLocal {
            reader: self.network.reader(),
            upstream: UpstreamNodes::new(),
            finalized: 0,
        }
    }

    fn visit(
        &self,
        node: NodeId,
        local: &mut SweepLocal<'a, N>,
        stack: &mut TraceStack<NodeId>,
    ) -> Result<()> {
        local.reader.upstream(node, &mut local.upstream)?;
        let downstream = local.reader.downstream(node)?;
        self.visitor
            .finalize(node, &local.upstream, downstream, &mut local.reader)?;
        local.finalized += 1;

        if let Downstream::Node(down) = downstream {
            if self.pending[down].fetch_sub(1, Ordering::AcqRel) == 1 {
                stack.push(down);
            }
        }
        Ok(())
    }

    fn finish(&self, mut local: SweepLocal<'a, N>) {
        local.reader.release();
        self.finalized.fetch_add(local.finalized, Ordering::AcqRel);
    }
}
