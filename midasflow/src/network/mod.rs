//! Drainage network model.
//!
//! A network is a forest of nodes in which every node drains into at most
//! one downstream node. Engines only see the [`DrainageNetwork`] trait; each
//! worker task reads through its own [`NetworkReader`], which for paged
//! grids also owns the task's tile lease.
//!
//! Two node kinds exist:
//!
//! - [`GridNetwork`]: raster cells with encoded D8 flow directions
//! - [`TableNetwork`]: network segments with explicit downstream ids

mod grid;
mod table;

pub use grid::{GridGeometry, GridNetwork, GridReader, TileLayer, WeightLayer};
pub use table::{Link, NodeRecord, TableNetwork, TableReader};

use smallvec::SmallVec;

use crate::coord::Point;
use crate::error::{Dangling, Result};

/// Dense node index.
pub type NodeId = usize;

/// Upstream neighbors of one node, in the network's fixed neighbor order.
pub type UpstreamNodes = SmallVec<[NodeId; 8]>;

/// Where a node drains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downstream {
    Node(NodeId),
    /// Drains out of the network.
    Sink,
    /// The pointer does not resolve.
    Dangling(Dangling),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Grid,
    Table,
}

/// How node-indexed values are laid out when written back out.
#[derive(Debug, Clone, Copy)]
pub enum NodeLayout<'a> {
    Grid(&'a GridGeometry),
    Table(&'a [i64]),
}

/// Read-only access to a drainage network shared by all workers.
pub trait DrainageNetwork: Sync {
    type Reader<'a>: NetworkReader
    where
        Self: 'a;

    /// Creates a reader for one worker task.
    fn reader(&self) -> Self::Reader<'_>;

    /// Size of the node index space; some slots may not be nodes.
    fn node_slots(&self) -> usize;

    fn kind(&self) -> NetworkKind;

    fn layout(&self) -> NodeLayout<'_>;

    /// Map position of a node.
    fn position(&self, node: NodeId) -> Point;

    /// Node that a map point snaps to, if any.
    fn snap(&self, point: Point, max_distance: Option<f64>) -> Result<Option<NodeId>>;

    /// Human-readable name of a node for diagnostics.
    fn describe(&self, node: NodeId) -> String;
}

/// Per-task view of a network.
pub trait NetworkReader {
    fn is_node(&mut self, node: NodeId) -> Result<bool>;

    fn downstream(&mut self, node: NodeId) -> Result<Downstream>;

    /// Replaces `out` with the nodes draining directly into `node`.
    fn upstream(&mut self, node: NodeId, out: &mut UpstreamNodes) -> Result<()>;

    /// Weight a node contributes to accumulation.
    fn weight(&mut self, node: NodeId) -> Result<f64>;

    /// Length of the edge from `from` to its downstream node `to`.
    fn edge_length(&mut self, from: NodeId, to: NodeId) -> f64;

    /// Drops any tiles held by this reader.
    fn release(&mut self) {}
}
