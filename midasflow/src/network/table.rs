//! Vector drainage networks given as a node table.
//!
//! Each record names its own id and the id of the node it drains into.
//! Records are indexed densely in input order, and upstream lists keep that
//! order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::coord::Point;
use crate::error::{Dangling, Result};

use super::{
    Downstream, DrainageNetwork, NetworkKind, NetworkReader, NodeId, NodeLayout, UpstreamNodes,
};

/// One row of a node table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    /// Downstream node id; absent or equal to the sink id means none.
    #[serde(default)]
    pub down_id: Option<i64>,
    pub x: f64,
    pub y: f64,
    /// Contributing weight, 1 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Length of the edge to the downstream node; straight-line distance when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
}

/// Resolved downstream pointer of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Node(NodeId),
    Sink,
    Missing(i64),
}

/// Resident node table with a compressed upstream index.
#[derive(Debug)]
pub struct TableNetwork {
    ids: Vec<i64>,
    positions: Vec<Point>,
    weights: Vec<f64>,
    lengths: Vec<Option<f64>>,
    links: Vec<Link>,
    up_offsets: Vec<usize>,
    up_nodes: Vec<NodeId>,
    index: HashMap<i64, NodeId>,
}

impl TableNetwork {
    /// Builds the network; fails on a duplicate node id.
    pub fn from_records(records: Vec<NodeRecord>, sink_id: i64) -> std::result::Result<Self, String> {
        let n = records.len();
        let mut index = HashMap::with_capacity(n);
        for (i, record) in records.iter().enumerate() {
            if index.insert(record.id, i).is_some() {
                return Err(format!("duplicate node id {}", record.id));
            }
        }

        let links: Vec<Link> = records
            .iter()
            .map(|record| match record.down_id {
                None => Link::Sink,
                Some(down) if down == sink_id => Link::Sink,
                Some(down) => match index.get(&down) {
                    Some(&node) => Link::Node(node),
                    None => Link::Missing(down),
                },
            })
            .collect();

        // Counting sort by downstream node keeps input order within each list.
        let mut up_offsets = vec![0usize; n + 1];
        for link in &links {
            if let Link::Node(down) = link {
                up_offsets[down + 1] += 1;
            }
        }
        for i in 0..n {
            up_offsets[i + 1] += up_offsets[i];
        }
        let mut cursor = up_offsets.clone();
        let mut up_nodes = vec![0; up_offsets[n]];
        for (node, link) in links.iter().enumerate() {
            if let Link::Node(down) = *link {
                up_nodes[cursor[down]] = node;
                cursor[down] += 1;
            }
        }

        Ok(Self {
            ids: records.iter().map(|r| r.id).collect(),
            positions: records.iter().map(|r| Point::new(r.x, r.y)).collect(),
            weights: records.iter().map(|r| r.weight.unwrap_or(1.0)).collect(),
            lengths: records.iter().map(|r| r.length).collect(),
            links,
            up_offsets,
            up_nodes,
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Dense index of a node id.
    pub fn node_of(&self, id: i64) -> Option<NodeId> {
        self.index.get(&id).copied()
    }

    pub fn link(&self, node: NodeId) -> Link {
        self.links[node]
    }

    fn upstream_slice(&self, node: NodeId) -> &[NodeId] {
        &self.up_nodes[self.up_offsets[node]..self.up_offsets[node + 1]]
    }
}

impl DrainageNetwork for TableNetwork {
    type Reader<'a> = TableReader<'a>;

    fn reader(&self) -> TableReader<'_> {
        TableReader { net: self }
    }

    fn node_slots(&self) -> usize {
        self.ids.len()
    }

    fn kind(&self) -> NetworkKind {
        NetworkKind::Table
    }

    fn layout(&self) -> NodeLayout<'_> {
        NodeLayout::Table(&self.ids)
    }

    fn position(&self, node: NodeId) -> Point {
        self.positions[node]
    }

    /// Nearest node within `max_distance`; ties go to the earlier record.
    fn snap(&self, point: Point, max_distance: Option<f64>) -> Result<Option<NodeId>> {
        let limit = max_distance.unwrap_or(f64::INFINITY);
        let mut best: Option<(NodeId, f64)> = None;
        for (node, position) in self.positions.iter().enumerate() {
            let d = position.distance(&point);
            if d <= limit && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((node, d));
            }
        }
        Ok(best.map(|(node, _)| node))
    }

    fn describe(&self, node: NodeId) -> String {
        format!("id {}", self.ids[node])
    }
}

/// Reader over a [`TableNetwork`]; the table is always resident.
pub struct TableReader<'a> {
    net: &'a TableNetwork,
}

impl<'a> NetworkReader for TableReader<'a> {
    fn is_node(&mut self, node: NodeId) -> Result<bool> {
        Ok(node < self.net.len())
    }

    fn downstream(&mut self, node: NodeId) -> Result<Downstream> {
        Ok(match self.net.links[node] {
            Link::Node(down) => Downstream::Node(down),
            Link::Sink => Downstream::Sink,
            Link::Missing(id) => Downstream::Dangling(Dangling::MissingNode(id)),
        })
    }

    fn upstream(&mut self, node: NodeId, out: &mut UpstreamNodes) -> Result<()> {
        out.clear();
        out.extend_from_slice(self.net.upstream_slice(node));
        Ok(())
    }

    fn weight(&mut self, node: NodeId) -> Result<f64> {
        Ok(self.net.weights[node])
    }

    fn edge_length(&mut self, from: NodeId, to: NodeId) -> f64 {
        self.net.lengths[from]
            .unwrap_or_else(|| self.net.positions[from].distance(&self.net.positions[to]))
    }
}
