//! Outlet resolution.
//!
//! Outlet features read from a layer are snapped onto network nodes and
//! checked for usable identifiers. Rejected outlets are recorded as
//! diagnostics and skipped; they never fail a run on their own.
//!
//! # Rules
//!
//! - an outlet without a positive integer id or without a location is rejected
//! - an outlet that does not snap to a node is rejected
//! - a basin id used by an earlier accepted outlet is rejected
//! - when several outlets snap to the same node, the first in input order keeps
//!   it and the rest are rejected

use std::collections::HashMap;
use std::fmt;

use rayon::prelude::*;
use tracing::debug;

use crate::coord::Point;
use crate::diagnostics::{Diagnostics, Issue};
use crate::error::Result;
use crate::network::{DrainageNetwork, NodeId};
use crate::scheduler::TraversalScheduler;

/// One feature of an outlets layer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutletRecord {
    /// 1-based position in the layer.
    pub ordinal: usize,
    /// Basin id, or why it could not be read.
    pub id: std::result::Result<u32, String>,
    /// Object id for grouping longest flow paths.
    pub oid: Option<String>,
    pub point: Option<Point>,
}

impl OutletRecord {
    pub fn new(ordinal: usize, id: u32, point: Point) -> Self {
        Self {
            ordinal,
            id: Ok(id),
            oid: None,
            point: Some(point),
        }
    }

    pub fn with_oid(mut self, oid: impl Into<String>) -> Self {
        self.oid = Some(oid.into());
        self
    }
}

/// Why an outlet was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    InvalidId(String),
    NoLocation,
    NotSnapped,
    DuplicateId { id: u32, first: usize },
    SharedNode { kept_by: u32 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidId(reason) => write!(f, "invalid id: {}", reason),
            RejectReason::NoLocation => write!(f, "no location"),
            RejectReason::NotSnapped => write!(f, "does not snap to any node"),
            RejectReason::DuplicateId { id, first } => {
                write!(f, "id {} already used by outlet #{}", id, first)
            }
            RejectReason::SharedNode { kept_by } => {
                write!(f, "node already taken by basin {}", kept_by)
            }
        }
    }
}

/// An accepted outlet on its network node.
#[derive(Debug, Clone, PartialEq)]
pub struct SnappedOutlet {
    pub ordinal: usize,
    pub id: u32,
    pub oid: Option<String>,
    pub node: NodeId,
    /// Position of the node, not of the original point.
    pub position: Point,
}

/// Outlets after snapping, in input order.
#[derive(Debug, Clone, Default)]
pub struct OutletSet {
    records: Vec<OutletRecord>,
    accepted: Vec<SnappedOutlet>,
    rejected: Vec<(usize, RejectReason)>,
}

impl OutletSet {
    /// Snaps every record onto `network`.
    ///
    /// Snapping runs in parallel; acceptance is decided afterwards in input
    /// order so the outcome does not depend on the thread count.
    pub fn resolve<N: DrainageNetwork>(
        records: Vec<OutletRecord>,
        network: &N,
        snap_distance: Option<f64>,
        scheduler: &TraversalScheduler,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let snapped: Vec<Option<NodeId>> = scheduler.install(|| {
            records
                .par_iter()
                .map(|record| match (&record.id, record.point) {
                    (Ok(_), Some(point)) => network.snap(point, snap_distance),
                    _ => Ok(None),
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        let mut ids: HashMap<u32, usize> = HashMap::new();
        let mut nodes: HashMap<NodeId, u32> = HashMap::new();

        for (record, node) in records.iter().zip(snapped) {
            let verdict = match (&record.id, record.point, node) {
                (Err(reason), _, _) => Err(RejectReason::InvalidId(reason.clone())),
                (Ok(_), None, _) => Err(RejectReason::NoLocation),
                (Ok(_), Some(_), None) => Err(RejectReason::NotSnapped),
                (Ok(id), Some(_), Some(node)) => {
                    if let Some(&first) = ids.get(id) {
                        Err(RejectReason::DuplicateId { id: *id, first })
                    } else if let Some(&kept_by) = nodes.get(&node) {
                        Err(RejectReason::SharedNode { kept_by })
                    } else {
                        Ok((*id, node))
                    }
                }
            };

            match verdict {
                Ok((id, node)) => {
                    ids.insert(id, record.ordinal);
                    nodes.insert(node, id);
                    accepted.push(SnappedOutlet {
                        ordinal: record.ordinal,
                        id,
                        oid: record.oid.clone(),
                        node,
                        position: network.position(node),
                    });
                }
                Err(reason) => {
                    diagnostics.push(Issue::OutletRejected {
                        ordinal: record.ordinal,
                        reason: reason.clone(),
                    });
                    rejected.push((record.ordinal, reason));
                }
            }
        }

        debug!(
            outlets = records.len(),
            accepted = accepted.len(),
            rejected = rejected.len(),
            "outlets resolved"
        );
        Ok(Self {
            records,
            accepted,
            rejected,
        })
    }

    pub fn records(&self) -> &[OutletRecord] {
        &self.records
    }

    pub fn accepted(&self) -> &[SnappedOutlet] {
        &self.accepted
    }

    pub fn rejected(&self) -> &[(usize, RejectReason)] {
        &self.rejected
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Accepted outlet for a layer ordinal.
    pub fn accepted_for(&self, ordinal: usize) -> Option<&SnappedOutlet> {
        self.accepted
            .binary_search_by_key(&ordinal, |o| o.ordinal)
            .ok()
            .map(|i| &self.accepted[i])
    }
}
