//! Longest flow paths.
//!
//! For every node, `L(node)` is the length of the longest path from any
//! headwater down to it:
//!
//! ```text
//!   L(leaf) = 0
//!   L(node) = max over upstream u of L(u) + edge_length(u, node)
//! ```
//!
//! `L` is filled in by one [`DownstreamSweep`]. Upstream neighbors are
//! examined in the network's fixed order and a candidate only replaces the
//! current best when it is strictly longer, so ties go to the earliest
//! neighbor regardless of thread scheduling.
//!
//! Each node also records the head of its longest path. With `find_full`,
//! it additionally records which upstream neighbor the path came from, and
//! paths are rebuilt by walking those choices from each outlet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::coord::Point;
use crate::diagnostics::{Diagnostics, Issue};
use crate::error::Result;
use crate::network::{Downstream, DrainageNetwork, NetworkReader, NodeId};
use crate::outlets::{OutletRecord, OutletSet, SnappedOutlet};
use crate::scheduler::{DownstreamSweep, MetricsSnapshot, SweepVisitor, TraversalScheduler};

const NO_NODE: usize = usize::MAX;

/// Longest flow path of one outlet, or of one object with grouping.
#[derive(Debug, Clone, PartialEq)]
pub struct LongestPath {
    /// Layer ordinal of the outlet the path ends at.
    pub ordinal: usize,
    pub id: Option<u32>,
    pub oid: Option<String>,
    /// Basin anchored at the outlet; `None` when flagged.
    pub basin: Option<u32>,
    /// `None` when flagged.
    pub length: Option<f64>,
    pub head: Option<Point>,
    /// Snapped outlet position.
    pub outlet: Option<Point>,
    /// Node positions from head to outlet; only with `find_full`.
    pub path: Option<Vec<Point>>,
    /// The outlet has no basin.
    pub flagged: bool,
}

impl LongestPath {
    fn flagged(record: &OutletRecord) -> Self {
        Self {
            ordinal: record.ordinal,
            id: record.id.clone().ok(),
            oid: record.oid.clone(),
            basin: None,
            length: None,
            head: None,
            outlet: None,
            path: None,
            flagged: true,
        }
    }
}

/// Result of one extraction.
#[derive(Debug, Clone)]
pub struct LongestFlowPaths {
    pub paths: Vec<LongestPath>,
    pub nodes: usize,
    pub metrics: MetricsSnapshot,
}

impl LongestFlowPaths {
    pub fn flagged(&self) -> usize {
        self.paths.iter().filter(|p| p.flagged).count()
    }
}

struct LengthVisitor {
    lengths: Vec<AtomicU64>,
    heads: Vec<AtomicUsize>,
    /// Upstream neighbor on the longest path; only with `find_full`.
    choices: Option<Vec<AtomicUsize>>,
}

impl<N: DrainageNetwork> SweepVisitor<N> for LengthVisitor {
    fn finalize(
        &self,
        node: NodeId,
        upstream: &[NodeId],
        _downstream: Downstream,
        reader: &mut N::Reader<'_>,
    ) -> Result<()> {
        let mut best = 0.0f64;
        let mut best_up = NO_NODE;
        for &up in upstream {
            let candidate =
                f64::from_bits(self.lengths[up].load(Ordering::Acquire)) + reader.edge_length(up, node);
            if best_up == NO_NODE || candidate > best {
                best = candidate;
                best_up = up;
            }
        }

        let head = if best_up == NO_NODE {
            node
        } else {
            self.heads[best_up].load(Ordering::Acquire)
        };
        self.heads[node].store(head, Ordering::Release);
        if let Some(choices) = &self.choices {
            choices[node].store(best_up, Ordering::Release);
        }
        self.lengths[node].store(best.to_bits(), Ordering::Release);
        Ok(())
    }
}

/// Longest flow path engine.
pub struct LongestFlowPathExtractor;

impl LongestFlowPathExtractor {
    /// Computes one path per outlet record, or per object when
    /// `group_by_oid` is set.
    ///
    /// Records without an accepted outlet produce flagged entries and a
    /// diagnostic; they never fail the run.
    pub fn extract<N: DrainageNetwork>(
        network: &N,
        outlets: &OutletSet,
        find_full: bool,
        group_by_oid: bool,
        scheduler: &TraversalScheduler,
        diagnostics: &mut Diagnostics,
    ) -> Result<LongestFlowPaths> {
        let slots = network.node_slots();
        let visitor = scheduler.install(|| LengthVisitor {
            lengths: (0..slots).into_par_iter().map(|_| AtomicU64::new(0)).collect(),
            heads: (0..slots)
                .into_par_iter()
                .map(|_| AtomicUsize::new(NO_NODE))
                .collect(),
            choices: find_full.then(|| {
                (0..slots)
                    .into_par_iter()
                    .map(|_| AtomicUsize::new(NO_NODE))
                    .collect()
            }),
        });
        let outcome = DownstreamSweep::run(network, &visitor, scheduler)?;
        debug!(
            nodes = outcome.nodes,
            frames = outcome.metrics.frames_visited,
            find_full,
            "path lengths computed"
        );

        let per_outlet: Vec<LongestPath> = scheduler.install(|| {
            outlets
                .accepted()
                .par_iter()
                .map(|outlet| path_for(network, &visitor, outlet))
                .collect()
        });
        let by_ordinal: HashMap<usize, &LongestPath> =
            per_outlet.iter().map(|p| (p.ordinal, p)).collect();

        let paths = if group_by_oid {
            group_paths(outlets.records(), &by_ordinal)
        } else {
            outlets
                .records()
                .iter()
                .map(|record| match by_ordinal.get(&record.ordinal) {
                    Some(path) => (*path).clone(),
                    None => LongestPath::flagged(record),
                })
                .collect()
        };

        for path in paths.iter().filter(|p| p.flagged) {
            diagnostics.push(Issue::OutletFlagged {
                ordinal: path.ordinal,
                id: path.id,
            });
        }
        let result = LongestFlowPaths {
            paths,
            nodes: outcome.nodes,
            metrics: outcome.metrics,
        };
        info!(
            paths = result.paths.len(),
            flagged = result.flagged(),
            "longest flow paths extracted"
        );
        Ok(result)
    }
}

fn path_for<N: DrainageNetwork>(
    network: &N,
    visitor: &LengthVisitor,
    outlet: &SnappedOutlet,
) -> LongestPath {
    let node = outlet.node;
    let length = f64::from_bits(visitor.lengths[node].load(Ordering::Acquire));
    let head = visitor.heads[node].load(Ordering::Acquire);

    let path = visitor.choices.as_ref().map(|choices| {
        let mut nodes = vec![node];
        let mut current = node;
        loop {
            let up = choices[current].load(Ordering::Acquire);
            if up == NO_NODE {
                break;
            }
            nodes.push(up);
            current = up;
        }
        nodes.reverse();
        nodes.into_iter().map(|n| network.position(n)).collect()
    });

    LongestPath {
        ordinal: outlet.ordinal,
        id: Some(outlet.id),
        oid: outlet.oid.clone(),
        basin: Some(outlet.id),
        length: Some(length),
        head: (head != NO_NODE).then(|| network.position(head)),
        outlet: Some(outlet.position),
        path,
        flagged: false,
    }
}

/// One path per object id: the longest among its outlets, ties to the
/// earliest. Records without an object id stand alone.
fn group_paths(records: &[OutletRecord], by_ordinal: &HashMap<usize, &LongestPath>) -> Vec<LongestPath> {
    let mut order: Vec<Vec<&OutletRecord>> = Vec::new();
    let mut groups: HashMap<&str, usize> = HashMap::new();
    for record in records {
        match record.oid.as_deref() {
            Some(oid) => {
                let slot = *groups.entry(oid).or_insert_with(|| {
                    order.push(Vec::new());
                    order.len() - 1
                });
                order[slot].push(record);
            }
            None => order.push(vec![record]),
        }
    }

    order
        .into_iter()
        .map(|members| {
            let mut best: Option<&LongestPath> = None;
            for record in &members {
                if let Some(&path) = by_ordinal.get(&record.ordinal) {
                    if best.map_or(true, |b| path.length > b.length) {
                        best = Some(path);
                    }
                }
            }
            match best {
                Some(path) => path.clone(),
                None => LongestPath::flagged(members[0]),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::network::{NodeRecord, TableNetwork};

    fn scheduler(threads: usize) -> TraversalScheduler {
        TraversalScheduler::new(&EngineConfig::new().with_num_threads(threads)).unwrap()
    }

    fn node(id: i64, down: i64, x: f64, y: f64) -> NodeRecord {
        NodeRecord {
            id,
            down_id: Some(down),
            x,
            y,
            weight: None,
            length: None,
        }
    }

    /// Outlet 1 at the origin; a 3-long branch along x and a 4-long branch along y.
    fn network() -> TableNetwork {
        TableNetwork::from_records(
            vec![
                node(1, 0, 0.0, 0.0),
                node(2, 1, 1.0, 0.0),
                node(3, 2, 2.0, 0.0),
                node(4, 3, 3.0, 0.0),
                node(5, 1, 0.0, 2.0),
                node(6, 5, 0.0, 4.0),
            ],
            0,
        )
        .unwrap()
    }

    fn extract(
        net: &TableNetwork,
        records: Vec<OutletRecord>,
        find_full: bool,
        group: bool,
        threads: usize,
    ) -> (LongestFlowPaths, Diagnostics) {
        let sched = scheduler(threads);
        let mut diagnostics = Diagnostics::new();
        let set = OutletSet::resolve(records, net, Some(0.5), &sched, &mut diagnostics).unwrap();
        let result =
            LongestFlowPathExtractor::extract(net, &set, find_full, group, &sched, &mut diagnostics)
                .unwrap();
        (result, diagnostics)
    }

    #[test]
    fn test_longest_branch_wins() {
        let net = network();
        let records = vec![OutletRecord::new(1, 1, Point::new(0.0, 0.0))];
        let (result, _) = extract(&net, records, true, false, 3);
        let path = &result.paths[0];
        assert_eq!(path.length, Some(4.0));
        assert_eq!(path.head, Some(Point::new(0.0, 4.0)));
        assert_eq!(
            path.path.as_deref(),
            Some(&[Point::new(0.0, 4.0), Point::new(0.0, 2.0), Point::new(0.0, 0.0)][..])
        );
    }

    #[test]
    fn test_length_only_matches_full() {
        let net = network();
        let records = || {
            vec![
                OutletRecord::new(1, 1, Point::new(0.0, 0.0)),
                OutletRecord::new(2, 2, Point::new(2.0, 0.0)),
            ]
        };
        let (full, _) = extract(&net, records(), true, false, 2);
        let (short, _) = extract(&net, records(), false, false, 2);
        let lengths = |r: &LongestFlowPaths| r.paths.iter().map(|p| p.length).collect::<Vec<_>>();
        assert_eq!(lengths(&full), lengths(&short));
        assert_eq!(lengths(&short), vec![Some(4.0), Some(1.0)]);
        assert!(short.paths.iter().all(|p| p.path.is_none()));
        assert!(full.paths.iter().all(|p| p.path.is_some()));
    }

    #[test]
    fn test_tie_goes_to_first_upstream() {
        // 2 and 3 both reach 1 over a unit edge
        let net = TableNetwork::from_records(
            vec![
                node(1, 0, 0.0, 0.0),
                node(2, 1, 1.0, 0.0),
                node(3, 1, -1.0, 0.0),
            ],
            0,
        )
        .unwrap();
        let records = vec![OutletRecord::new(1, 1, Point::new(0.0, 0.0))];
        for threads in [1, 4] {
            let (result, _) = extract(&net, records.clone(), false, false, threads);
            assert_eq!(result.paths[0].head, Some(Point::new(1.0, 0.0)));
        }
    }

    #[test]
    fn test_unsnapped_outlet_is_flagged() {
        let net = network();
        let records = vec![
            OutletRecord::new(1, 1, Point::new(0.0, 0.0)),
            OutletRecord::new(2, 2, Point::new(50.0, 50.0)),
        ];
        let (result, diagnostics) = extract(&net, records, false, false, 2);
        assert_eq!(result.flagged(), 1);
        let flagged = &result.paths[1];
        assert!(flagged.flagged);
        assert_eq!(flagged.length, None);
        assert_eq!(flagged.basin, None);
        assert!(diagnostics
            .issues()
            .contains(&Issue::OutletFlagged { ordinal: 2, id: Some(2) }));
    }

    #[test]
    fn test_grouping_by_object() {
        let net = network();
        let records = vec![
            OutletRecord::new(1, 1, Point::new(2.0, 0.0)).with_oid("river"),
            OutletRecord::new(2, 2, Point::new(0.0, 0.0)).with_oid("river"),
            OutletRecord::new(3, 3, Point::new(3.0, 0.0)),
            OutletRecord::new(4, 4, Point::new(90.0, 0.0)).with_oid("lake"),
        ];
        let (result, _) = extract(&net, records, false, true, 2);
        let summary: Vec<_> = result
            .paths
            .iter()
            .map(|p| (p.oid.clone(), p.id, p.length))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Some("river".to_string()), Some(2), Some(4.0)),
                (None, Some(3), Some(0.0)),
                (Some("lake".to_string()), Some(4), None),
            ]
        );
    }
}
