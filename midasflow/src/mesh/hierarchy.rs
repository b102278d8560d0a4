//! Basin hierarchy tree.
//!
//! Each basin links to the basin its outlet drains into. Links always point
//! strictly downstream, so the tree is acyclic; [`BasinHierarchy::new`]
//! still checks it before anything is written.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::{MidasError, Result};
use crate::network::NodeId;

/// One basin of a mesh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasinSummary {
    pub id: u32,
    /// Position of the outlet in its layer.
    pub ordinal: usize,
    /// Outlet node.
    #[serde(skip)]
    pub node: NodeId,
    /// Basin immediately downstream, if any.
    pub down_id: Option<u32>,
    /// Nodes assigned to the basin.
    pub nodes: usize,
}

/// Basins with their downstream links, in outlet input order.
#[derive(Debug, Clone)]
pub struct BasinHierarchy {
    basins: Vec<BasinSummary>,
    index: HashMap<u32, usize>,
}

impl BasinHierarchy {
    /// Builds the tree, failing if a link is unknown or loops.
    pub fn new(basins: Vec<BasinSummary>) -> Result<Self> {
        let index: HashMap<u32, usize> = basins
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect();
        if index.len() != basins.len() {
            return Err(MidasError::Internal("duplicate basin id in hierarchy".into()));
        }
        for basin in &basins {
            if let Some(down) = basin.down_id {
                if !index.contains_key(&down) {
                    return Err(MidasError::Internal(format!(
                        "basin {} links to unknown basin {}",
                        basin.id, down
                    )));
                }
            }
        }

        let hierarchy = Self { basins, index };
        hierarchy.check_acyclic()?;
        Ok(hierarchy)
    }

    fn check_acyclic(&self) -> Result<()> {
        // 0 = unseen, 1 = on the current chain, 2 = reaches a root
        let mut state = vec![0u8; self.basins.len()];
        for start in 0..self.basins.len() {
            let mut chain = Vec::new();
            let mut current = Some(start);
            while let Some(i) = current {
                match state[i] {
                    2 => break,
                    1 => {
                        return Err(MidasError::Internal(format!(
                            "basin hierarchy loops at basin {}",
                            self.basins[i].id
                        )))
                    }
                    _ => {}
                }
                state[i] = 1;
                chain.push(i);
                current = self.basins[i].down_id.map(|d| self.index[&d]);
            }
            for i in chain {
                state[i] = 2;
            }
        }
        Ok(())
    }

    pub fn basins(&self) -> &[BasinSummary] {
        &self.basins
    }

    pub fn len(&self) -> usize {
        self.basins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.basins.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&BasinSummary> {
        self.index.get(&id).map(|&i| &self.basins[i])
    }

    pub fn parent(&self, id: u32) -> Option<u32> {
        self.get(id).and_then(|b| b.down_id)
    }

    /// Basins draining directly into `id`, in outlet input order.
    pub fn children(&self, id: u32) -> Vec<u32> {
        self.basins
            .iter()
            .filter(|b| b.down_id == Some(id))
            .map(|b| b.id)
            .collect()
    }

    /// Basins that drain out of the network.
    pub fn roots(&self) -> Vec<u32> {
        self.basins
            .iter()
            .filter(|b| b.down_id.is_none())
            .map(|b| b.id)
            .collect()
    }

    /// Number of links from `id` to its root.
    pub fn depth(&self, id: u32) -> Option<usize> {
        let mut depth = 0;
        let mut current = self.get(id)?;
        while let Some(down) = current.down_id {
            current = self.get(down)?;
            depth += 1;
        }
        Some(depth)
    }

    /// Writes `id,down_id,nodes` rows; roots have an empty `down_id`.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let write_err = |source| MidasError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };
        let mut out = BufWriter::new(File::create(path).map_err(write_err)?);
        writeln!(out, "id,down_id,nodes").map_err(write_err)?;
        for basin in &self.basins {
            let down = basin.down_id.map(|d| d.to_string()).unwrap_or_default();
            writeln!(out, "{},{},{}", basin.id, down, basin.nodes).map_err(write_err)?;
        }
        out.flush().map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basin(id: u32, down_id: Option<u32>, nodes: usize) -> BasinSummary {
        BasinSummary {
            id,
            ordinal: id as usize,
            node: 0,
            down_id,
            nodes,
        }
    }

    #[test]
    fn test_tree_queries() {
        let tree = BasinHierarchy::new(vec![
            basin(1, None, 10),
            basin(2, Some(1), 4),
            basin(3, Some(1), 3),
            basin(4, Some(3), 1),
        ])
        .unwrap();
        assert_eq!(tree.roots(), vec![1]);
        assert_eq!(tree.children(1), vec![2, 3]);
        assert_eq!(tree.parent(4), Some(3));
        assert_eq!(tree.depth(4), Some(2));
        assert_eq!(tree.depth(9), None);
    }

    #[test]
    fn test_rejects_loops_and_unknown_links() {
        let err = BasinHierarchy::new(vec![basin(1, Some(2), 1), basin(2, Some(1), 1)]).unwrap_err();
        assert!(matches!(err, MidasError::Internal(_)));
        let err = BasinHierarchy::new(vec![basin(1, Some(5), 1)]).unwrap_err();
        assert!(matches!(err, MidasError::Internal(_)));
    }

    #[test]
    fn test_write_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hier.csv");
        let tree = BasinHierarchy::new(vec![basin(5, None, 7), basin(2, Some(5), 3)]).unwrap();
        tree.write_csv(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id,down_id,nodes\n5,,7\n2,5,3\n"
        );
    }
}
