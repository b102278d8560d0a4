//! Per-node basin assignment with first-writer-wins claims.

use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::network::NodeId;

/// Basin id meaning "no basin".
pub const UNASSIGNED: u32 = 0;

/// One atomic basin slot per node.
pub struct BasinClaims {
    slots: Vec<AtomicU32>,
}

impl BasinClaims {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len)
                .into_par_iter()
                .map(|_| AtomicU32::new(UNASSIGNED))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Assigns `node` to `basin` unless it is already held.
    ///
    /// Returns the holder's id when the node was already claimed.
    #[inline]
    pub fn claim(&self, node: NodeId, basin: u32) -> Result<(), u32> {
        self.slots[node]
            .compare_exchange(UNASSIGNED, basin, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    #[inline]
    pub fn basin(&self, node: NodeId) -> Option<u32> {
        match self.slots[node].load(Ordering::Acquire) {
            UNASSIGNED => None,
            basin => Some(basin),
        }
    }

    /// Plain per-node basin ids, 0 where unassigned.
    pub fn into_vec(self) -> Vec<u32> {
        self.slots.into_par_iter().map(AtomicU32::into_inner).collect()
    }
}
