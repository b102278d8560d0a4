//! Traversal counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Lock-free counters updated by every worker.
#[derive(Debug, Default)]
pub struct TraversalMetrics {
    frames_visited: AtomicU64,
    tasks_spawned: AtomicU64,
    frames_spilled: AtomicU64,
    peak_depth: AtomicUsize,
}

/// Point-in-time copy of [`TraversalMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_visited: u64,
    pub tasks_spawned: u64,
    pub frames_spilled: u64,
    /// Deepest trace stack seen in any task.
    pub peak_depth: usize,
}

impl TraversalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_visited(&self, n: u64) {
        self.frames_visited.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_task(&self) {
        self.tasks_spawned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_spilled(&self, n: u64) {
        self.frames_spilled.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_depth(&self, depth: usize) {
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_visited: self.frames_visited.load(Ordering::Relaxed),
            tasks_spawned: self.tasks_spawned.load(Ordering::Relaxed),
            frames_spilled: self.frames_spilled.load(Ordering::Relaxed),
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Counter differences since an earlier snapshot.
    pub fn since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_visited: self.frames_visited - earlier.frames_visited,
            tasks_spawned: self.tasks_spawned - earlier.tasks_spawned,
            frames_spilled: self.frames_spilled - earlier.frames_spilled,
            peak_depth: self.peak_depth,
        }
    }
}
