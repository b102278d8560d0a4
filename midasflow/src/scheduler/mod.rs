//! Traversal scheduler.
//!
//! Walks over drainage networks never recurse on the native call stack.
//! Each pool task owns a [`TraceStack`] of frames and loops over it; frames
//! that would overflow the stack are handed back to the pool as new tasks
//! ("loop then task").
//!
//! # Architecture
//!
//! ```text
//!  seeds ──chunk──▶ scope.spawn(drain)  ×  ceil(seeds / seed_chunk_size)
//!
//!  drain(task):
//!    stack ← frames
//!    loop:
//!      cancelled? ──yes──▶ stop
//!      frame ← stack.pop()          (none ──▶ finish(local), done)
//!      visit(frame, local, stack)   (error ──▶ record first, abort all)
//!      for f in stack.take_spilled():
//!          scope.spawn(drain([f]))
//! ```
//!
//! The first error raised by any worker is kept and every other worker
//! stops at its next frame boundary. An external [`CancelToken`] stops the
//! run the same way and yields [`MidasError::Cancelled`].
//!
//! # Example
//!
//! ```ignore
//! let scheduler = TraversalScheduler::new(&EngineConfig::default())?;
//! scheduler.run(&my_traversal, seeds)?;
//! let metrics = scheduler.metrics();
//! ```

mod cancel;
mod metrics;
mod stack;
mod sweep;

pub use cancel::CancelToken;
pub use metrics::{MetricsSnapshot, TraversalMetrics};
pub use stack::TraceStack;
pub use sweep::{DownstreamSweep, SweepOutcome, SweepVisitor, ValidateOnly};

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rayon::{Scope, ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{MidasError, Result};

/// A walk expressed as frames processed by pool workers.
pub trait Traversal: Sync {
    /// Unit of pending work.
    type Frame: Send;

    /// Per-task state, created when a task starts draining.
    type Local;

    fn local(&self) -> Self::Local;

    /// Processes one frame; follow-up frames go onto `stack`.
    fn visit(
        &self,
        frame: Self::Frame,
        local: &mut Self::Local,
        stack: &mut TraceStack<Self::Frame>,
    ) -> Result<()>;

    /// Called when a task's stack has drained.
    fn finish(&self, _local: Self::Local) {}
}

/// Worker pool that runs [`Traversal`]s.
pub struct TraversalScheduler {
    pool: ThreadPool,
    stack_capacity: usize,
    seed_chunk: usize,
    cancel: CancelToken,
    metrics: TraversalMetrics,
}

impl TraversalScheduler {
    /// Builds a pool with `config.num_threads` workers (0 = all CPUs).
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("midasflow-worker-{}", i))
            .build()
            .map_err(|e| MidasError::WorkerPool(e.to_string()))?;
        debug!(
            threads = pool.current_num_threads(),
            stack_capacity = config.tracing_stack_size,
            seed_chunk = config.seed_chunk_size,
            "traversal scheduler ready"
        );
        Ok(Self {
            pool,
            stack_capacity: config.tracing_stack_size,
            seed_chunk: config.seed_chunk_size,
            cancel: config.cancel.clone(),
            metrics: TraversalMetrics::new(),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn stack_capacity(&self) -> usize {
        self.stack_capacity
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Fails with [`MidasError::Cancelled`] once the run was cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(MidasError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs a closure inside the pool so rayon parallel iterators use it.
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(f)
    }

    /// Processes every seed frame and everything reachable from them.
    pub fn run<T: Traversal>(&self, traversal: &T, seeds: Vec<T::Frame>) -> Result<()> {
        self.check_cancelled()?;

        let run = Run {
            traversal,
            capacity: self.stack_capacity,
            cancel: &self.cancel,
            abort: AtomicBool::new(false),
            failure: Mutex::new(None),
            metrics: &self.metrics,
        };

        let seed_chunk = self.seed_chunk;
        self.pool.scope(|scope| {
            let run = &run;
            let mut seeds = seeds.into_iter().peekable();
            while seeds.peek().is_some() {
                let chunk: Vec<T::Frame> = seeds.by_ref().take(seed_chunk).collect();
                scope.spawn(move |s| run.drain(s, chunk));
            }
        });

        if let Some(err) = run.failure.into_inner() {
            return Err(err);
        }
        self.check_cancelled()
    }
}

/// State shared by the tasks of one [`TraversalScheduler::run`].
struct Run<'a, T: Traversal> {
    traversal: &'a T,
    capacity: usize,
    cancel: &'a CancelToken,
    abort: AtomicBool,
    failure: Mutex<Option<MidasError>>,
    metrics: &'a TraversalMetrics,
}

impl<'a, T: Traversal> Run<'a, T> {
    #[inline]
    fn stopped(&self) -> bool {
        self.abort.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    fn fail(&self, err: MidasError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            debug!(error = %err, "traversal aborted");
            *slot = Some(err);
        }
        self.abort.store(true, Ordering::Release);
    }

    fn drain<'s>(&'s self, scope: &Scope<'s>, frames: Vec<T::Frame>) {
        self.metrics.add_task();
        if self.stopped() {
            return;
        }

        let mut stack = match TraceStack::with_capacity(self.capacity) {
            Ok(stack) => stack,
            Err(err) => return self.fail(err),
        };
        for frame in frames {
            stack.push(frame);
        }
        self.spawn_spilled(scope, &mut stack);

        let mut local = self.traversal.local();
        let mut visited = 0u64;
        while let Some(frame) = stack.pop() {
            if self.stopped() {
                break;
            }
            if let Err(err) = self.traversal.visit(frame, &mut local, &mut stack) {
                self.fail(err);
                break;
            }
            visited += 1;
            if stack.has_spilled() {
                self.spawn_spilled(scope, &mut stack);
            }
        }

        self.metrics.add_visited(visited);
        self.metrics.record_depth(stack.peak());
        self.traversal.finish(local);
    }

    fn spawn_spilled<'s>(&'s self, scope: &Scope<'s>, stack: &mut TraceStack<T::Frame>) {
        let spilled = stack.take_spilled();
        self.metrics.add_spilled(spilled.len() as u64);
        for frame in spilled {
            scope.spawn(move |s| self.drain(s, vec![frame]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    /// Visits every node of a complete binary tree, summing node labels.
    struct TreeSum {
        depth: u32,
        total: AtomicU64,
    }

    impl Traversal for TreeSum {
        type Frame = (u64, u32);
        type Local = u64;

        fn local(&self) -> u64 {
            0
        }

        fn visit(&self, (label, level): (u64, u32), sum: &mut u64, stack: &mut TraceStack<(u64, u32)>) -> Result<()> {
            *sum += label;
            if level < self.depth {
                stack.push((label * 2, level + 1));
                stack.push((label * 2 + 1, level + 1));
            }
            Ok(())
        }

        fn finish(&self, sum: u64) {
            self.total.fetch_add(sum, Ordering::Relaxed);
        }
    }

    fn expected_tree_sum(depth: u32) -> u64 {
        // Labels 1..2^(depth+1) in heap order.
        let n = (1u64 << (depth + 1)) - 1;
        n * (n + 1) / 2
    }

    #[test]
    fn test_visits_every_frame() {
        let scheduler = TraversalScheduler::new(&EngineConfig::new().with_num_threads(4)).unwrap();
        let tree = TreeSum {
            depth: 10,
            total: AtomicU64::new(0),
        };
        scheduler.run(&tree, vec![(1, 0)]).unwrap();
        assert_eq!(tree.total.load(Ordering::Relaxed), expected_tree_sum(10));
        assert_eq!(scheduler.metrics().frames_visited, (1 << 11) - 1);
    }

    #[test]
    fn test_tiny_stack_spills_to_tasks() {
        let config = EngineConfig::new()
            .with_num_threads(2)
            .with_tracing_stack_size(1);
        let scheduler = TraversalScheduler::new(&config).unwrap();
        let tree = TreeSum {
            depth: 8,
            total: AtomicU64::new(0),
        };
        scheduler.run(&tree, vec![(1, 0)]).unwrap();
        assert_eq!(tree.total.load(Ordering::Relaxed), expected_tree_sum(8));
        let metrics = scheduler.metrics();
        assert!(metrics.frames_spilled > 0);
        assert!(metrics.tasks_spawned > 1);
        assert_eq!(metrics.peak_depth, 1);
    }

    #[test]
    fn test_seed_chunks() {
        let config = EngineConfig::new().with_num_threads(2).with_seed_chunk_size(3);
        let scheduler = TraversalScheduler::new(&config).unwrap();
        let tree = TreeSum {
            depth: 0,
            total: AtomicU64::new(0),
        };
        let seeds: Vec<_> = (1..=10).map(|i| (i, 0)).collect();
        scheduler.run(&tree, seeds).unwrap();
        assert_eq!(tree.total.load(Ordering::Relaxed), 55);
        assert_eq!(scheduler.metrics().tasks_spawned, 4);
    }

    struct FailAt(u64);

    impl Traversal for FailAt {
        type Frame = u64;
        type Local = ();

        fn local(&self) {}

        fn visit(&self, frame: u64, _: &mut (), stack: &mut TraceStack<u64>) -> Result<()> {
            if frame == self.0 {
                return Err(MidasError::CycleDetected {
                    node: frame.to_string(),
                });
            }
            if frame < 1_000 {
                stack.push(frame + 1);
            }
            Ok(())
        }
    }

    #[test]
    fn test_first_error_is_returned() {
        let scheduler = TraversalScheduler::new(&EngineConfig::new().with_num_threads(2)).unwrap();
        let err = scheduler.run(&FailAt(500), vec![0]).unwrap_err();
        assert!(matches!(err, MidasError::CycleDetected { ref node } if node == "500"));
    }

    #[test]
    fn test_scheduler_is_reusable_after_failure() {
        let scheduler = TraversalScheduler::new(&EngineConfig::new().with_num_threads(2)).unwrap();
        assert!(scheduler.run(&FailAt(3), vec![0]).is_err());
        assert!(scheduler.run(&FailAt(5_000), vec![0]).is_ok());
    }

    #[test]
    fn test_external_cancel() {
        let cancel = CancelToken::new();
        let config = EngineConfig::new().with_cancel_token(cancel.clone());
        let scheduler = TraversalScheduler::new(&config).unwrap();
        cancel.cancel();
        let err = scheduler.run(&FailAt(u64::MAX), vec![0]).unwrap_err();
        assert!(matches!(err, MidasError::Cancelled));
    }
}
