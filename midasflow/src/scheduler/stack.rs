//! Capacity-bounded trace stack.

use crate::error::{MidasError, Result};

/// Explicit work stack that replaces recursion inside one task.
///
/// Pushes beyond the capacity do not grow the stack. They are parked as
/// spilled frames, which the scheduler turns into new pool tasks once the
/// current visit returns.
#[derive(Debug)]
pub struct TraceStack<F> {
    frames: Vec<F>,
    spilled: Vec<F>,
    capacity: usize,
    peak: usize,
}

impl<F> TraceStack<F> {
    /// Allocates room for `capacity` frames up front.
    ///
    /// Fails with a resource error when the allocation cannot be made.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(MidasError::invalid_parameter(
                "tracing_stack_size",
                "must be at least 1",
            ));
        }
        let mut frames = Vec::new();
        frames
            .try_reserve_exact(capacity)
            .map_err(|_| MidasError::StackAllocation { capacity })?;
        Ok(Self {
            frames,
            spilled: Vec::new(),
            capacity,
            peak: 0,
        })
    }

    /// Pushes a frame, spilling it when the stack is full.
    #[inline]
    pub fn push(&mut self, frame: F) {
        if self.frames.len() < self.capacity {
            self.frames.push(frame);
            self.peak = self.peak.max(self.frames.len());
        } else {
            self.spilled.push(frame);
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<F> {
        self.frames.pop()
    }

    /// Removes and returns the frames that did not fit.
    #[inline]
    pub fn take_spilled(&mut self) -> Vec<F> {
        std::mem::take(&mut self.spilled)
    }

    pub fn has_spilled(&self) -> bool {
        !self.spilled.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Deepest the stack has been.
    pub fn peak(&self) -> usize {
        self.peak
    }
}
