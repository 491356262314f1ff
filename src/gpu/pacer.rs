//! Frame-slot rotation with fence-bounded reuse.
//!
//! With N frames in flight, frame slot S must not be rewritten until its
//! previous use (N frames ago) has finished on the GPU. [`FramePacer`]
//! owns one fence per slot: `begin_frame` blocks on the upcoming slot's
//! fence before handing the slot out, which bounds outstanding work to N
//! frames and makes the per-slot instance-buffer replay safe.

use super::GpuFence;

pub struct FramePacer {
    fences: Vec<Option<Box<dyn GpuFence>>>,
    current: usize,
}

impl FramePacer {
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "at least one frame slot is required");
        Self {
            fences: (0..frames_in_flight).map(|_| None).collect(),
            current: 0,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    /// Wait until the upcoming slot's previous GPU use has completed, then
    /// return the slot index. Replay and draw for this frame must use the
    /// returned slot.
    pub fn begin_frame(&mut self) -> usize {
        if let Some(fence) = self.fences[self.current].take() {
            fence.wait();
        }
        self.current
    }

    /// Record the fence covering this frame's submission and advance to
    /// the next slot.
    pub fn end_frame(&mut self, fence: Box<dyn GpuFence>) {
        self.fences[self.current] = Some(fence);
        self.current = (self.current + 1) % self.fences.len();
    }
}
