//! CPU-side device for tests and CI.
//!
//! Buffers are plain byte vectors and fences signal off a simulated clock:
//! a fence created by [`HeadlessDevice::submit`] becomes signaled once
//! [`HeadlessDevice::tick`] has been called `latency` more times, which
//! lets tests drive the "ready after N frames" behavior of the import
//! pipeline deterministically. `wait` advances the clock itself, the same
//! way a blocking fence wait would ride out the remaining frames.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{BufferUsage, GpuBuffer, GpuFence, GpuTexture2d, RenderDevice, SamplerDesc, TextureDesc};

pub struct HeadlessDevice {
    clock: Arc<AtomicU64>,
    latency: u64,
    buffers_created: Cell<u64>,
    textures_created: Cell<u64>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_latency(1)
    }

    /// A device whose fences signal `latency` ticks after submission.
    pub fn with_latency(latency: u64) -> Self {
        Self {
            clock: Arc::new(AtomicU64::new(0)),
            latency,
            buffers_created: Cell::new(0),
            textures_created: Cell::new(0),
        }
    }

    /// Advance the simulated GPU by one frame.
    pub fn tick(&self) {
        self.clock.fetch_add(1, Ordering::SeqCst);
    }

    /// Total buffers allocated so far; growth events show up here.
    pub fn buffers_created(&self) -> u64 {
        self.buffers_created.get()
    }

    pub fn textures_created(&self) -> u64 {
        self.textures_created.get()
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for HeadlessDevice {
    fn create_buffer(&self, _label: &str, size: u64, _usage: BufferUsage) -> Box<dyn GpuBuffer> {
        self.buffers_created.set(self.buffers_created.get() + 1);
        Box::new(HeadlessBuffer {
            data: RefCell::new(vec![0u8; size as usize]),
        })
    }

    fn create_buffer_init(
        &self,
        _label: &str,
        contents: &[u8],
        _usage: BufferUsage,
    ) -> Box<dyn GpuBuffer> {
        self.buffers_created.set(self.buffers_created.get() + 1);
        Box::new(HeadlessBuffer {
            data: RefCell::new(contents.to_vec()),
        })
    }

    fn create_texture_2d(
        &self,
        _label: &str,
        desc: &TextureDesc,
        pixels: &[u8],
    ) -> Box<dyn GpuTexture2d> {
        assert_eq!(
            pixels.len(),
            (desc.width * desc.height * 4) as usize,
            "texture upload size mismatch"
        );
        self.textures_created.set(self.textures_created.get() + 1);
        Box::new(HeadlessTexture {
            width: desc.width,
            height: desc.height,
            sampler: desc.sampler,
            pixels: pixels.to_vec(),
        })
    }

    fn submit(&self) -> Box<dyn GpuFence> {
        Box::new(HeadlessFence {
            clock: Arc::clone(&self.clock),
            ready_at: self.clock.load(Ordering::SeqCst) + self.latency,
        })
    }
}

pub struct HeadlessBuffer {
    data: RefCell<Vec<u8>>,
}

impl HeadlessBuffer {
    /// Snapshot of the buffer contents, for test assertions.
    pub fn contents(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }
}

impl GpuBuffer for HeadlessBuffer {
    fn write(&self, offset: u64, data: &[u8]) {
        let mut store = self.data.borrow_mut();
        let end = offset as usize + data.len();
        assert!(
            end <= store.len(),
            "buffer write out of bounds: {} > {}",
            end,
            store.len()
        );
        store[offset as usize..end].copy_from_slice(data);
    }

    fn size(&self) -> u64 {
        self.data.borrow().len() as u64
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct HeadlessTexture {
    width: u32,
    height: u32,
    sampler: SamplerDesc,
    pub pixels: Vec<u8>,
}

impl GpuTexture2d for HeadlessTexture {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn sampler(&self) -> SamplerDesc {
        self.sampler
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct HeadlessFence {
    clock: Arc<AtomicU64>,
    ready_at: u64,
}

impl GpuFence for HeadlessFence {
    fn is_signaled(&self) -> bool {
        self.clock.load(Ordering::SeqCst) >= self.ready_at
    }

    fn wait(&self) {
        self.clock.fetch_max(self.ready_at, Ordering::SeqCst);
    }
}
