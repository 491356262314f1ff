//! GPU device collaborator interface.
//!
//! The core never names a concrete graphics API: it only needs buffer and
//! image creation, uploads, and a binary completion signal (fence) with a
//! non-blocking "is signaled" query and a blocking wait. Those primitives
//! are expressed here as object-safe traits. [`wgpu_device::WgpuDevice`]
//! backs them with wgpu for real rendering; [`headless::HeadlessDevice`]
//! is a CPU-side stand-in for tests and CI.
//!
//! All device calls are main-thread operations. Decode tasks never touch
//! these traits; completed CPU-side bundles are handed to the main thread
//! first (see [`crate::import`]).

use std::any::Any;

pub mod headless;
pub mod pacer;
pub mod wgpu_device;

/// Coarse intent of a buffer, mapped to backend usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Per-instance vertex data, rewritten every replay.
    Instance,
    /// The flat material table visible to shaders.
    Material,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Linear,
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Repeat,
    ClampToEdge,
}

/// Sampling parameters stored alongside each texture.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode: AddressMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
        }
    }
}

/// Creation parameters for a 2D texture holding RGBA8 pixels.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// sRGB for color maps, linear for data maps (normals etc.).
    pub srgb: bool,
    pub sampler: SamplerDesc,
}

/// A GPU buffer. Writes go through the owning device's transfer queue.
pub trait GpuBuffer {
    /// Upload `data` at byte `offset`. Panics when the write would run past
    /// the end of the buffer; callers size buffers before writing.
    fn write(&self, offset: u64, data: &[u8]);
    fn size(&self) -> u64;
    fn as_any(&self) -> &dyn Any;
}

/// A GPU 2D texture plus its sampling parameters.
pub trait GpuTexture2d {
    fn dimensions(&self) -> (u32, u32);
    fn sampler(&self) -> SamplerDesc;
    fn as_any(&self) -> &dyn Any;
}

/// Binary completion signal for previously submitted GPU work.
pub trait GpuFence {
    /// Non-blocking signal query.
    fn is_signaled(&self) -> bool;
    /// Block until the covered work has finished on the GPU.
    fn wait(&self);
}

/// The device primitives the core consumes.
///
/// Allocation failure (device memory exhaustion) has no degraded mode in
/// this core; implementations panic, which is the specified fatal path.
pub trait RenderDevice {
    /// Create an uninitialized buffer of `size` bytes.
    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> Box<dyn GpuBuffer>;

    /// Create a buffer initialized with `contents`.
    fn create_buffer_init(
        &self,
        label: &str,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Box<dyn GpuBuffer>;

    /// Create a 2D texture and upload `pixels` (tightly packed RGBA8,
    /// `width * height * 4` bytes).
    fn create_texture_2d(
        &self,
        label: &str,
        desc: &TextureDesc,
        pixels: &[u8],
    ) -> Box<dyn GpuTexture2d>;

    /// Flush pending uploads and return a fence covering everything
    /// submitted so far.
    fn submit(&self) -> Box<dyn GpuFence>;
}
