//! wgpu-backed implementation of the device interface.
//!
//! The renderer's device/queue bootstrap lives outside this crate; callers
//! hand an already created `wgpu::Device` + `wgpu::Queue` pair to
//! [`WgpuDevice::new`]. Fences are modeled with
//! `Queue::on_submitted_work_done`, which wgpu fires once the submission
//! the callback was registered against has finished on the GPU.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use wgpu::util::DeviceExt;

use super::{
    AddressMode, BufferUsage, FilterMode, GpuBuffer, GpuFence, GpuTexture2d, RenderDevice,
    SamplerDesc, TextureDesc,
};

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self { device, queue }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

fn map_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    match usage {
        BufferUsage::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        BufferUsage::Index => wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
        BufferUsage::Instance => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        BufferUsage::Material => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    }
}

fn map_filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Linear => wgpu::FilterMode::Linear,
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
    }
}

fn map_address(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

impl RenderDevice for WgpuDevice {
    fn create_buffer(&self, label: &str, size: u64, usage: BufferUsage) -> Box<dyn GpuBuffer> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: map_usage(usage),
            mapped_at_creation: false,
        });
        Box::new(WgpuBuffer {
            buffer,
            queue: self.queue.clone(),
        })
    }

    fn create_buffer_init(
        &self,
        label: &str,
        contents: &[u8],
        usage: BufferUsage,
    ) -> Box<dyn GpuBuffer> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: map_usage(usage),
            });
        Box::new(WgpuBuffer {
            buffer,
            queue: self.queue.clone(),
        })
    }

    fn create_texture_2d(
        &self,
        label: &str,
        desc: &TextureDesc,
        pixels: &[u8],
    ) -> Box<dyn GpuTexture2d> {
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let format = if desc.srgb {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * desc.width),
                rows_per_image: Some(desc.height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: map_address(desc.sampler.address_mode),
            address_mode_v: map_address(desc.sampler.address_mode),
            address_mode_w: map_address(desc.sampler.address_mode),
            mag_filter: map_filter(desc.sampler.mag_filter),
            min_filter: map_filter(desc.sampler.min_filter),
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });

        Box::new(WgpuTexture2d {
            texture,
            view,
            sampler,
            desc: *desc,
        })
    }

    fn submit(&self) -> Box<dyn GpuFence> {
        // An empty submission flushes queued write_buffer/write_texture work
        // so the completion callback covers all of it.
        self.queue.submit(std::iter::empty());
        let signaled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&signaled);
        self.queue.on_submitted_work_done(move || {
            flag.store(true, Ordering::Release);
        });
        Box::new(WgpuFence {
            device: self.device.clone(),
            signaled,
        })
    }
}

pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    queue: wgpu::Queue,
}

impl WgpuBuffer {
    /// The underlying buffer, for the pipeline layer's bind/draw calls.
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

impl GpuBuffer for WgpuBuffer {
    fn write(&self, offset: u64, data: &[u8]) {
        assert!(
            offset + data.len() as u64 <= self.buffer.size(),
            "buffer write out of bounds"
        );
        self.queue.write_buffer(&self.buffer, offset, data);
    }

    fn size(&self) -> u64 {
        self.buffer.size()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct WgpuTexture2d {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    desc: TextureDesc,
}

impl GpuTexture2d for WgpuTexture2d {
    fn dimensions(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    fn sampler(&self) -> SamplerDesc {
        self.desc.sampler
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct WgpuFence {
    device: wgpu::Device,
    signaled: Arc<AtomicBool>,
}

impl GpuFence for WgpuFence {
    fn is_signaled(&self) -> bool {
        if !self.signaled.load(Ordering::Acquire) {
            // Callbacks only fire while the device is maintained.
            let _ = self.device.poll(wgpu::PollType::Poll);
        }
        self.signaled.load(Ordering::Acquire)
    }

    fn wait(&self) {
        while !self.signaled.load(Ordering::Acquire) {
            let _ = self.device.poll(wgpu::PollType::wait_indefinitely());
        }
    }
}
