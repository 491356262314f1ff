//! Texture resources and image decoding helpers.
//!
//! Decoding ([`DecodedImage`]) is pure CPU work and runs on the import
//! pipeline's background tasks; GPU texture creation
//! ([`TextureResource::from_image`]) only ever happens on the main thread
//! through the device trait. Textures are referenced by index from
//! materials (via the catalog's flat array) and by identifier from the UI.

use anyhow::Result;
use image::GenericImageView;

use crate::gpu::{GpuTexture2d, RenderDevice, SamplerDesc, TextureDesc};

/// CPU-side decoded image: tightly packed RGBA8 pixels.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// sRGB for color maps, linear for data maps (normals etc.).
    pub srgb: bool,
}

impl DecodedImage {
    /// Decode raw image file contents (PNG, JPEG, ...).
    ///
    /// `format` is an optional file-extension hint; without it the format
    /// is sniffed from the bytes.
    pub fn from_bytes(bytes: &[u8], format: Option<&str>, srgb: bool) -> Result<Self> {
        let img = match format.and_then(image::ImageFormat::from_extension) {
            Some(fmt) => image::load_from_memory_with_format(bytes, fmt)?,
            None => image::load_from_memory(bytes)?,
        };
        let (width, height) = img.dimensions();
        Ok(Self {
            width,
            height,
            pixels: img.to_rgba8().into_raw(),
            srgb,
        })
    }

    /// A solid-color image, used for built-in defaults.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4], srgb: bool) -> Self {
        Self {
            width,
            height,
            pixels: rgba
                .iter()
                .cycle()
                .take((width * height * 4) as usize)
                .copied()
                .collect(),
            srgb,
        }
    }

    /// The neutral blue/purple-ish color representing an undisturbed
    /// normal map.
    pub fn default_normal_map() -> Self {
        Self::solid(1, 1, [127, 127, 255, 255], false)
    }

    /// Opaque white; the default for color slots so factor-only materials
    /// render their factors unmodified.
    pub fn default_base_color() -> Self {
        Self::solid(1, 1, [255, 255, 255, 255], true)
    }
}

/// A live GPU texture with its sampling parameters and a display name.
pub struct TextureResource {
    pub name: String,
    pub texture: Box<dyn GpuTexture2d>,
}

impl TextureResource {
    /// Upload a decoded image. Main-thread only, like every device call.
    pub fn from_image(
        device: &dyn RenderDevice,
        name: &str,
        image: &DecodedImage,
        sampler: SamplerDesc,
    ) -> Self {
        let desc = TextureDesc {
            width: image.width,
            height: image.height,
            srgb: image.srgb,
            sampler,
        };
        Self {
            name: name.to_string(),
            texture: device.create_texture_2d(name, &desc, &image.pixels),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.texture.dimensions()
    }
}
