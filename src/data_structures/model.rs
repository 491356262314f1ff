//! Mesh and material resources, and loaded-model templates.
//!
//! A [`MeshResource`] is the live GPU side of one mesh: vertex/index
//! buffers plus its per-frame-slot [`InstanceRegistry`]. A [`Material`] is
//! a value record of scalar factors and texture-slot indices, mirrored
//! into a flat GPU-visible table owned by the catalog. A [`ModelTemplate`]
//! is what an import produces: the node hierarchy of an asset (not live
//! scene nodes) plus the identifiers of everything it introduced.

use crate::data_structures::instance::{Instance, InstanceDraw, InstanceRegistry};
use crate::gpu::{BufferUsage, GpuBuffer, RenderDevice};
use crate::ident::Ident;

/// Sentinel texture index meaning "sample the built-in default texture".
pub const DEFAULT_TEXTURE: u32 = u32::MAX;

pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
    pub bitangent: [f32; 3],
}

impl Vertex for ModelVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<ModelVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 3,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 11]>() as wgpu::BufferAddress,
                    shader_location: 4,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// One mesh's GPU resources: geometry plus the frame-pipelined instance set.
pub struct MeshResource {
    pub name: String,
    vertex_buffer: Box<dyn GpuBuffer>,
    index_buffer: Box<dyn GpuBuffer>,
    index_count: u32,
    pub instances: InstanceRegistry,
}

impl MeshResource {
    pub fn new(
        device: &dyn RenderDevice,
        name: &str,
        vertices: &[ModelVertex],
        indices: &[u32],
        frames_in_flight: usize,
    ) -> Self {
        let vertex_buffer = device.create_buffer_init(
            &format!("{name} vertex buffer"),
            bytemuck::cast_slice(vertices),
            BufferUsage::Vertex,
        );
        let index_buffer = device.create_buffer_init(
            &format!("{name} index buffer"),
            bytemuck::cast_slice(indices),
            BufferUsage::Index,
        );
        Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            instances: InstanceRegistry::new(device, frames_in_flight, name),
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// One instanced draw over this mesh's geometry for the given frame
    /// slot, or `None` when the slot has no live instances.
    pub fn draw(&self, slot: usize) -> Option<MeshDraw<'_>> {
        let instances = self.instances.draw(slot)?;
        Some(MeshDraw {
            vertex: self.vertex_buffer.as_ref(),
            index: self.index_buffer.as_ref(),
            index_count: self.index_count,
            instances,
        })
    }
}

/// Parameters for a single instanced draw call of one mesh.
pub struct MeshDraw<'a> {
    pub vertex: &'a dyn GpuBuffer,
    pub index: &'a dyn GpuBuffer,
    pub index_count: u32,
    pub instances: InstanceDraw<'a>,
}

/// Material value record: scalar factors plus up to five texture slots.
///
/// Texture slots hold indices into the catalog's flat texture array, or
/// [`DEFAULT_TEXTURE`] when the source asset referenced nothing (or the
/// referenced image failed to load). Identifier-to-array-index lives in
/// the catalog so the array can compact without renumbering identifiers.
#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub base_color_factor: [f32; 4],
    pub emissive_factor: [f32; 3],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub occlusion_strength: f32,
    pub normal_scale: f32,
    pub base_color_texture: u32,
    pub metallic_roughness_texture: u32,
    pub normal_texture: u32,
    pub occlusion_texture: u32,
    pub emissive_texture: u32,
}

impl Material {
    pub fn to_raw(&self) -> MaterialRaw {
        MaterialRaw {
            base_color_factor: self.base_color_factor,
            emissive_factor: self.emissive_factor,
            metallic_factor: self.metallic_factor,
            roughness_factor: self.roughness_factor,
            occlusion_strength: self.occlusion_strength,
            normal_scale: self.normal_scale,
            base_color_texture: self.base_color_texture,
            metallic_roughness_texture: self.metallic_roughness_texture,
            normal_texture: self.normal_texture,
            occlusion_texture: self.occlusion_texture,
            emissive_texture: self.emissive_texture,
        }
    }

    /// All five texture slots, for renumbering after texture-array
    /// compaction.
    pub fn texture_slots_mut(&mut self) -> [&mut u32; 5] {
        [
            &mut self.base_color_texture,
            &mut self.metallic_roughness_texture,
            &mut self.normal_texture,
            &mut self.occlusion_texture,
            &mut self.emissive_texture,
        ]
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color_factor: [1.0, 1.0, 1.0, 1.0],
            emissive_factor: [0.0, 0.0, 0.0],
            metallic_factor: 0.0,
            roughness_factor: 1.0,
            occlusion_strength: 1.0,
            normal_scale: 1.0,
            base_color_texture: DEFAULT_TEXTURE,
            metallic_roughness_texture: DEFAULT_TEXTURE,
            normal_texture: DEFAULT_TEXTURE,
            occlusion_texture: DEFAULT_TEXTURE,
            emissive_texture: DEFAULT_TEXTURE,
        }
    }
}

/**
 * GPU-visible material record. 64 bytes, laid out in 16-byte rows so the
 * flat table can be bound as a storage buffer with std430 layout.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialRaw {
    pub base_color_factor: [f32; 4],
    pub emissive_factor: [f32; 3],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub occlusion_strength: f32,
    pub normal_scale: f32,
    pub base_color_texture: u32,
    pub metallic_roughness_texture: u32,
    pub normal_texture: u32,
    pub occlusion_texture: u32,
    pub emissive_texture: u32,
}

/// One node of a loaded asset's hierarchy template.
///
/// Parents always precede their children in [`ModelTemplate::nodes`], so a
/// single forward walk can instantiate the hierarchy.
#[derive(Clone, Debug)]
pub struct TemplateNode {
    pub name: String,
    pub parent: Option<usize>,
    pub local: Instance,
    /// Mesh-bearing nodes allocate one GPU instance when instantiated.
    pub mesh: Option<Ident>,
    /// Index into the catalog's flat material array.
    pub material: u32,
}

/// A named, loaded asset: hierarchy template plus the resources it
/// introduced. Instantiating it into the scene graph walks `nodes` and
/// creates live scene nodes.
#[derive(Clone, Debug)]
pub struct ModelTemplate {
    pub name: String,
    pub source: String,
    pub nodes: Vec<TemplateNode>,
    pub meshes: Vec<Ident>,
    pub materials: Vec<Ident>,
    pub textures: Vec<Ident>,
}
