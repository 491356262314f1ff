//! The resource catalog: every loaded mesh, texture, material and model
//! template, owned in one place and addressed by [`Ident`].
//!
//! Textures and materials additionally live in flat arrays so shaders can
//! index them directly; the catalog owns the identifier-to-index maps and
//! keeps a GPU-side mirror of the material table. Deleting a flat-array
//! element compacts by swap-with-last and publishes the vacated index plus
//! the transfer index on [`Topic::Resources`], so holders of raw indices
//! (materials for texture slots, scene nodes for material indices) can
//! renumber reactively instead of the catalog reaching into them.

use std::collections::HashMap;

use crate::bus::{Notification, NotificationBus, Topic};
use crate::data_structures::model::{
    DEFAULT_TEXTURE, Material, MaterialRaw, MeshResource, ModelTemplate,
};
use crate::data_structures::texture::{DecodedImage, TextureResource};
use crate::gpu::{BufferUsage, GpuBuffer, RenderDevice, SamplerDesc};
use crate::ident::Ident;

const MATERIAL_STRIDE: u64 = std::mem::size_of::<MaterialRaw>() as u64;

pub struct Catalog {
    meshes: HashMap<Ident, MeshResource>,
    models: HashMap<Ident, ModelTemplate>,

    textures: Vec<TextureResource>,
    texture_ids: Vec<Ident>,
    texture_index: HashMap<Ident, u32>,

    materials: Vec<Material>,
    material_ids: Vec<Ident>,
    material_index: HashMap<Ident, u32>,
    material_buffer: Box<dyn GpuBuffer>,
    material_capacity: u32,

    default_base_color: TextureResource,
    default_normal_map: TextureResource,
}

impl Catalog {
    pub const DEFAULT_MATERIAL_CAPACITY: u32 = 16;

    pub fn new(device: &dyn RenderDevice) -> Self {
        let material_buffer = device.create_buffer(
            "material table",
            Self::DEFAULT_MATERIAL_CAPACITY as u64 * MATERIAL_STRIDE,
            BufferUsage::Material,
        );
        Self {
            meshes: HashMap::new(),
            models: HashMap::new(),
            textures: Vec::new(),
            texture_ids: Vec::new(),
            texture_index: HashMap::new(),
            materials: Vec::new(),
            material_ids: Vec::new(),
            material_index: HashMap::new(),
            material_buffer,
            material_capacity: Self::DEFAULT_MATERIAL_CAPACITY,
            default_base_color: TextureResource::from_image(
                device,
                "default base color",
                &DecodedImage::default_base_color(),
                SamplerDesc::default(),
            ),
            default_normal_map: TextureResource::from_image(
                device,
                "default normal map",
                &DecodedImage::default_normal_map(),
                SamplerDesc::default(),
            ),
        }
    }

    // ---- lookups -------------------------------------------------------

    pub fn mesh(&self, id: Ident) -> Option<&MeshResource> {
        self.meshes.get(&id)
    }

    pub fn mesh_mut(&mut self, id: Ident) -> Option<&mut MeshResource> {
        self.meshes.get_mut(&id)
    }

    pub fn mesh_ids(&self) -> impl Iterator<Item = Ident> + '_ {
        self.meshes.keys().copied()
    }

    pub fn model(&self, id: Ident) -> Option<&ModelTemplate> {
        self.models.get(&id)
    }

    pub fn model_ids(&self) -> impl Iterator<Item = Ident> + '_ {
        self.models.keys().copied()
    }

    pub fn texture(&self, index: u32) -> Option<&TextureResource> {
        self.textures.get(index as usize)
    }

    pub fn texture_index_of(&self, id: Ident) -> Option<u32> {
        self.texture_index.get(&id).copied()
    }

    /// Texture bound for a color slot holding [`DEFAULT_TEXTURE`]: opaque
    /// white, so factor-only materials render their factors unmodified.
    pub fn default_base_color(&self) -> &TextureResource {
        &self.default_base_color
    }

    /// Texture bound for a normal slot holding [`DEFAULT_TEXTURE`]: the
    /// neutral up-facing normal.
    pub fn default_normal_map(&self) -> &TextureResource {
        &self.default_normal_map
    }

    pub fn material(&self, index: u32) -> Option<&Material> {
        self.materials.get(index as usize)
    }

    pub fn material_index_of(&self, id: Ident) -> Option<u32> {
        self.material_index.get(&id).copied()
    }

    /// GPU-side material table, bindable as a storage buffer. Entries are
    /// 64 bytes each, in flat-array order.
    pub fn material_buffer(&self) -> &dyn GpuBuffer {
        self.material_buffer.as_ref()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Whether an asset from this source path is already registered.
    /// Imports use this (plus their in-flight set) to reject duplicates.
    pub fn has_source(&self, source: &str) -> bool {
        self.models.values().any(|m| m.source == source)
    }

    // ---- registration --------------------------------------------------

    pub fn insert_mesh(&mut self, id: Ident, mesh: MeshResource) {
        if self.meshes.insert(id, mesh).is_some() {
            log::warn!("mesh {} registered twice, replacing", id);
        }
    }

    pub fn insert_model(&mut self, id: Ident, model: ModelTemplate) {
        if self.models.insert(id, model).is_some() {
            log::warn!("model {} registered twice, replacing", id);
        }
    }

    /// Append a texture to the flat array and return its index.
    pub fn insert_texture(&mut self, id: Ident, texture: TextureResource) -> u32 {
        let index = self.textures.len() as u32;
        self.textures.push(texture);
        self.texture_ids.push(id);
        self.texture_index.insert(id, index);
        index
    }

    /// Append a material to the flat array, mirror it into the GPU table
    /// (growing the table when full) and return its index.
    pub fn insert_material(
        &mut self,
        id: Ident,
        material: Material,
        device: &dyn RenderDevice,
    ) -> u32 {
        let index = self.materials.len() as u32;
        let raw = material.to_raw();
        self.materials.push(material);
        self.material_ids.push(id);
        self.material_index.insert(id, index);

        if index >= self.material_capacity {
            self.grow_material_buffer(device);
        } else {
            self.material_buffer
                .write(index as u64 * MATERIAL_STRIDE, bytemuck::bytes_of(&raw));
        }
        index
    }

    fn grow_material_buffer(&mut self, device: &dyn RenderDevice) {
        let capacity = (self.materials.len() as u32).next_power_of_two();
        log::debug!(
            "growing material table {} -> {}",
            self.material_capacity,
            capacity
        );
        self.material_buffer = device.create_buffer(
            "material table",
            capacity as u64 * MATERIAL_STRIDE,
            BufferUsage::Material,
        );
        self.material_capacity = capacity;
        let raws: Vec<MaterialRaw> = self.materials.iter().map(Material::to_raw).collect();
        self.material_buffer.write(0, bytemuck::cast_slice(&raws));
    }

    fn write_material(&mut self, index: u32) {
        if let Some(material) = self.materials.get(index as usize) {
            let raw = material.to_raw();
            self.material_buffer
                .write(index as u64 * MATERIAL_STRIDE, bytemuck::bytes_of(&raw));
        }
    }

    /// Edit one material in place and push the change into the GPU table.
    pub fn update_material(&mut self, index: u32, edit: impl FnOnce(&mut Material)) -> bool {
        let Some(material) = self.materials.get_mut(index as usize) else {
            log::warn!("update of unknown material index {} ignored", index);
            return false;
        };
        edit(material);
        self.write_material(index);
        true
    }

    // ---- deletion ------------------------------------------------------

    /// Delete a texture: swap-compact the flat array, renumber the texture
    /// slots of every material (deleted slots fall back to
    /// [`DEFAULT_TEXTURE`]), then publish the index transfer for external
    /// index holders.
    pub fn delete_texture(&mut self, id: Ident, bus: &NotificationBus) -> bool {
        let Some(index) = self.texture_index.remove(&id) else {
            log::warn!("delete of unknown texture {} ignored", id);
            return false;
        };
        let last = (self.textures.len() - 1) as u32;
        self.textures.swap_remove(index as usize);
        self.texture_ids.swap_remove(index as usize);
        let transfer = if index != last {
            let moved = self.texture_ids[index as usize];
            self.texture_index.insert(moved, index);
            Some(last)
        } else {
            None
        };

        let mut changed = Vec::new();
        for (i, material) in self.materials.iter_mut().enumerate() {
            let mut touched = false;
            for slot in material.texture_slots_mut() {
                if *slot == index {
                    *slot = DEFAULT_TEXTURE;
                    touched = true;
                } else if Some(*slot) == transfer {
                    *slot = index;
                    touched = true;
                }
            }
            if touched {
                changed.push(i as u32);
            }
        }
        for i in changed {
            self.write_material(i);
        }

        bus.publish(
            Topic::Resources,
            &Notification::TextureDeleted {
                texture: id,
                index,
                transfer,
            },
        );
        true
    }

    /// Delete a material: swap-compact the flat array and the GPU table,
    /// then publish the index transfer so scene nodes can renumber.
    pub fn delete_material(&mut self, id: Ident, bus: &NotificationBus) -> bool {
        let Some(index) = self.material_index.remove(&id) else {
            log::warn!("delete of unknown material {} ignored", id);
            return false;
        };
        let last = (self.materials.len() - 1) as u32;
        self.materials.swap_remove(index as usize);
        self.material_ids.swap_remove(index as usize);
        let transfer = if index != last {
            let moved = self.material_ids[index as usize];
            self.material_index.insert(moved, index);
            self.write_material(index);
            Some(last)
        } else {
            None
        };

        bus.publish(
            Topic::Resources,
            &Notification::MaterialDeleted {
                material: id,
                index,
                transfer,
            },
        );
        true
    }

    /// Delete a mesh and its instance registry. Scene nodes still bound to
    /// it are destroyed by the scene graph's reaction to the published
    /// message.
    pub fn delete_mesh(&mut self, id: Ident, bus: &NotificationBus) -> bool {
        if self.meshes.remove(&id).is_none() {
            log::warn!("delete of unknown mesh {} ignored", id);
            return false;
        }
        bus.publish(Topic::Resources, &Notification::MeshDeleted { mesh: id });
        true
    }

    /// Delete a model template together with every resource it introduced.
    /// Each constituent deletion publishes individually; `ModelDeleted`
    /// goes out last.
    pub fn delete_model(&mut self, id: Ident, bus: &NotificationBus) -> bool {
        let Some(model) = self.models.remove(&id) else {
            log::warn!("delete of unknown model {} ignored", id);
            return false;
        };
        for mesh in &model.meshes {
            self.delete_mesh(*mesh, bus);
        }
        for material in &model.materials {
            self.delete_material(*material, bus);
        }
        for texture in &model.textures {
            self.delete_texture(*texture, bus);
        }
        bus.publish(Topic::Resources, &Notification::ModelDeleted { model: id });
        true
    }
}
