//! Per-instance transformation data and the per-mesh instance registry.
//!
//! Every mesh resource owns an [`InstanceRegistry`]: the GPU-resident set
//! of its live instances, duplicated across N frame slots so a frame still
//! executing on the GPU never races a CPU-side rewrite. Add, update and
//! remove calls do not touch buffers directly; they queue into every
//! slot's pending-operation collections and are replayed per slot right
//! before that slot's draw submission.

use std::collections::{HashMap, HashSet};
use std::ops::Mul;

use cgmath::{One, SquareMatrix};

use crate::gpu::{BufferUsage, GpuBuffer, RenderDevice};

/// Per-instance transformation: position, rotation (as quaternion), and scale.
///
/// Scene nodes hold these for their local and global transforms; the
/// registry packs them into [`InstanceRaw`] for the GPU.
#[derive(Clone, Debug)]
pub struct Instance {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Instance {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> cgmath::Matrix4<f32> {
        cgmath::Matrix4::from_translation(self.position)
            * cgmath::Matrix4::from(self.rotation)
            * cgmath::Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }

    /// Pack into the GPU payload, deriving the normal transform.
    pub fn to_raw(&self, tag: u32, material: u32) -> InstanceRaw {
        let world_matrix = self.to_matrix();
        debug_assert!(world_matrix.determinant().is_finite());
        InstanceRaw {
            model: world_matrix.into(),
            normal: cgmath::Matrix3::from(self.rotation).into(),
            tag,
            material,
        }
    }
}

impl Mul<Instance> for Instance {
    type Output = Self;

    fn mul(self, rhs: Instance) -> Self::Output {
        &self * &rhs
    }
}

impl<'a, 'b> Mul<&'b Instance> for &'a Instance {
    type Output = Instance;

    fn mul(self, rhs: &'b Instance) -> Self::Output {
        let new_rotation = self.rotation * rhs.rotation;

        let new_scale = cgmath::Vector3::new(
            self.scale.x * rhs.scale.x,
            self.scale.y * rhs.scale.y,
            self.scale.z * rhs.scale.z,
        );
        let scaled_rhs_pos = cgmath::Vector3::new(
            self.scale.x * rhs.position.x,
            self.scale.y * rhs.position.y,
            self.scale.z * rhs.position.z,
        );
        let new_position = self.position + (self.rotation * scaled_rhs_pos);

        Instance {
            position: new_position,
            rotation: new_rotation,
            scale: new_scale,
        }
    }
}

impl From<cgmath::Vector3<f32>> for Instance {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Instance {
            position,
            ..Default::default()
        }
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

/**
 * The raw instance is the actual data stored on the GPU: the model
 * transform, the derived normal transform, a caller-meaningful tag
 * (picking id) and the index into the flat material table.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 3]; 3],
    pub tag: u32,
    pub material: u32,
}

impl InstanceRaw {
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                // model matrix, one vec4 per slot
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // normal matrix as 3x3
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
                    shader_location: 9,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 19]>() as wgpu::BufferAddress,
                    shader_location: 10,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 22]>() as wgpu::BufferAddress,
                    shader_location: 11,
                    format: wgpu::VertexFormat::Float32x3,
                },
                // tag + material index
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 25]>() as wgpu::BufferAddress,
                    shader_location: 12,
                    format: wgpu::VertexFormat::Uint32x2,
                },
            ],
        }
    }
}

/// Caller-visible handle to one live instance of a mesh. Monotonic per
/// registry; a removed id is never handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

/// Draw parameters for one slot's instanced draw call.
pub struct InstanceDraw<'a> {
    pub buffer: &'a dyn GpuBuffer,
    pub count: u32,
}

const STRIDE: u64 = std::mem::size_of::<InstanceRaw>() as u64;

/// One frame slot's buffer projection of the logical instance set.
///
/// `ids`/`data` mirror the live region of the GPU buffer; `index_of` maps
/// instance ids to their current slot index. The three pending collections
/// hold operations queued since this slot's last replay.
struct FrameSlot {
    buffer: Box<dyn GpuBuffer>,
    capacity: u32,
    ids: Vec<InstanceId>,
    data: Vec<InstanceRaw>,
    index_of: HashMap<InstanceId, usize>,
    adds: Vec<(InstanceId, InstanceRaw)>,
    updates: HashMap<InstanceId, InstanceRaw>,
    removes: HashSet<InstanceId>,
}

impl FrameSlot {
    fn new(device: &dyn RenderDevice, label: &str, capacity: u32) -> Self {
        let buffer = device.create_buffer(label, capacity as u64 * STRIDE, BufferUsage::Instance);
        Self {
            buffer,
            capacity,
            ids: Vec::new(),
            data: Vec::new(),
            index_of: HashMap::new(),
            adds: Vec::new(),
            updates: HashMap::new(),
            removes: HashSet::new(),
        }
    }

    fn has_pending(&self) -> bool {
        !self.adds.is_empty() || !self.updates.is_empty() || !self.removes.is_empty()
    }
}

/// GPU-resident instance set of one mesh, projected into N frame slots.
///
/// The logical set converges across slots because every operation is
/// queued into all of them; slots only differ in how far they have
/// replayed. Rendering order is unspecified and may change on removal
/// (swap-compaction); callers must not cache slot positions across frames.
pub struct InstanceRegistry {
    slots: Vec<FrameSlot>,
    live: HashSet<InstanceId>,
    next_id: u64,
    label: String,
}

impl InstanceRegistry {
    pub const DEFAULT_CAPACITY: u32 = 32;

    pub fn new(device: &dyn RenderDevice, frames_in_flight: usize, label: &str) -> Self {
        Self::with_capacity(device, frames_in_flight, Self::DEFAULT_CAPACITY, label)
    }

    pub fn with_capacity(
        device: &dyn RenderDevice,
        frames_in_flight: usize,
        capacity: u32,
        label: &str,
    ) -> Self {
        assert!(frames_in_flight > 0, "at least one frame slot is required");
        assert!(capacity > 0, "instance capacity must be non-zero");
        let slots = (0..frames_in_flight)
            .map(|i| FrameSlot::new(device, &format!("{label} instances (slot {i})"), capacity))
            .collect();
        Self {
            slots,
            live: HashSet::new(),
            next_id: 0,
            label: label.to_string(),
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Logical live count (adds minus removes), independent of replay.
    pub fn count(&self) -> usize {
        self.live.len()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.live.contains(&id)
    }

    /// Live count a specific slot's buffer currently reflects.
    pub fn slot_count(&self, slot: usize) -> usize {
        self.slots[slot].ids.len()
    }

    /// Current buffer capacity (in instances) of a specific slot.
    pub fn slot_capacity(&self, slot: usize) -> u32 {
        self.slots[slot].capacity
    }

    /// Append a new instance. The append is queued into every frame slot
    /// so all projections converge to the same logical set.
    pub fn add(&mut self, instance: &Instance, tag: u32, material: u32) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        let raw = instance.to_raw(tag, material);
        for slot in &mut self.slots {
            slot.adds.push((id, raw));
        }
        self.live.insert(id);
        id
    }

    /// Queue an in-place overwrite, keyed by id. A later update for the
    /// same id within one slot cycle wins (last write).
    pub fn update(&mut self, id: InstanceId, instance: &Instance, tag: u32, material: u32) -> bool {
        if !self.live.contains(&id) {
            log::warn!("{}: update of unknown instance {:?} ignored", self.label, id);
            return false;
        }
        let raw = instance.to_raw(tag, material);
        for slot in &mut self.slots {
            slot.updates.insert(id, raw);
        }
        true
    }

    /// Queue a removal. Cancels any pending update for the id in the same
    /// slot cycle. Removing an unknown or already-removed id is ignored.
    pub fn remove(&mut self, id: InstanceId) -> bool {
        if !self.live.remove(&id) {
            log::warn!("{}: remove of unknown instance {:?} ignored", self.label, id);
            return false;
        }
        for slot in &mut self.slots {
            slot.updates.remove(&id);
            slot.removes.insert(id);
        }
        true
    }

    /// Apply one slot's queued operations into its buffer: additions in
    /// call order (contiguous slot indices), then updates in place, then
    /// removals by swap-with-last compaction (the moved instance's id is
    /// remapped). Grows the slot's buffer to the next power of two when the
    /// live set no longer fits; growth is content-preserving and happens
    /// independently per slot.
    ///
    /// Must be called once per frame for the slot about to be drawn, after
    /// the caller's fence wait for that slot (see [`crate::gpu::pacer`]).
    pub fn replay(&mut self, slot: usize, device: &dyn RenderDevice) {
        let s = &mut self.slots[slot];
        if !s.has_pending() {
            return;
        }

        for (id, raw) in s.adds.drain(..) {
            s.index_of.insert(id, s.ids.len());
            s.ids.push(id);
            s.data.push(raw);
        }
        for (id, raw) in s.updates.drain() {
            if let Some(&i) = s.index_of.get(&id) {
                s.data[i] = raw;
            }
        }
        let removes = std::mem::take(&mut s.removes);
        for id in removes {
            let Some(i) = s.index_of.remove(&id) else {
                continue;
            };
            s.ids.swap_remove(i);
            s.data.swap_remove(i);
            if let Some(&moved) = s.ids.get(i) {
                s.index_of.insert(moved, i);
            }
        }

        let needed = s.ids.len() as u32;
        if needed > s.capacity {
            let capacity = needed.next_power_of_two();
            log::debug!(
                "{}: growing slot {} instance buffer {} -> {}",
                self.label,
                slot,
                s.capacity,
                capacity
            );
            s.buffer = device.create_buffer(
                &format!("{} instances (slot {slot})", self.label),
                capacity as u64 * STRIDE,
                BufferUsage::Instance,
            );
            s.capacity = capacity;
        }
        if !s.data.is_empty() {
            s.buffer.write(0, bytemuck::cast_slice(&s.data));
        }
    }

    /// Draw parameters for the slot, or `None` when its live count is zero
    /// (an empty registry must not issue a draw call).
    pub fn draw(&self, slot: usize) -> Option<InstanceDraw<'_>> {
        let s = &self.slots[slot];
        if s.ids.is_empty() {
            return None;
        }
        Some(InstanceDraw {
            buffer: s.buffer.as_ref(),
            count: s.ids.len() as u32,
        })
    }
}
