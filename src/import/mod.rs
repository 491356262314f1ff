//! The asynchronous asset-import pipeline.
//!
//! Imports run in three stages. Decode: a background task (tokio) reads
//! and parses the file into a [`decode::DecodedAsset`], CPU-only. Upload:
//! the main thread drains completed bundles from a shared queue, creates
//! GPU buffers and textures through the device trait and submits, keeping
//! the fence. Register: once a bundle's fence signals, its resources enter
//! the catalog, the model template is published as `AssetReady`, and the
//! source stops counting as in flight. A model is therefore never visible
//! in the catalog before all of its GPU resources are usable.
//!
//! Duplicate protection covers both the catalog and the in-flight set: a
//! source path can be decoded at most once concurrently.

pub mod decode;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

use crate::bus::{Notification, NotificationBus, Topic};
use crate::catalog::Catalog;
use crate::data_structures::model::{
    DEFAULT_TEXTURE, Material, MeshResource, ModelTemplate, TemplateNode,
};
use crate::data_structures::texture::TextureResource;
use crate::gpu::{GpuFence, RenderDevice};
use crate::ident::{Ident, IdentAllocator, IdentKind};
use decode::DecodedAsset;

/// GPU-created but not yet registered: waiting for the upload fence.
struct PendingUpload {
    fence: Box<dyn GpuFence>,
    source: String,
    model: Ident,
    name: String,
    nodes: Vec<decode::DecodedNode>,
    meshes: Vec<(Ident, MeshResource)>,
    textures: Vec<(Ident, TextureResource)>,
    /// Texture slots still hold asset-local indices; they are remapped to
    /// catalog indices at registration.
    materials: Vec<(Ident, Material)>,
}

/// Owner of the import pipeline. Lives on the main thread; only the
/// decoded-bundle queue and the in-flight set are shared with background
/// tasks.
pub struct Importer {
    ids: Arc<IdentAllocator>,
    frames_in_flight: usize,
    decoded: Arc<Mutex<VecDeque<DecodedAsset>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    pending: Vec<PendingUpload>,
}

impl Importer {
    pub fn new(ids: Arc<IdentAllocator>, frames_in_flight: usize) -> Self {
        Self {
            ids,
            frames_in_flight,
            decoded: Arc::new(Mutex::new(VecDeque::new())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pending: Vec::new(),
        }
    }

    /// Whether `source` is currently being decoded or awaiting its fence.
    pub fn is_in_flight(&self, source: &str) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .contains(source)
    }

    /// Start importing an asset file. Returns an error when the same
    /// source is already registered or already in flight; otherwise the
    /// decode task is spawned and this returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn import_asset(&mut self, path: &str, catalog: &Catalog) -> Result<()> {
        if catalog.has_source(path) {
            bail!("{path} is already loaded");
        }
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
            if !in_flight.insert(path.to_string()) {
                bail!("{path} is already being imported");
            }
        }

        let path = path.to_string();
        let decoded = Arc::clone(&self.decoded);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let start = instant::Instant::now();
            let mut guard = InFlightGuard::new(in_flight, path.clone());
            match decode::decode_asset(&path).await {
                Ok(asset) => {
                    log::info!(
                        "decoded {} ({} meshes, {} textures) in {:?}",
                        path,
                        asset.meshes.len(),
                        asset.textures.len(),
                        start.elapsed()
                    );
                    decoded
                        .lock()
                        .expect("decoded queue poisoned")
                        .push_back(asset);
                    // From here the marker is owned by the registration
                    // path, which clears it once the fence signals.
                    guard.disarm();
                }
                Err(err) => {
                    log::error!("import of {path} failed: {err:#}");
                }
            }
        });
        Ok(())
    }

    /// Drain completed decode bundles and create their GPU resources.
    /// Main-thread only; this is the single place import work touches the
    /// device. Each bundle ends up fence-gated in the pending list.
    pub fn process_main_thread_tasks(&mut self, device: &dyn RenderDevice) {
        loop {
            let asset = {
                let mut queue = self.decoded.lock().expect("decoded queue poisoned");
                queue.pop_front()
            };
            let Some(asset) = asset else {
                break;
            };
            self.upload(asset, device);
        }
    }

    fn upload(&mut self, asset: DecodedAsset, device: &dyn RenderDevice) {
        let meshes = asset
            .meshes
            .iter()
            .map(|m| {
                let id = self.ids.allocate(IdentKind::Mesh);
                let resource = MeshResource::new(
                    device,
                    &m.name,
                    &m.vertices,
                    &m.indices,
                    self.frames_in_flight,
                );
                (id, resource)
            })
            .collect();
        let textures = asset
            .textures
            .iter()
            .map(|t| {
                let id = self.ids.allocate(IdentKind::Texture);
                let resource = TextureResource::from_image(device, &t.name, &t.image, t.sampler);
                (id, resource)
            })
            .collect();
        let materials = asset
            .materials
            .into_iter()
            .map(|m| (self.ids.allocate(IdentKind::Material), m))
            .collect();

        let fence = device.submit();
        self.pending.push(PendingUpload {
            fence,
            source: asset.source,
            model: self.ids.allocate(IdentKind::Model),
            name: asset.name,
            nodes: asset.nodes,
            meshes,
            textures,
            materials,
        });
    }

    /// Register every pending upload whose fence has signaled: resources
    /// enter the catalog, `AssetReady` goes out on [`Topic::Assets`], and
    /// the source leaves the in-flight set. Non-blocking.
    pub fn poll_uploads(
        &mut self,
        device: &dyn RenderDevice,
        catalog: &mut Catalog,
        bus: &NotificationBus,
    ) {
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for upload in self.pending.drain(..) {
            if upload.fence.is_signaled() {
                register(upload, device, catalog, bus, &self.in_flight);
            } else {
                still_pending.push(upload);
            }
        }
        self.pending = still_pending;
    }

    /// Number of uploads submitted but not yet registered.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// One full main-thread service step: upload freshly decoded bundles,
    /// then register the fence-complete ones. Called once per frame.
    pub fn pump(&mut self, device: &dyn RenderDevice, catalog: &mut Catalog, bus: &NotificationBus) {
        self.process_main_thread_tasks(device);
        self.poll_uploads(device, catalog, bus);
    }
}

/// Clears the in-flight marker when a decode task ends without handing a
/// bundle to the main thread. Covers both the error arm and a panic inside
/// the decoder (tokio swallows task panics), so a failed source can always
/// be retried.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    path: String,
    armed: bool,
}

impl InFlightGuard {
    fn new(in_flight: Arc<Mutex<HashSet<String>>>, path: String) -> Self {
        Self {
            in_flight,
            path,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            log::error!("import of {} aborted by a panic in the decoder", self.path);
        }
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.path);
        }
    }
}

fn register(
    upload: PendingUpload,
    device: &dyn RenderDevice,
    catalog: &mut Catalog,
    bus: &NotificationBus,
    in_flight: &Mutex<HashSet<String>>,
) {
    let mut texture_ids = Vec::with_capacity(upload.textures.len());
    let mut texture_indices = Vec::with_capacity(upload.textures.len());
    for (id, texture) in upload.textures {
        texture_indices.push(catalog.insert_texture(id, texture));
        texture_ids.push(id);
    }

    let mut material_ids = Vec::with_capacity(upload.materials.len());
    let mut material_indices = Vec::with_capacity(upload.materials.len());
    for (id, mut material) in upload.materials {
        for slot in material.texture_slots_mut() {
            if *slot != DEFAULT_TEXTURE {
                *slot = texture_indices[*slot as usize];
            }
        }
        material_indices.push(catalog.insert_material(id, material, device));
        material_ids.push(id);
    }

    let mut mesh_ids = Vec::with_capacity(upload.meshes.len());
    for (id, mesh) in upload.meshes {
        catalog.insert_mesh(id, mesh);
        mesh_ids.push(id);
    }

    let nodes = upload
        .nodes
        .into_iter()
        .map(|n| TemplateNode {
            name: n.name,
            parent: n.parent,
            local: n.local,
            mesh: n.mesh.map(|i| mesh_ids[i]),
            material: material_indices
                .get(n.material as usize)
                .copied()
                .unwrap_or(0),
        })
        .collect();

    catalog.insert_model(
        upload.model,
        ModelTemplate {
            name: upload.name,
            source: upload.source.clone(),
            nodes,
            meshes: mesh_ids.clone(),
            materials: material_ids.clone(),
            textures: texture_ids.clone(),
        },
    );
    in_flight
        .lock()
        .expect("in-flight set poisoned")
        .remove(&upload.source);
    log::info!("registered model {} from {}", upload.model, upload.source);

    bus.publish(
        Topic::Assets,
        &Notification::AssetReady {
            model: upload.model,
            meshes: mesh_ids,
            materials: material_ids,
            textures: texture_ids,
        },
    );
}
