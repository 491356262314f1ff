use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use mirador::bus::{Notification, NotificationBus, Subscriber, Topic, subscription};
use mirador::catalog::Catalog;
use mirador::data_structures::model::{DEFAULT_TEXTURE, Material, MaterialRaw};
use mirador::data_structures::texture::{DecodedImage, TextureResource};
use mirador::gpu::SamplerDesc;
use mirador::gpu::headless::{HeadlessBuffer, HeadlessDevice, HeadlessTexture};
use mirador::ident::{Ident, IdentAllocator, IdentKind};

mod common;

#[derive(Default)]
struct Recorder {
    notes: Vec<Notification>,
}

impl Subscriber for Recorder {
    fn notify(&mut self, note: &Notification) {
        self.notes.push(note.clone());
    }
}

fn insert_texture(catalog: &mut Catalog, device: &HeadlessDevice, ids: &IdentAllocator) -> Ident {
    let id = ids.allocate(IdentKind::Texture);
    let texture = TextureResource::from_image(
        device,
        &format!("texture {id}"),
        &DecodedImage::solid(1, 1, [255, 255, 255, 255], true),
        SamplerDesc::default(),
    );
    catalog.insert_texture(id, texture);
    id
}

/// Typed view of the GPU material table's first `count` entries.
fn material_table(catalog: &Catalog, count: usize) -> Vec<MaterialRaw> {
    let buffer = catalog
        .material_buffer()
        .as_any()
        .downcast_ref::<HeadlessBuffer>()
        .expect("headless buffer");
    let bytes = buffer.contents();
    bytemuck::cast_slice(&bytes[..count * std::mem::size_of::<MaterialRaw>()]).to_vec()
}

#[test]
fn texture_deletion_compacts_and_renumbers_material_slots() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut catalog = Catalog::new(&device);
    let ids = IdentAllocator::new();
    let bus = NotificationBus::new();
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    bus.subscribe(Topic::Resources, subscription(&recorder));

    let first = insert_texture(&mut catalog, &device, &ids);
    let _second = insert_texture(&mut catalog, &device, &ids);
    let third = insert_texture(&mut catalog, &device, &ids);

    let material = ids.allocate(IdentKind::Material);
    catalog.insert_material(
        material,
        Material {
            name: "uses first and third".into(),
            base_color_texture: 0,
            normal_texture: 2,
            ..Default::default()
        },
        &device,
    );

    assert!(catalog.delete_texture(first, &bus));
    assert_eq!(catalog.texture_count(), 2);
    // The last texture moved into the vacated index 0.
    assert_eq!(catalog.texture_index_of(third), Some(0));

    let m = catalog.material(0).expect("material");
    assert_eq!(
        m.base_color_texture, DEFAULT_TEXTURE,
        "slot of the deleted texture falls back"
    );
    assert_eq!(m.normal_texture, 0, "slot of the moved texture renumbered");
    // The GPU mirror was rewritten too.
    assert_eq!(material_table(&catalog, 1)[0], m.to_raw());

    let notes = &recorder.borrow().notes;
    assert_eq!(notes.len(), 1);
    match &notes[0] {
        Notification::TextureDeleted {
            texture,
            index,
            transfer,
        } => {
            assert_eq!(*texture, first);
            assert_eq!(*index, 0);
            assert_eq!(*transfer, Some(2));
        }
        other => panic!("unexpected notification {other:?}"),
    }
}

#[test]
fn deleting_the_last_texture_transfers_nothing() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut catalog = Catalog::new(&device);
    let ids = IdentAllocator::new();
    let bus = NotificationBus::new();
    let recorder = Rc::new(RefCell::new(Recorder::default()));
    bus.subscribe(Topic::Resources, subscription(&recorder));

    let _first = insert_texture(&mut catalog, &device, &ids);
    let last = insert_texture(&mut catalog, &device, &ids);

    assert!(catalog.delete_texture(last, &bus));
    match &recorder.borrow().notes[0] {
        Notification::TextureDeleted { index, transfer, .. } => {
            assert_eq!(*index, 1);
            assert_eq!(*transfer, None);
        }
        other => panic!("unexpected notification {other:?}"),
    }

    // Double delete is a logged no-op.
    assert!(!catalog.delete_texture(last, &bus));
    assert_eq!(recorder.borrow().notes.len(), 1);
}

#[test]
fn material_deletion_compacts_the_gpu_table() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut catalog = Catalog::new(&device);
    let ids = IdentAllocator::new();
    let bus = NotificationBus::new();

    let materials: Vec<Ident> = (0..3)
        .map(|i| {
            let id = ids.allocate(IdentKind::Material);
            catalog.insert_material(
                id,
                Material {
                    name: format!("material {i}"),
                    metallic_factor: i as f32,
                    ..Default::default()
                },
                &device,
            );
            id
        })
        .collect();

    assert!(catalog.delete_material(materials[0], &bus));
    assert_eq!(catalog.material_count(), 2);
    assert_eq!(catalog.material_index_of(materials[2]), Some(0));

    let table = material_table(&catalog, 2);
    assert_eq!(table[0].metallic_factor, 2.0, "moved entry rewritten in place");
    assert_eq!(table[1].metallic_factor, 1.0);
}

#[test]
fn material_table_grows_content_preserving() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut catalog = Catalog::new(&device);
    let ids = IdentAllocator::new();

    let count = Catalog::DEFAULT_MATERIAL_CAPACITY as usize + 1;
    for i in 0..count {
        catalog.insert_material(
            ids.allocate(IdentKind::Material),
            Material {
                name: format!("material {i}"),
                roughness_factor: i as f32,
                ..Default::default()
            },
            &device,
        );
    }

    assert_eq!(catalog.material_count(), count);
    let stride = std::mem::size_of::<MaterialRaw>() as u64;
    assert!(catalog.material_buffer().size() >= count as u64 * stride);
    let table = material_table(&catalog, count);
    for (i, raw) in table.iter().enumerate() {
        assert_eq!(raw.roughness_factor, i as f32);
    }
}

#[test]
fn update_material_rewrites_its_table_entry() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut catalog = Catalog::new(&device);
    let ids = IdentAllocator::new();

    catalog.insert_material(
        ids.allocate(IdentKind::Material),
        Material::default(),
        &device,
    );
    assert!(catalog.update_material(0, |m| m.base_color_factor = [0.5, 0.0, 0.0, 1.0]));

    assert_eq!(
        material_table(&catalog, 1)[0].base_color_factor,
        [0.5, 0.0, 0.0, 1.0]
    );
    assert!(!catalog.update_material(9, |_| ()), "unknown index ignored");
}

#[test]
fn built_in_default_textures_back_the_sentinel_slots() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let catalog = Catalog::new(&device);

    let base = catalog.default_base_color();
    assert_eq!(base.dimensions(), (1, 1));
    let pixels = &base
        .texture
        .as_any()
        .downcast_ref::<HeadlessTexture>()
        .expect("headless texture")
        .pixels;
    assert_eq!(*pixels, [255, 255, 255, 255], "opaque white");

    let normal = catalog.default_normal_map();
    assert_eq!(normal.dimensions(), (1, 1));
    let pixels = &normal
        .texture
        .as_any()
        .downcast_ref::<HeadlessTexture>()
        .expect("headless texture")
        .pixels;
    assert_eq!(*pixels, [127, 127, 255, 255], "undisturbed normal");

    assert_eq!(
        catalog.texture_count(),
        0,
        "defaults live outside the flat array"
    );
}
