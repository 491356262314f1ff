use cgmath::Vector3;
use mirador::data_structures::instance::{Instance, InstanceDraw, InstanceRaw, InstanceRegistry};
use mirador::gpu::headless::{HeadlessBuffer, HeadlessDevice};

mod common;

fn at(x: f32) -> Instance {
    Instance::from(Vector3::new(x, 0.0, 0.0))
}

/// Read back one slot's live buffer region as typed records.
fn raws(draw: &InstanceDraw) -> Vec<InstanceRaw> {
    let buffer = draw
        .buffer
        .as_any()
        .downcast_ref::<HeadlessBuffer>()
        .expect("headless buffer");
    let bytes = buffer.contents();
    let live = draw.count as usize * std::mem::size_of::<InstanceRaw>();
    bytemuck::cast_slice(&bytes[..live]).to_vec()
}

fn tags(registry: &InstanceRegistry, slot: usize) -> Vec<u32> {
    registry
        .draw(slot)
        .map(|draw| raws(&draw).iter().map(|r| r.tag).collect())
        .unwrap_or_default()
}

#[test]
fn replay_applies_adds_in_call_order() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut registry = InstanceRegistry::new(&device, 2, "test");

    registry.add(&at(0.0), 10, 0);
    registry.add(&at(1.0), 11, 0);
    registry.add(&at(2.0), 12, 0);
    assert_eq!(registry.count(), 3);
    assert_eq!(registry.slot_count(0), 0, "nothing applied before replay");

    registry.replay(0, &device);
    assert_eq!(registry.slot_count(0), 3);
    assert_eq!(tags(&registry, 0), vec![10, 11, 12]);
}

#[test]
fn update_is_in_place_and_last_write_wins() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut registry = InstanceRegistry::new(&device, 1, "test");

    let a = registry.add(&at(0.0), 1, 0);
    let b = registry.add(&at(1.0), 2, 0);
    registry.replay(0, &device);

    assert!(registry.update(a, &at(5.0), 1, 0));
    assert!(registry.update(a, &at(9.0), 1, 7));
    registry.replay(0, &device);

    let raws = raws(&registry.draw(0).expect("draw"));
    assert_eq!(raws[0].model[3][0], 9.0, "second update wins");
    assert_eq!(raws[0].material, 7);
    assert_eq!(raws[1].tag, 2, "other instance untouched");
    assert_eq!(registry.slot_count(0), 2, "updates never change the count");
    let _ = b;
}

#[test]
fn removal_compacts_by_swapping_the_last_instance_in() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut registry = InstanceRegistry::new(&device, 1, "test");

    let a = registry.add(&at(0.0), 10, 0);
    let _b = registry.add(&at(1.0), 11, 0);
    let c = registry.add(&at(2.0), 12, 0);
    registry.replay(0, &device);

    assert!(registry.remove(a));
    registry.replay(0, &device);
    assert_eq!(tags(&registry, 0), vec![12, 11], "last instance fills the hole");

    // The moved instance's id now maps to the vacated index.
    registry.update(c, &at(7.0), 12, 0);
    registry.replay(0, &device);
    let raws = raws(&registry.draw(0).expect("draw"));
    assert_eq!(raws[0].model[3][0], 7.0);
}

#[test]
fn growth_past_capacity_is_one_allocation_and_preserves_content() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut registry = InstanceRegistry::with_capacity(&device, 1, 32, "test");
    let baseline = device.buffers_created();

    for i in 0..33 {
        registry.add(&at(i as f32), i, 0);
    }
    registry.replay(0, &device);

    assert_eq!(
        device.buffers_created(),
        baseline + 1,
        "a single replacement buffer covers the overflow"
    );
    assert_eq!(registry.slot_capacity(0), 64, "next power of two");
    let draw = registry.draw(0).expect("draw");
    assert_eq!(draw.count, 33);
    assert_eq!(tags(&registry, 0), (0..33).collect::<Vec<_>>());
}

#[test]
fn removed_ids_never_resurrect() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut registry = InstanceRegistry::new(&device, 1, "test");

    // Removed before its add ever replayed: must not appear at all.
    let a = registry.add(&at(0.0), 1, 0);
    assert!(registry.remove(a));
    assert_eq!(registry.count(), 0);
    registry.replay(0, &device);
    assert!(registry.draw(0).is_none(), "zero instances, zero draws");

    // Operations on the dead id are ignored, not applied.
    assert!(!registry.update(a, &at(3.0), 1, 0));
    assert!(!registry.remove(a));
    registry.replay(0, &device);
    assert_eq!(registry.slot_count(0), 0);
}

#[test]
fn remove_cancels_a_pending_update_in_the_same_cycle() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut registry = InstanceRegistry::new(&device, 1, "test");

    let a = registry.add(&at(0.0), 1, 0);
    let _b = registry.add(&at(1.0), 2, 0);
    registry.replay(0, &device);

    registry.update(a, &at(5.0), 1, 0);
    registry.remove(a);
    registry.replay(0, &device);

    assert_eq!(tags(&registry, 0), vec![2]);
}

#[test]
fn slots_replay_independently_and_converge() {
    common::init_logger();
    let device = HeadlessDevice::new();
    let mut registry = InstanceRegistry::new(&device, 2, "test");

    let a = registry.add(&at(0.0), 1, 0);
    registry.replay(0, &device);
    assert_eq!(registry.slot_count(0), 1);
    assert_eq!(registry.slot_count(1), 0, "slot 1 has not replayed yet");

    registry.replay(1, &device);
    assert_eq!(registry.slot_count(1), 1);

    registry.remove(a);
    registry.replay(0, &device);
    assert_eq!(registry.slot_count(0), 0);
    assert_eq!(registry.slot_count(1), 1, "stale until its own replay");
    assert_eq!(registry.count(), 0, "logical count is slot-independent");

    registry.replay(1, &device);
    assert_eq!(registry.slot_count(1), 0);
}
