use std::cell::RefCell;
use std::rc::Rc;

use mirador::bus::{Notification, NotificationBus, Subscriber, Topic, subscription};
use mirador::ident::{IdentAllocator, IdentKind};

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

fn mesh_deleted() -> Notification {
    let ids = IdentAllocator::new();
    Notification::MeshDeleted {
        mesh: ids.allocate(IdentKind::Mesh),
    }
}

#[test]
fn publish_fans_out_to_every_topic_subscriber() {
    common::init_logger();
    let bus = NotificationBus::new();
    let first = Rc::new(RefCell::new(Recorder::default()));
    let second = Rc::new(RefCell::new(Recorder::default()));
    let elsewhere = Rc::new(RefCell::new(Recorder::default()));

    bus.subscribe(Topic::Resources, subscription(&first));
    bus.subscribe(Topic::Resources, subscription(&second));
    bus.subscribe(Topic::Assets, subscription(&elsewhere));

    bus.publish(Topic::Resources, &mesh_deleted());

    assert_eq!(first.borrow().notes.len(), 1);
    assert_eq!(second.borrow().notes.len(), 1);
    assert_eq!(
        elsewhere.borrow().notes.len(),
        0,
        "other topics stay silent"
    );
}

#[test]
fn dropping_a_subscriber_unsubscribes_it() {
    common::init_logger();
    let bus = NotificationBus::new();
    let keeper = Rc::new(RefCell::new(Recorder::default()));
    let dropped = Rc::new(RefCell::new(Recorder::default()));

    bus.subscribe(Topic::Resources, subscription(&keeper));
    bus.subscribe(Topic::Resources, subscription(&dropped));
    assert_eq!(bus.subscriber_count(Topic::Resources), 2);

    drop(dropped);
    bus.publish(Topic::Resources, &mesh_deleted());

    assert_eq!(keeper.borrow().notes.len(), 1);
    assert_eq!(bus.subscriber_count(Topic::Resources), 1);
}

#[test]
fn explicit_unsubscribe_stops_delivery() {
    common::init_logger();
    let bus = NotificationBus::new();
    let recorder = Rc::new(RefCell::new(Recorder::default()));

    bus.subscribe(Topic::Resources, subscription(&recorder));
    bus.unsubscribe(Topic::Resources, &subscription(&recorder));
    bus.publish(Topic::Resources, &mesh_deleted());

    assert_eq!(recorder.borrow().notes.len(), 0);
    assert_eq!(bus.subscriber_count(Topic::Resources), 0);
}

#[test]
fn publishing_without_subscribers_is_a_noop() {
    common::init_logger();
    let bus = NotificationBus::new();
    // Fire-and-forget: nothing listens, nothing is stored, nothing panics.
    bus.publish(Topic::Resources, &mesh_deleted());
    assert_eq!(bus.subscriber_count(Topic::Resources), 0);
}

#[test]
fn a_subscriber_may_join_several_topics() {
    common::init_logger();
    let bus = NotificationBus::new();
    let recorder = Rc::new(RefCell::new(Recorder::default()));

    bus.subscribe(Topic::Resources, subscription(&recorder));
    bus.subscribe(Topic::Assets, subscription(&recorder));

    bus.publish(Topic::Resources, &mesh_deleted());
    bus.publish(Topic::Assets, &mesh_deleted());

    assert_eq!(recorder.borrow().notes.len(), 2);
}
