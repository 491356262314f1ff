//! Topic-based notification bus.
//!
//! Decouples the catalog, scene graph and UI layers: deletion and
//! asset-ready events are published as fire-and-forget [`Notification`]
//! values and fanned out synchronously, on the caller's thread, to every
//! current subscriber of the topic. There is no persistence; a message
//! published while nobody listens is lost by design.
//!
//! Subscribers are held as `Weak` references, so dropping a subscriber
//! unsubscribes it from every topic it joined. The next publish prunes the
//! dead entries instead of dispatching into freed state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::data_structures::instance::InstanceId;
use crate::ident::Ident;

/// Named channels of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Import pipeline completions (`AssetReady`).
    Assets,
    /// Catalog deletions and index transfers.
    Resources,
    /// Per-instance add/update/remove announcements.
    Instances,
}

/// The tagged union carried by every publish.
///
/// Deletion messages for flat-array resources carry the vacated `index`
/// and, when swap-compaction moved another element into the hole, the
/// `transfer` index it previously occupied. Listeners that cached raw
/// indices renumber themselves from these two values alone.
#[derive(Debug, Clone)]
pub enum Notification {
    AssetReady {
        model: Ident,
        meshes: Vec<Ident>,
        materials: Vec<Ident>,
        textures: Vec<Ident>,
    },
    ModelDeleted {
        model: Ident,
    },
    MeshDeleted {
        mesh: Ident,
    },
    TextureDeleted {
        texture: Ident,
        index: u32,
        transfer: Option<u32>,
    },
    MaterialDeleted {
        material: Ident,
        index: u32,
        transfer: Option<u32>,
    },
    InstanceAdded {
        mesh: Ident,
        instance: InstanceId,
    },
    InstanceUpdated {
        mesh: Ident,
        instance: InstanceId,
    },
    InstanceRemoved {
        mesh: Ident,
        instance: InstanceId,
    },
}

/// Receiver side of the bus.
pub trait Subscriber {
    fn notify(&mut self, note: &Notification);
}

type WeakSubscriber = Weak<RefCell<dyn Subscriber>>;

/// Synchronous, in-process publish/subscribe router.
pub struct NotificationBus {
    topics: RefCell<HashMap<Topic, Vec<WeakSubscriber>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            topics: RefCell::new(HashMap::new()),
        }
    }

    /// Join `topic`. A subscriber may join any number of topics; joining
    /// the same topic twice means being notified twice.
    pub fn subscribe(&self, topic: Topic, subscriber: WeakSubscriber) {
        self.topics
            .borrow_mut()
            .entry(topic)
            .or_default()
            .push(subscriber);
    }

    /// Leave `topic`. A no-op when the subscriber never joined it.
    pub fn unsubscribe(&self, topic: Topic, subscriber: &WeakSubscriber) {
        if let Some(subs) = self.topics.borrow_mut().get_mut(&topic) {
            let target = subscriber.as_ptr() as *const ();
            subs.retain(|s| s.as_ptr() as *const () != target);
        }
    }

    /// Synchronously invoke `notify` on every live subscriber of `topic`,
    /// in unspecified order, on the caller's thread.
    ///
    /// The subscriber list is snapshotted before dispatch, so a subscriber
    /// may subscribe or unsubscribe from inside `notify`. Dead weak
    /// references are pruned afterwards.
    pub fn publish(&self, topic: Topic, note: &Notification) {
        let snapshot: Vec<WeakSubscriber> = match self.topics.borrow().get(&topic) {
            Some(subs) => subs.clone(),
            None => return,
        };
        for weak in &snapshot {
            if let Some(subscriber) = weak.upgrade() {
                subscriber.borrow_mut().notify(note);
            }
        }
        if let Some(subs) = self.topics.borrow_mut().get_mut(&topic) {
            subs.retain(|s| s.strong_count() > 0);
        }
    }

    /// Number of live subscribers currently joined to `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .borrow()
            .get(&topic)
            .map_or(0, |subs| subs.iter().filter(|s| s.strong_count() > 0).count())
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience for `Rc<RefCell<S>>` holders.
pub fn subscription<S: Subscriber + 'static>(subscriber: &Rc<RefCell<S>>) -> WeakSubscriber {
    let rc: Rc<RefCell<dyn Subscriber>> = subscriber.clone();
    let weak: Weak<RefCell<dyn Subscriber>> = Rc::downgrade(&rc);
    weak
}
