//! Scene graph and hierarchical scene organization.
//!
//! Nodes live in an arena and are addressed by generation-checked handles
//! ([`NodeId`]); parent/children relationships are handle lists, so
//! reparenting splices handles in O(1) and never copies subtrees. Node
//! variants are a closed enum ([`NodeKind`]) dispatched by matching, not
//! downcasting.
//!
//! Transform state machine per node: clean (cached global reflects
//! `parent.global * local`) or dirty. `set_local_transform` dirties a node
//! and its descendants; [`SceneGraph::update_transforms`] walks the tree
//! top-down once per frame, recomputes dirty globals and pushes mesh-bound
//! nodes' new transforms into their mesh's instance registry.

use std::sync::Arc;

use crate::bus::{Notification, Subscriber};
use crate::catalog::Catalog;
use crate::data_structures::instance::{Instance, InstanceId};
use crate::ident::{Ident, IdentAllocator, IdentKind};

/// Generation-checked handle into the node arena. A handle kept across a
/// node's destruction goes stale instead of aliasing a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Clone, Debug)]
pub enum Light {
    Directional {
        direction: cgmath::Vector3<f32>,
        color: [f32; 3],
        intensity: f32,
    },
    Point {
        color: [f32; 3],
        intensity: f32,
        range: f32,
    },
    Spot {
        color: [f32; 3],
        intensity: f32,
        range: f32,
        inner_angle: f32,
        outer_angle: f32,
    },
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Empty,
    Mesh {
        mesh: Ident,
        instance: InstanceId,
        material: u32,
    },
    Light(Light),
}

struct Node {
    ident: Ident,
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local: Instance,
    global: Instance,
    dirty: bool,
    kind: NodeKind,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Owned tree of scene nodes driving the per-mesh instance registries.
///
/// The graph subscribes to [`crate::bus::Topic::Resources`]; deletion
/// messages are collected into an inbox and applied once per frame via
/// [`Self::apply_notifications`], because reactions need mutable catalog
/// access that must not alias the publisher's borrow.
pub struct SceneGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    ids: Arc<IdentAllocator>,
    inbox: Vec<Notification>,
}

impl SceneGraph {
    pub fn new(ids: Arc<IdentAllocator>) -> Self {
        let mut graph = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
            ids,
            inbox: Vec::new(),
        };
        let root_ident = graph.ids.allocate(IdentKind::SceneNode);
        graph.root = graph.insert(Node {
            ident: root_ident,
            name: "root".to_string(),
            parent: None,
            children: Vec::new(),
            local: Instance::default(),
            global: Instance::default(),
            dirty: false,
            kind: NodeKind::Empty,
        });
        graph
    }

    /// The root node. It has no parent and is never destroyed.
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn insert(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Number of live nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.slots.iter().filter(|s| s.node.is_some()).count()
    }

    pub fn ident(&self, id: NodeId) -> Option<Ident> {
        self.node(id).map(|n| n.ident)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|n| n.name.as_str())
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn local_transform(&self, id: NodeId) -> Option<Instance> {
        self.node(id).map(|n| n.local.clone())
    }

    /// The cached global transform; stale until the next
    /// [`Self::update_transforms`] when the node is dirty.
    pub fn global_transform(&self, id: NodeId) -> Option<Instance> {
        self.node(id).map(|n| n.global.clone())
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.dirty)
    }

    /// Add an empty (grouping) node under `parent`.
    pub fn add_empty(&mut self, parent: NodeId, name: &str, local: Instance) -> NodeId {
        self.add_node(parent, name, local, NodeKind::Empty)
    }

    pub fn add_light(&mut self, parent: NodeId, name: &str, local: Instance, light: Light) -> NodeId {
        self.add_node(parent, name, local, NodeKind::Light(light))
    }

    /// Add a mesh-bound node under `parent`, allocating one GPU instance
    /// in the mesh's registry. The instance is released exactly once, when
    /// the node is destroyed.
    pub fn add_mesh(
        &mut self,
        parent: NodeId,
        name: &str,
        local: Instance,
        mesh: Ident,
        material: u32,
        catalog: &mut Catalog,
    ) -> NodeId {
        let Some(resource) = catalog.mesh_mut(mesh) else {
            log::warn!("add_mesh: mesh {} not in catalog, creating empty node", mesh);
            return self.add_node(parent, name, local, NodeKind::Empty);
        };
        let ident = self.ids.allocate(IdentKind::SceneNode);
        let tag = ident.raw() as u32;
        let instance = resource.instances.add(&Instance::default(), tag, material);
        self.attach(
            parent,
            Node {
                ident,
                name: name.to_string(),
                parent: Some(parent),
                children: Vec::new(),
                local,
                global: Instance::default(),
                dirty: true,
                kind: NodeKind::Mesh {
                    mesh,
                    instance,
                    material,
                },
            },
        )
    }

    fn add_node(&mut self, parent: NodeId, name: &str, local: Instance, kind: NodeKind) -> NodeId {
        let ident = self.ids.allocate(IdentKind::SceneNode);
        self.attach(
            parent,
            Node {
                ident,
                name: name.to_string(),
                parent: Some(parent),
                children: Vec::new(),
                local,
                global: Instance::default(),
                dirty: true,
                kind,
            },
        )
    }

    fn attach(&mut self, parent: NodeId, node: Node) -> NodeId {
        assert!(self.contains(parent), "attach to a destroyed node");
        let id = self.insert(node);
        self.node_mut(parent)
            .expect("parent vanished during attach")
            .children
            .push(id);
        id
    }

    /// Set the node's local transform and dirty it together with all of
    /// its descendants.
    pub fn set_local_transform(&mut self, id: NodeId, local: Instance) {
        let Some(node) = self.node_mut(id) else {
            log::warn!("set_local_transform on a stale node handle");
            return;
        };
        node.local = local;
        self.mark_dirty(id);
    }

    fn mark_dirty(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.node_mut(current) {
                node.dirty = true;
                stack.extend(node.children.iter().copied());
            }
        }
    }

    /// True when `node` lies in the subtree rooted at `ancestor`.
    pub fn is_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Detach `id` from its parent in O(1). The subtree keeps existing and
    /// keeps its GPU instances; only destruction releases them. The root
    /// cannot be orphaned.
    pub fn orphan(&mut self, id: NodeId) -> bool {
        if id == self.root {
            log::warn!("refusing to orphan the root node");
            return false;
        }
        let Some(parent) = self.node(id).and_then(|n| n.parent) else {
            return false;
        };
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.retain(|&c| c != id);
        }
        if let Some(node) = self.node_mut(id) {
            node.parent = None;
        }
        true
    }

    /// Orphan `id` and adopt it under `new_parent`. Refused when the move
    /// would make a node its own descendant (or when either handle is
    /// stale); the tree is left unchanged in that case.
    pub fn reparent(&mut self, id: NodeId, new_parent: NodeId) -> bool {
        if !self.contains(id) || !self.contains(new_parent) {
            log::warn!("reparent with a stale node handle");
            return false;
        }
        if self.is_descendant(new_parent, id) {
            log::warn!("refusing reparent: node would become its own descendant");
            return false;
        }
        if id == self.root {
            log::warn!("refusing to reparent the root node");
            return false;
        }
        self.orphan(id);
        if let Some(node) = self.node_mut(id) {
            node.parent = Some(new_parent);
        }
        self.node_mut(new_parent)
            .expect("new parent vanished during reparent")
            .children
            .push(id);
        // global transform now composes against a different parent
        self.mark_dirty(id);
        true
    }

    /// Destroy `id` and its whole subtree; each mesh-bound node releases
    /// its GPU instance exactly once. The root is never destroyed.
    pub fn destroy(&mut self, id: NodeId, catalog: &mut Catalog) {
        if id == self.root {
            log::warn!("refusing to destroy the root node");
            return;
        }
        if !self.contains(id) {
            return;
        }
        self.orphan(id);

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let slot = &mut self.slots[current.index as usize];
            if slot.generation != current.generation {
                continue;
            }
            let Some(node) = slot.node.take() else {
                continue;
            };
            slot.generation += 1;
            self.free.push(current.index);
            stack.extend(node.children.iter().copied());

            if let NodeKind::Mesh { mesh, instance, .. } = node.kind {
                match catalog.mesh_mut(mesh) {
                    Some(resource) => {
                        resource.instances.remove(instance);
                    }
                    // The mesh (and its registry) can be deleted before the
                    // nodes that referenced it get destroyed.
                    None => log::debug!(
                        "node '{}' released after its mesh {} was deleted",
                        node.name,
                        mesh
                    ),
                }
            }
        }
    }

    /// Instantiate a loaded model under `parent`: one live node per
    /// template node, one GPU instance per mesh-bearing template node, all
    /// grouped under a fresh empty node named after the model.
    pub fn instantiate(
        &mut self,
        model: Ident,
        parent: NodeId,
        catalog: &mut Catalog,
    ) -> Option<NodeId> {
        let template = catalog.model(model)?.clone();
        let group = self.add_empty(parent, &template.name, Instance::default());
        let mut live: Vec<NodeId> = Vec::with_capacity(template.nodes.len());
        for tnode in &template.nodes {
            let node_parent = match tnode.parent {
                Some(i) => live[i],
                None => group,
            };
            let id = match tnode.mesh {
                Some(mesh) => self.add_mesh(
                    node_parent,
                    &tnode.name,
                    tnode.local.clone(),
                    mesh,
                    tnode.material,
                    catalog,
                ),
                None => self.add_empty(node_parent, &tnode.name, tnode.local.clone()),
            };
            live.push(id);
        }
        Some(group)
    }

    /// Recompute dirty global transforms top-down and push mesh-bound
    /// nodes' new globals into their instance registries. Called once per
    /// frame before replay.
    pub fn update_transforms(&mut self, catalog: &mut Catalog) {
        // The root has no parent, so its global is its local.
        let root = self.root;
        if let Some(node) = self.node_mut(root) {
            if node.dirty {
                node.global = node.local.clone();
                node.dirty = false;
            }
        }
        let root_global = self
            .node(self.root)
            .map(|n| n.global.clone())
            .unwrap_or_default();
        let mut stack: Vec<(NodeId, Instance)> = self
            .children(self.root)
            .iter()
            .map(|&c| (c, root_global.clone()))
            .collect();

        while let Some((id, parent_global)) = stack.pop() {
            let Some(node) = self.node_mut(id) else {
                continue;
            };
            if node.dirty {
                node.global = &parent_global * &node.local;
                node.dirty = false;
                if let NodeKind::Mesh {
                    mesh,
                    instance,
                    material,
                } = node.kind
                {
                    let tag = node.ident.raw() as u32;
                    let global = node.global.clone();
                    match catalog.mesh_mut(mesh) {
                        Some(resource) => {
                            resource.instances.update(instance, &global, tag, material);
                        }
                        None => log::warn!("mesh {} missing while updating node transforms", mesh),
                    }
                }
            }
            let node_global = self
                .node(id)
                .map(|n| n.global.clone())
                .unwrap_or_default();
            for &child in self.children(id) {
                stack.push((child, node_global.clone()));
            }
        }
    }

    /// Apply the deletion notifications received since the last frame:
    /// material index transfers renumber mesh-bound nodes, mesh deletions
    /// destroy the nodes bound to the vanished mesh.
    pub fn apply_notifications(&mut self, catalog: &mut Catalog) {
        let inbox = std::mem::take(&mut self.inbox);
        for note in inbox {
            match note {
                Notification::MaterialDeleted {
                    index, transfer, ..
                } => self.renumber_materials(index, transfer),
                Notification::MeshDeleted { mesh } => {
                    let bound: Vec<NodeId> = self
                        .slots
                        .iter()
                        .enumerate()
                        .filter_map(|(i, slot)| {
                            let node = slot.node.as_ref()?;
                            match node.kind {
                                NodeKind::Mesh { mesh: m, .. } if m == mesh => Some(NodeId {
                                    index: i as u32,
                                    generation: slot.generation,
                                }),
                                _ => None,
                            }
                        })
                        .collect();
                    for id in bound {
                        // subtree destruction may have freed it already
                        if self.contains(id) {
                            self.destroy(id, catalog);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn renumber_materials(&mut self, index: u32, transfer: Option<u32>) {
        for slot in &mut self.slots {
            let Some(node) = slot.node.as_mut() else {
                continue;
            };
            let NodeKind::Mesh { material, .. } = &mut node.kind else {
                continue;
            };
            if *material == index {
                log::warn!(
                    "node '{}' referenced deleted material index {}; falling back to 0",
                    node.name,
                    index
                );
                *material = 0;
                node.dirty = true;
            } else if Some(*material) == transfer {
                *material = index;
                node.dirty = true;
            }
        }
    }
}

impl Subscriber for SceneGraph {
    // Model deletion needs no arm of its own: deleting a model publishes
    // `MeshDeleted` for each of its meshes, and those destroy the bound
    // nodes.
    fn notify(&mut self, note: &Notification) {
        match note {
            Notification::MaterialDeleted { .. } | Notification::MeshDeleted { .. } => {
                self.inbox.push(note.clone())
            }
            _ => {}
        }
    }
}
