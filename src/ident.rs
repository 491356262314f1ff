//! Process-unique, kind-tagged identifiers.
//!
//! Every logical resource (model, mesh, material, texture, scene node) is
//! named by an [`Ident`]: an opaque 64-bit value that is globally unique
//! within the process, strictly monotonic, and never reused after deletion.
//! Identifiers are handed out by an [`IdentAllocator`] that is constructed
//! once at startup and shared (via `Arc`) between the main thread and the
//! import pipeline's decode tasks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// The kind of object an [`Ident`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentKind {
    Model,
    Mesh,
    Material,
    Texture,
    SceneNode,
}

/// Opaque resource identifier. Compares and hashes by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(u64);

impl Ident {
    /// The raw value, for display purposes only (UI labels, logs).
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Allocator for [`Ident`] values with reverse kind lookup.
///
/// Allocation is safe to call concurrently from decode tasks and the main
/// thread: the counter is an atomic increment, so two callers can never
/// receive the same value. There is no deallocation; the table is monotonic
/// for the lifetime of the process.
#[derive(Debug)]
pub struct IdentAllocator {
    next: AtomicU64,
    kinds: Mutex<HashMap<u64, IdentKind>>,
}

impl IdentAllocator {
    pub fn new() -> Self {
        Self {
            // 0 is reserved so a zeroed Ident is never a live one
            next: AtomicU64::new(1),
            kinds: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh identifier, larger than any previously returned.
    pub fn allocate(&self, kind: IdentKind) -> Ident {
        let value = self.next.fetch_add(1, Ordering::Relaxed);
        self.kinds
            .lock()
            .expect("ident kind table poisoned")
            .insert(value, kind);
        Ident(value)
    }

    /// The kind an identifier was allocated with, or `None` for values this
    /// allocator never produced.
    pub fn kind_of(&self, id: Ident) -> Option<IdentKind> {
        self.kinds
            .lock()
            .expect("ident kind table poisoned")
            .get(&id.0)
            .copied()
    }
}

impl Default for IdentAllocator {
    fn default() -> Self {
        Self::new()
    }
}
