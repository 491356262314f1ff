//! mirador
//!
//! The core of an interactive 3D-asset viewer: asynchronous asset imports,
//! per-mesh GPU instancing with frame-pipelined buffers, a hierarchical
//! scene graph and a notification bus tying the layers together. The crate
//! exposes no window or renderer; it produces draw parameters and GPU
//! resources through a small device abstraction, so it embeds equally well
//! under a real wgpu swapchain or a headless test harness.
//!
//! High-level modules
//! - `ident`: process-unique, kind-tagged resource identifiers
//! - `bus`: topic-based synchronous notification fan-out
//! - `gpu`: the device/buffer/texture/fence traits, wgpu and headless
//!   backends, and frame pacing
//! - `data_structures`: instances and their per-mesh registry, meshes,
//!   materials, model templates, the scene graph
//! - `catalog`: ownership of every loaded resource, flat shader-visible
//!   tables and swap-compacting deletion
//! - `import`: background decoding and fence-gated upload of asset files
//!

pub mod bus;
pub mod catalog;
pub mod data_structures;
pub mod gpu;
pub mod ident;
pub mod import;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
