//! Mesh Pass Batching
//!
//! Turns registered render objects into indirect multi-draw work.
//!
//! # Pipeline
//!
//! ```text
//! RenderObject ─▶ MeshPass::refresh ─▶ IndirectBatch[] ─▶ build_indirect_commands
//!                        │                                        │
//!                        └──────────▶ build_instance_payload ◀────┘ (same order)
//! ```
//!
//! - [`mesh_pass`]: batch ids, sorting and coalescing into indirect and
//!   multi batches.
//! - [`indirect`]: draw commands with running first-index/base-vertex/
//!   base-instance totals.
//! - [`payload`]: per-instance transforms and bindless handles laid out in
//!   the order the commands address them.

pub mod indirect;
pub mod mesh_pass;
pub mod payload;

pub use indirect::{
    COMMAND_STRIDE, DrawElementsIndirect, GeometryCounts, IndirectCommands,
    build_indirect_commands,
};
pub use mesh_pass::{BatchKey, FlatBatch, IndirectBatch, MeshPass, MultiBatch, PassObject};
pub use payload::{InstanceData, InstancePayload, build_instance_payload};

use glam::Mat4;
use slotmap::new_key_type;

use crate::renderer::core::handle::Handle;
use crate::scene::{Material, MeshId, ObjectId};

new_key_type! {
    /// Identity of one render object inside the renderer.
    pub struct RenderObjectId;
}

/// The renderer's per-mesh record of a registered [`Object`](crate::scene::Object).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderObject {
    pub object: ObjectId,
    pub mesh: MeshId,
    pub material: Handle<Material>,
    pub transform: Mat4,
}
