//! Ember
//!
//! A bindless, indirect-draw rendering core. Scene objects are batched by
//! (mesh, material), grouped by shader program and submitted with one
//! multi-draw-indirect call per program; every GPU object is owned by a
//! typed [`ResourceStore`](renderer::core::ResourceStore) and addressed
//! through [`Handle`](renderer::core::Handle)s.
//!
//! # Layout
//!
//! - [`renderer::device`]: the [`RenderDevice`](renderer::device::RenderDevice)
//!   seam and its `wgpu` and headless backends
//! - [`renderer::core`]: buffers, textures, framebuffers, vertex arrays,
//!   programs and the resource store
//! - [`renderer::pass`]: mesh pass batching, indirect commands, instance payload
//! - [`renderer::post`]: HDR scene target, bloom and composite
//! - [`scene`]: meshes, materials and objects handed in by importers
//! - [`app`]: window seam, GUI draw registry and the frame loop

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod app;
pub mod errors;
pub mod renderer;
pub mod scene;
pub mod utils;

pub use app::{Engine, Gui, Window};
pub use errors::{EmberError, Result};
pub use renderer::device::{HeadlessDevice, RenderDevice, WgpuDevice};
pub use renderer::{FrameStats, Renderer, RendererSettings};
pub use scene::{Material, Mesh, MeshId, Object, ObjectId, RenderPass, TextureSlot, Vertex};

/// Common imports for applications.
pub mod prelude {
    pub use crate::app::{Engine, Gui, Window};
    pub use crate::errors::{EmberError, Result};
    pub use crate::renderer::core::{Handle, ResourceStore, ShaderProgram, Texture, TextureParams};
    pub use crate::renderer::device::{
        FilterMode, HeadlessDevice, RenderDevice, TextureFormat, WgpuDevice, WrapMode,
    };
    pub use crate::renderer::{BloomSettings, FrameStats, Renderer, RendererSettings};
    pub use crate::scene::{
        Material, Mesh, MeshId, Object, ObjectId, RenderPass, TextureSlot, Vertex,
    };
}
