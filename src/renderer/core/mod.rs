//! GPU Object Core
//!
//! Owning wrappers around raw device objects, addressed by stable
//! [`Handle`]s through a [`ResourceStore`]:
//!
//! - [`GpuBuffer`]: growable append buffer
//! - [`Texture`] / [`Framebuffer`]: images and render targets
//! - [`VertexArray`]: vertex input layout
//! - [`ShaderProgram`]: discovered, compiled program with typed uniforms
//!
//! Objects whose native id can change (buffers on growth, textures on resize)
//! publish the new id through a [`Signal`]; dependents subscribe and re-bind.

pub mod buffer;
pub mod framebuffer;
pub mod handle;
pub mod program;
pub mod signal;
pub mod store;
pub mod texture;
pub mod uniforms;
pub mod vertex_array;

pub use buffer::{GROWTH_FACTOR, GpuBuffer};
pub use framebuffer::{Attachment, Framebuffer, FramebufferDesc, FramebufferStatus};
pub use handle::{GpuResource, Handle, IdResource, generate_resource_id};
pub use program::{ShaderProgram, discover_stages};
pub use signal::{Connection, Signal};
pub use store::ResourceStore;
pub use texture::{Texture, TextureParams};
pub use uniforms::{UniformLayout, UniformType, UniformValue};
pub use vertex_array::{VertexArray, VertexBinding};
