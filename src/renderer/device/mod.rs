//! Render Device
//!
//! The single native graphics API the engine core talks to.
//!
//! # Overview
//!
//! [`RenderDevice`] is a state-machine style interface: objects are created
//! and addressed through raw ids, state is bound (framebuffer, program, vertex
//! array, buffer targets) and draws consume whatever is bound. Higher-level
//! wrappers in [`crate::renderer::core`] own these raw ids and are the only
//! code that should call into a device directly.
//!
//! Two backends implement it:
//! - [`WgpuDevice`]: records into `wgpu` render passes and presents.
//! - [`HeadlessDevice`]: CPU-side, records draws for inspection.
//!
//! # Binding model
//!
//! | Target                              | Shader side                                  |
//! |-------------------------------------|----------------------------------------------|
//! | program uniforms                    | `@group(0) @binding(0) var<uniform>`         |
//! | `bind_buffer_base(ShaderStorage, i)`| `@group(0) @binding(1 + i) var<storage, read>`|
//! | resident textures                   | `@group(1) @binding(0)` texture binding array |
//! | (one sampler per resident texture)  | `@group(1) @binding(1)` sampler binding array |
//!
//! Bindless handles are indices into the texture array; `0` is reserved for
//! "no texture" and resolves to a 1x1 white texel.

pub mod headless;
pub mod wgpu_backend;

pub use headless::HeadlessDevice;
pub use wgpu_backend::WgpuDevice;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::errors::Result;

new_key_type! {
    /// Backend id of a buffer object.
    pub struct RawBuffer;
    /// Backend id of a texture object.
    pub struct RawTexture;
    /// Backend id of a framebuffer object.
    pub struct RawFramebuffer;
    /// Backend id of a vertex array object.
    pub struct RawVertexArray;
    /// Backend id of a linked program.
    pub struct RawProgram;
}

/// Number of storage buffer binding points (`bind_buffer_base` indices).
pub const MAX_STORAGE_BINDINGS: u32 = 3;

/// Size of one program uniform block.
pub const MAX_UNIFORM_BLOCK_SIZE: usize = 256;

// ============================================================================
// Buffers
// ============================================================================

bitflags! {
    /// Creation flags describing how a buffer may be bound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        const VERTEX   = 1 << 0;
        const INDEX    = 1 << 1;
        const INDIRECT = 1 << 2;
        const STORAGE  = 1 << 3;
        const UNIFORM  = 1 << 4;
    }
}

/// Binding points a buffer can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Array,
    ElementArray,
    DrawIndirect,
    ShaderStorage,
    Uniform,
}

impl BufferTarget {
    /// Whether the target has indexed binding points.
    #[must_use]
    pub fn is_indexed(self) -> bool {
        matches!(self, Self::ShaderStorage | Self::Uniform)
    }

    /// The creation flag a buffer needs to be bound here.
    #[must_use]
    pub fn required_flag(self) -> BufferFlags {
        match self {
            Self::Array => BufferFlags::VERTEX,
            Self::ElementArray => BufferFlags::INDEX,
            Self::DrawIndirect => BufferFlags::INDIRECT,
            Self::ShaderStorage => BufferFlags::STORAGE,
            Self::Uniform => BufferFlags::UNIFORM,
        }
    }
}

bitflags! {
    /// Memory barrier classes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryBarrier: u32 {
        const COMMAND         = 1 << 0;
        const SHADER_STORAGE  = 1 << 1;
        const VERTEX_ATTRIB   = 1 << 2;
        const ELEMENT_ARRAY   = 1 << 3;
    }
}

// ============================================================================
// Textures & Render Targets
// ============================================================================

/// Pixel formats supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    R32Float,
    Depth24PlusStencil8,
    Depth32Float,
}

impl TextureFormat {
    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24PlusStencil8 | Self::Depth32Float)
    }

    #[must_use]
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }

    #[must_use]
    pub fn is_color(self) -> bool {
        !self.is_depth()
    }

    /// Bytes per texel for uploads. Depth formats cannot be uploaded.
    #[must_use]
    pub fn texel_size(self) -> Option<u32> {
        match self {
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::R32Float => Some(4),
            Self::Rgba16Float => Some(8),
            Self::Depth24PlusStencil8 | Self::Depth32Float => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WrapMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

/// Full description of a 2D texture allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

/// Where a texture is attached on a framebuffer.
///
/// Ordering places color attachments first, ascending by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentPoint {
    Color(u32),
    Depth,
    Stencil,
    DepthStencil,
}

impl AttachmentPoint {
    #[must_use]
    pub fn is_color(self) -> bool {
        matches!(self, Self::Color(_))
    }
}

impl std::fmt::Display for AttachmentPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Color(i) => write!(f, "color{i}"),
            Self::Depth => f.write_str("depth"),
            Self::Stencil => f.write_str("stencil"),
            Self::DepthStencil => f.write_str("depth_stencil"),
        }
    }
}

// ============================================================================
// Vertex Input
// ============================================================================

/// Component type of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Float32,
    Sint32,
    Uint32,
}

/// One shader input fed from a vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader `@location`.
    pub location: u32,
    /// Binding slot the data is read from.
    pub binding: u32,
    /// Number of components, 1 to 4.
    pub components: u32,
    pub kind: AttributeKind,
    /// Byte offset within one vertex of the binding.
    pub offset: u32,
}

impl VertexAttribute {
    #[must_use]
    pub const fn float(location: u32, binding: u32, components: u32) -> Self {
        Self {
            location,
            binding,
            components,
            kind: AttributeKind::Float32,
            offset: 0,
        }
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Byte size of one element; each component is 4 bytes.
    #[must_use]
    pub const fn byte_size(&self) -> u32 {
        self.components * 4
    }
}

// ============================================================================
// Programs & Pipeline State
// ============================================================================

/// Shader stage kinds recognised by program discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    TessControl,
    TessEvaluation,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 5] = [
        Self::Vertex,
        Self::Fragment,
        Self::Compute,
        Self::TessControl,
        Self::TessEvaluation,
    ];

    /// File name suffix: `<name>.<suffix>.wgsl`.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
            Self::TessControl => "tesc",
            Self::TessEvaluation => "tese",
        }
    }

    /// Required entry point name.
    #[must_use]
    pub fn entry_point(self) -> &'static str {
        match self {
            Self::Vertex => "vs_main",
            Self::Fragment => "fs_main",
            Self::Compute => "cs_main",
            Self::TessControl => "tcs_main",
            Self::TessEvaluation => "tes_main",
        }
    }

    /// WGSL stage attribute expected on the entry point.
    #[must_use]
    pub fn attribute(self) -> &'static str {
        match self {
            Self::Vertex => "@vertex",
            Self::Fragment => "@fragment",
            Self::Compute => "@compute",
            Self::TessControl | Self::TessEvaluation => "",
        }
    }
}

/// Source text of one stage.
#[derive(Debug, Clone)]
pub struct StageSource {
    pub stage: ShaderStage,
    pub source: String,
}

/// Color blending applied to draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    Additive,
    Alpha,
}

// ============================================================================
// Device Trait
// ============================================================================

/// State-machine interface over the native graphics API.
///
/// All calls are blocking and must come from the thread that owns the device.
/// Passing a raw id that was never created or was already destroyed is a
/// programming error; backends panic on it.
pub trait RenderDevice {
    fn backend_name(&self) -> &'static str;

    /// Capacity of the bindless texture table, including the reserved slot 0.
    fn max_bindless_textures(&self) -> u32;

    // ---- Buffers -----------------------------------------------------------

    fn create_buffer(&mut self, label: &str, capacity: u64, flags: BufferFlags)
    -> Result<RawBuffer>;
    fn write_buffer(&mut self, buffer: RawBuffer, offset: u64, data: &[u8]);
    /// Copies the first `size` bytes of `src` to the start of `dst`.
    fn copy_buffer(&mut self, src: RawBuffer, dst: RawBuffer, size: u64);
    fn read_buffer(&mut self, buffer: RawBuffer, offset: u64, size: u64) -> Vec<u8>;
    fn destroy_buffer(&mut self, buffer: RawBuffer);
    fn bind_buffer(&mut self, target: BufferTarget, buffer: RawBuffer);
    fn bind_buffer_base(&mut self, target: BufferTarget, index: u32, buffer: RawBuffer);

    // ---- Textures ----------------------------------------------------------

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<RawTexture>;
    fn write_texture(&mut self, texture: RawTexture, level: u32, data: &[u8]);
    /// Returns the bindless handle for `texture`, activating it if needed.
    fn make_texture_resident(&mut self, texture: RawTexture) -> u64;
    fn destroy_texture(&mut self, texture: RawTexture);

    // ---- Framebuffers ------------------------------------------------------

    fn create_framebuffer(&mut self, label: &str) -> RawFramebuffer;
    fn framebuffer_texture(
        &mut self,
        framebuffer: RawFramebuffer,
        point: AttachmentPoint,
        texture: Option<RawTexture>,
        level: u32,
    );
    /// Selects the color attachments written by draws. Empty disables color
    /// writes.
    fn framebuffer_draw_buffers(&mut self, framebuffer: RawFramebuffer, points: &[AttachmentPoint]);
    fn destroy_framebuffer(&mut self, framebuffer: RawFramebuffer);

    // ---- Vertex arrays -----------------------------------------------------

    fn create_vertex_array(&mut self, label: &str) -> RawVertexArray;
    fn vertex_array_binding(
        &mut self,
        vao: RawVertexArray,
        slot: u32,
        buffer: RawBuffer,
        offset: u64,
        stride: u32,
    );
    fn vertex_array_attribute(&mut self, vao: RawVertexArray, attribute: &VertexAttribute);
    fn vertex_array_index_buffer(&mut self, vao: RawVertexArray, buffer: RawBuffer);
    fn destroy_vertex_array(&mut self, vao: RawVertexArray);

    // ---- Programs ----------------------------------------------------------

    /// Compiles and links `stages`. The error carries the diagnostic log.
    fn create_program(
        &mut self,
        label: &str,
        stages: &[StageSource],
    ) -> std::result::Result<RawProgram, String>;
    /// Replaces the uniform block contents of `program`.
    fn program_uniforms(&mut self, program: RawProgram, data: &[u8]);
    fn destroy_program(&mut self, program: RawProgram);

    // ---- State & draws -----------------------------------------------------

    /// `None` selects the default target.
    fn bind_framebuffer(&mut self, framebuffer: Option<RawFramebuffer>);
    fn set_viewport(&mut self, width: u32, height: u32);
    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>);
    fn set_blend(&mut self, blend: BlendMode);
    fn set_depth_test(&mut self, enabled: bool);
    fn use_program(&mut self, program: RawProgram);
    fn bind_vertex_array(&mut self, vao: RawVertexArray);
    fn memory_barrier(&mut self, barriers: MemoryBarrier);
    /// Issues `count` indexed draws read from the bound `DrawIndirect` buffer
    /// starting at byte `offset`.
    fn multi_draw_elements_indirect(&mut self, offset: u64, count: u32);
    /// Draws one triangle covering the target; the vertex stage derives
    /// positions from the vertex index.
    fn draw_fullscreen_triangle(&mut self);

    // ---- Frame -------------------------------------------------------------

    fn default_target_size(&self) -> (u32, u32);
    fn resize_default_target(&mut self, width: u32, height: u32);
    /// Submits recorded work and presents the default target.
    fn present(&mut self);
}
