//! Materials
//!
//! A [`Material`] binds one shader program per [`RenderPass`] and up to five
//! textures. Materials live in the renderer's resource store; texture slots
//! reference textures there and are resolved to bindless handles when
//! instance data is built.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::renderer::core::handle::{GpuResource, Handle, IdResource, generate_resource_id};
use crate::renderer::core::program::ShaderProgram;
use crate::renderer::core::texture::Texture;
use crate::renderer::device::RenderDevice;

/// Passes a material can provide a program for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RenderPass {
    Forward,
}

/// Texture slots, in instance-data order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Diffuse = 0,
    Normal = 1,
    Metallic = 2,
    Roughness = 3,
    Emissive = 4,
}

impl TextureSlot {
    pub const COUNT: usize = 5;
    pub const ALL: [TextureSlot; Self::COUNT] = [
        Self::Diffuse,
        Self::Normal,
        Self::Metallic,
        Self::Roughness,
        Self::Emissive,
    ];
}

#[derive(Debug, Clone)]
pub struct Material {
    id: u32,
    label: String,
    programs: FxHashMap<RenderPass, Handle<ShaderProgram>>,
    textures: [Option<Handle<Texture>>; TextureSlot::COUNT],
}

impl Material {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: generate_resource_id(),
            label: label.into(),
            programs: FxHashMap::default(),
            textures: [None; TextureSlot::COUNT],
        }
    }

    #[must_use]
    pub fn with_program(mut self, pass: RenderPass, program: Handle<ShaderProgram>) -> Self {
        self.programs.insert(pass, program);
        self
    }

    /// Binds `program` for `pass` on a material already in the store.
    /// Objects registered before the change keep their batch.
    pub fn set_program(&mut self, pass: RenderPass, program: Handle<ShaderProgram>) {
        self.programs.insert(pass, program);
    }

    #[must_use]
    pub fn with_texture(mut self, slot: TextureSlot, texture: Handle<Texture>) -> Self {
        self.textures[slot as usize] = Some(texture);
        self
    }

    #[must_use]
    pub fn handle(&self) -> Handle<Material> {
        self.res_handle()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn program(&self, pass: RenderPass) -> Option<Handle<ShaderProgram>> {
        self.programs.get(&pass).copied()
    }

    #[must_use]
    pub fn texture(&self, slot: TextureSlot) -> Option<Handle<Texture>> {
        self.textures[slot as usize]
    }

    #[must_use]
    pub fn textures(&self) -> &[Option<Handle<Texture>>; TextureSlot::COUNT] {
        &self.textures
    }
}

impl IdResource for Material {
    fn res_id(&self) -> u32 {
        self.id
    }
}

// Materials own no device objects; textures and programs are released by
// their own arenas.
impl GpuResource for Material {
    fn release(self, _device: &mut dyn RenderDevice) {}
}
