//! Render Targets & Post-Processing
//!
//! The scene is drawn into an HDR [`SceneTarget`], blurred by the
//! [`BloomPass`] and resolved to the default target by the
//! [`CompositePass`].
//!
//! Post-process programs sample their inputs through bindless handles passed
//! as `i32` uniforms, so no per-pass texture binding state exists.

pub mod bloom;
pub mod composite;

pub use bloom::BloomPass;
pub use composite::CompositePass;

use crate::renderer::core::framebuffer::{Attachment, Framebuffer, FramebufferDesc};
use crate::renderer::core::handle::Handle;
use crate::renderer::core::store::ResourceStore;
use crate::renderer::core::texture::{Texture, TextureParams};
use crate::renderer::device::{
    AttachmentPoint, FilterMode, RenderDevice, TextureFormat, WrapMode,
};

/// Color format of the scene and bloom targets.
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// Depth format of the scene target.
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24PlusStencil8;

/// Converts a bindless handle to the `i32` shader uniform form.
pub(crate) fn bindless_index(handle: u64) -> i32 {
    i32::try_from(handle).unwrap_or_else(|_| {
        log::error!("Bindless handle {handle} does not fit a shader index");
        0
    })
}

/// Render-target texture parameters: filtered, clamped.
pub(crate) fn target_params(label: impl Into<String>) -> TextureParams {
    TextureParams::new(label)
        .with_filter(FilterMode::Linear)
        .with_wrap(WrapMode::ClampToEdge)
}

// ============================================================================
// SceneTarget
// ============================================================================

/// HDR color + depth-stencil target the forward pass renders into.
#[derive(Debug, Clone, Copy)]
pub struct SceneTarget {
    pub color: Handle<Texture>,
    pub depth: Handle<Texture>,
    pub framebuffer: Handle<Framebuffer>,
}

impl SceneTarget {
    pub fn new(
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        targets: &mut ResourceStore,
        (width, height): (u32, u32),
    ) -> Self {
        let color = resources
            .create_resource(Texture::new_2d(
                device,
                target_params("Scene Color"),
                1,
                HDR_FORMAT,
                width,
                height,
            ))
            .handle();
        let depth = resources
            .create_resource(Texture::new_2d(
                device,
                TextureParams::new("Scene Depth").with_filter(FilterMode::Nearest),
                1,
                DEPTH_FORMAT,
                width,
                height,
            ))
            .handle();

        let desc = FramebufferDesc::new("Scene")
            .attach(Attachment::new(AttachmentPoint::Color(0), color))
            .attach(Attachment::new(AttachmentPoint::DepthStencil, depth))
            .requires_depth(true);
        let framebuffer = targets
            .create_resource(Framebuffer::new(device, resources, &desc))
            .handle();

        Self {
            color,
            depth,
            framebuffer,
        }
    }

    /// Reallocates both textures; the framebuffer re-attaches on next bind.
    pub fn resize(
        &self,
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        (width, height): (u32, u32),
    ) {
        resources
            .get_resource_mut(self.color)
            .resize(device, width, height);
        resources
            .get_resource_mut(self.depth)
            .resize(device, width, height);
    }

    pub fn bind(
        &self,
        device: &mut dyn RenderDevice,
        resources: &ResourceStore,
        targets: &mut ResourceStore,
    ) {
        targets
            .get_resource_mut(self.framebuffer)
            .bind(device, resources);
    }
}
