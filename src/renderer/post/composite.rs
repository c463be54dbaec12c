//! Composite
//!
//! Resolves the HDR scene plus bloom to the default target with exposure
//! tone mapping.

use crate::renderer::core::handle::Handle;
use crate::renderer::core::program::ShaderProgram;
use crate::renderer::core::store::ResourceStore;
use crate::renderer::core::texture::Texture;
use crate::renderer::device::{BlendMode, RenderDevice};
use crate::renderer::post::bindless_index;

pub struct CompositePass {
    program: Handle<ShaderProgram>,
}

impl CompositePass {
    #[must_use]
    pub fn new(program: Handle<ShaderProgram>) -> Self {
        Self { program }
    }

    pub fn run(
        &self,
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        scene: Handle<Texture>,
        bloom: Option<Handle<Texture>>,
        exposure: f32,
        bloom_strength: f32,
    ) {
        let scene_handle = resources.get_resource_mut(scene).make_resident(device);
        let bloom_handle = bloom.map_or(0, |b| resources.get_resource_mut(b).make_resident(device));

        device.bind_framebuffer(None);
        let (width, height) = device.default_target_size();
        device.set_viewport(width, height);
        device.set_depth_test(false);
        device.set_blend(BlendMode::Replace);

        let program = resources.get_resource_mut(self.program);
        program.set(device, "scene", bindless_index(scene_handle));
        program.set(device, "bloom", bindless_index(bloom_handle));
        program.set(device, "exposure", exposure);
        program.set(
            device,
            "bloom_strength",
            if bloom.is_some() { bloom_strength } else { 0.0 },
        );
        program.use_program(device);
        device.draw_fullscreen_triangle();
    }
}
