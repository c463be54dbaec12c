//! Bloom
//!
//! A dual-filter blur over a chain of half-resolution targets:
//!
//! ```text
//! scene ─down─▶ L0 ─down─▶ L1 ─down─▶ ... ─▶ Ln
//!                ▲          ▲                 │
//!                └───up─────┴──────up─────────┘   (additive)
//! ```
//!
//! The first downsample applies the brightness threshold. Each upsample adds
//! the smaller level onto the next larger one, leaving the result in `L0`.

use glam::Vec2;

use crate::renderer::core::framebuffer::{Attachment, Framebuffer, FramebufferDesc};
use crate::renderer::core::handle::Handle;
use crate::renderer::core::program::ShaderProgram;
use crate::renderer::core::store::ResourceStore;
use crate::renderer::core::texture::Texture;
use crate::renderer::device::{AttachmentPoint, BlendMode, RenderDevice};
use crate::renderer::post::{HDR_FORMAT, bindless_index, target_params};
use crate::renderer::settings::BloomSettings;

#[derive(Debug, Clone, Copy)]
struct BloomLevel {
    texture: Handle<Texture>,
    framebuffer: Handle<Framebuffer>,
}

/// Number of levels that fit below `size` without reaching zero extent.
#[must_use]
pub fn level_count((width, height): (u32, u32), requested: u32) -> u32 {
    let min = width.min(height);
    if min < 2 {
        return 0;
    }
    requested.min(min.ilog2())
}

pub struct BloomPass {
    downsample: Handle<ShaderProgram>,
    upsample: Handle<ShaderProgram>,
    levels: Vec<BloomLevel>,
}

impl BloomPass {
    pub fn new(
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        targets: &mut ResourceStore,
        downsample: Handle<ShaderProgram>,
        upsample: Handle<ShaderProgram>,
        settings: &BloomSettings,
        size: (u32, u32),
    ) -> Self {
        let mut pass = Self {
            downsample,
            upsample,
            levels: Vec::new(),
        };
        pass.allocate(device, resources, targets, settings, size);
        pass
    }

    fn allocate(
        &mut self,
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        targets: &mut ResourceStore,
        settings: &BloomSettings,
        (width, height): (u32, u32),
    ) {
        let count = if settings.enabled {
            level_count((width, height), settings.mip_count)
        } else {
            0
        };
        for i in 0..count {
            let w = (width >> (i + 1)).max(1);
            let h = (height >> (i + 1)).max(1);
            let texture = resources
                .create_resource(Texture::new_2d(
                    device,
                    target_params(format!("Bloom L{i}")),
                    1,
                    HDR_FORMAT,
                    w,
                    h,
                ))
                .handle();
            let desc = FramebufferDesc::new(format!("Bloom L{i}"))
                .attach(Attachment::new(AttachmentPoint::Color(0), texture));
            let framebuffer = targets
                .create_resource(Framebuffer::new(device, resources, &desc))
                .handle();
            self.levels.push(BloomLevel {
                texture,
                framebuffer,
            });
        }
        log::debug!("Bloom chain: {count} levels below {width}x{height}");
    }

    fn release(
        &mut self,
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        targets: &mut ResourceStore,
    ) {
        for level in self.levels.drain(..) {
            targets.destroy_resource(device, level.framebuffer);
            resources.destroy_resource(device, level.texture);
        }
    }

    /// Rebuilds the chain for a new scene size.
    pub fn resize(
        &mut self,
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        targets: &mut ResourceStore,
        settings: &BloomSettings,
        size: (u32, u32),
    ) {
        self.release(device, resources, targets);
        self.allocate(device, resources, targets, settings, size);
    }

    #[must_use]
    pub fn level_textures(&self) -> Vec<Handle<Texture>> {
        self.levels.iter().map(|l| l.texture).collect()
    }

    /// Blurs `source` and returns the texture holding the result, or `None`
    /// when bloom is off or the chain is empty.
    pub fn run(
        &self,
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        targets: &mut ResourceStore,
        source: Handle<Texture>,
        settings: &BloomSettings,
    ) -> Option<Handle<Texture>> {
        if !settings.enabled || self.levels.is_empty() {
            return None;
        }
        device.set_depth_test(false);

        // Downsample
        device.set_blend(BlendMode::Replace);
        let mut input = source;
        for (i, level) in self.levels.iter().enumerate() {
            let threshold = if i == 0 { settings.threshold } else { 0.0 };
            self.draw(device, resources, targets, self.downsample, input, *level, |p, d| {
                p.set(d, "threshold", threshold);
            });
            input = level.texture;
        }

        // Upsample
        device.set_blend(BlendMode::Additive);
        for pair in self.levels.windows(2).rev() {
            let (target, smaller) = (pair[0], pair[1]);
            self.draw(device, resources, targets, self.upsample, smaller.texture, target, |_, _| {});
        }
        device.set_blend(BlendMode::Replace);

        Some(self.levels[0].texture)
    }

    fn draw(
        &self,
        device: &mut dyn RenderDevice,
        resources: &mut ResourceStore,
        targets: &mut ResourceStore,
        program: Handle<ShaderProgram>,
        input: Handle<Texture>,
        target: BloomLevel,
        extra: impl FnOnce(&mut ShaderProgram, &mut dyn RenderDevice),
    ) {
        let (handle, (w, h)) = {
            let texture = resources.get_resource_mut(input);
            (texture.make_resident(device), texture.size())
        };
        targets
            .get_resource_mut(target.framebuffer)
            .bind(device, resources);

        let program = resources.get_resource_mut(program);
        program.set(device, "source", bindless_index(handle));
        program.set(device, "texel_size", Vec2::new(1.0 / w as f32, 1.0 / h as f32));
        extra(program, device);
        program.use_program(device);
        device.draw_fullscreen_triangle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_count_stops_before_zero_extent() {
        assert_eq!(level_count((1280, 720), 5), 5);
        assert_eq!(level_count((8, 4), 5), 2);
        assert_eq!(level_count((1, 720), 5), 0);
    }
}
