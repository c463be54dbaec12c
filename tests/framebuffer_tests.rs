//! Texture & Framebuffer Tests
//!
//! Tests for:
//! - Texture: build2d, mip extents, uploads, residency, resize re-allocation
//! - Completeness: every FramebufferStatus rule, depth requirement
//! - Draw buffers: sorted color points, color writes disabled without color
//! - Re-attachment: resized textures are re-wired on the next bind, to the
//!   latest texture when resized more than once

use ember::EmberError;
use ember::prelude::*;
use ember::renderer::core::{Attachment, Framebuffer, FramebufferDesc, FramebufferStatus};
use ember::renderer::device::AttachmentPoint;

fn texture(
    device: &mut HeadlessDevice,
    store: &mut ResourceStore,
    label: &str,
    format: TextureFormat,
    size: (u32, u32),
) -> Handle<Texture> {
    store
        .create_resource(Texture::new_2d(
            device,
            TextureParams::new(label),
            1,
            format,
            size.0,
            size.1,
        ))
        .handle()
}

fn status_of(store: &ResourceStore, desc: &FramebufferDesc) -> Option<FramebufferStatus> {
    match Framebuffer::check(store, desc) {
        Ok(()) => None,
        Err(EmberError::IncompleteFramebuffer { status, .. }) => Some(status),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Texture Tests
// ============================================================================

#[test]
fn build2d_allocates_all_levels() {
    let mut device = HeadlessDevice::default();
    let texture = Texture::new_2d(
        &mut device,
        TextureParams::new("mips").with_filter(FilterMode::Nearest),
        3,
        TextureFormat::Rgba8Unorm,
        16,
        8,
    );

    assert!(texture.is_built());
    assert_eq!(texture.levels(), 3);
    assert_eq!(texture.level_size(2), (4, 2));
    let raw = texture.raw().unwrap();
    assert_eq!(device.texture_desc(raw).filter, FilterMode::Nearest);
    assert_eq!(device.texture_level(raw, 1).len(), 8 * 4 * 4);
}

#[test]
#[should_panic(expected = "already allocated")]
fn build2d_twice_panics() {
    let mut device = HeadlessDevice::default();
    let mut texture = Texture::new(TextureParams::new("once"));
    texture.build2d(&mut device, 1, TextureFormat::Rgba8Unorm, 4, 4);
    texture.build2d(&mut device, 1, TextureFormat::Rgba8Unorm, 4, 4);
}

#[test]
fn upload_writes_level_bytes() {
    let mut device = HeadlessDevice::default();
    let texture = Texture::new_2d(
        &mut device,
        TextureParams::new("pixels"),
        1,
        TextureFormat::Rgba8Unorm,
        2,
        1,
    );
    let pixels = [255, 0, 0, 255, 0, 255, 0, 255];

    texture.upload(&mut device, 0, &pixels);

    assert_eq!(device.texture_level(texture.raw().unwrap(), 0), pixels);
}

#[test]
fn residency_is_stable_and_skips_slot_zero() {
    let mut device = HeadlessDevice::default();
    let mut a = Texture::new_2d(&mut device, TextureParams::new("a"), 1, TextureFormat::Rgba8Unorm, 1, 1);
    let mut b = Texture::new_2d(&mut device, TextureParams::new("b"), 1, TextureFormat::Rgba8Unorm, 1, 1);

    let first = a.make_resident(&mut device);
    let second = b.make_resident(&mut device);

    assert_ne!(first, 0);
    assert_ne!(first, second);
    assert_eq!(a.make_resident(&mut device), first);
    assert_eq!(device.resident_count(), 2);
}

#[test]
#[should_panic(expected = "bindless texture table exhausted")]
fn residency_past_capacity_panics() {
    let mut device = HeadlessDevice::default().with_bindless_capacity(2);
    for label in ["a", "b"] {
        let mut t = Texture::new_2d(
            &mut device,
            TextureParams::new(label),
            1,
            TextureFormat::Rgba8Unorm,
            1,
            1,
        );
        t.make_resident(&mut device);
    }
}

#[test]
fn resize_reallocates_and_drops_residency() {
    let mut device = HeadlessDevice::default();
    let mut texture = Texture::new_2d(
        &mut device,
        TextureParams::new("target"),
        1,
        TextureFormat::Rgba16Float,
        8,
        8,
    );
    texture.make_resident(&mut device);
    let before = texture.raw();

    texture.resize(&mut device, 16, 4);

    assert_ne!(texture.raw(), before);
    assert_eq!(texture.size(), (16, 4));
    assert_eq!(texture.format(), Some(TextureFormat::Rgba16Float));
    assert_eq!(texture.resident_handle(), None);
    assert_eq!(device.live_textures(), 1);
    assert_eq!(device.resident_count(), 0);
}

// ============================================================================
// Completeness Tests
// ============================================================================

#[test]
fn empty_framebuffer_is_incomplete() {
    let store = ResourceStore::new();
    let desc = FramebufferDesc::new("empty");
    assert_eq!(status_of(&store, &desc), Some(FramebufferStatus::NoAttachments));
}

#[test]
fn color_plus_depth_stencil_is_complete() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let color = texture(&mut device, &mut store, "c", TextureFormat::Rgba16Float, (64, 32));
    let depth = texture(&mut device, &mut store, "d", TextureFormat::Depth24PlusStencil8, (64, 32));
    let desc = FramebufferDesc::new("scene")
        .attach(Attachment::new(AttachmentPoint::Color(0), color))
        .attach(Attachment::new(AttachmentPoint::DepthStencil, depth))
        .requires_depth(true);

    assert_eq!(status_of(&store, &desc), None);
    let framebuffer = Framebuffer::new(&mut device, &store, &desc);
    assert_eq!(framebuffer.size(), (64, 32));
}

#[test]
fn omitted_depth_stencil_fails_then_succeeds_once_attached() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let color = texture(&mut device, &mut store, "c", TextureFormat::Rgba8Unorm, (32, 32));
    let depth = texture(&mut device, &mut store, "d", TextureFormat::Depth24PlusStencil8, (32, 32));

    let without = FramebufferDesc::new("depth-tested")
        .attach(Attachment::new(AttachmentPoint::Color(0), color))
        .requires_depth(true);
    assert_eq!(
        status_of(&store, &without),
        Some(FramebufferStatus::MissingDepthStencil)
    );

    let with = without.attach(Attachment::new(AttachmentPoint::DepthStencil, depth));
    assert_eq!(status_of(&store, &with), None);
}

#[test]
fn mismatched_extents_are_reported() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let a = texture(&mut device, &mut store, "a", TextureFormat::Rgba8Unorm, (32, 32));
    let b = texture(&mut device, &mut store, "b", TextureFormat::Rgba8Unorm, (16, 32));
    let desc = FramebufferDesc::new("mrt")
        .attach(Attachment::new(AttachmentPoint::Color(0), a))
        .attach(Attachment::new(AttachmentPoint::Color(1), b));

    assert_eq!(
        status_of(&store, &desc),
        Some(FramebufferStatus::SizeMismatch {
            point: AttachmentPoint::Color(1),
            expected: (32, 32),
            found: (16, 32),
        })
    );
}

#[test]
fn depth_format_on_color_point_is_incompatible() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let depth = texture(&mut device, &mut store, "d", TextureFormat::Depth32Float, (8, 8));
    let desc =
        FramebufferDesc::new("bad").attach(Attachment::new(AttachmentPoint::Color(0), depth));

    assert_eq!(
        status_of(&store, &desc),
        Some(FramebufferStatus::IncompatibleFormat {
            point: AttachmentPoint::Color(0)
        })
    );
}

#[test]
fn unbuilt_and_missing_textures_are_reported() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let unbuilt = store
        .create_resource(Texture::new(TextureParams::new("unbuilt")))
        .handle();
    let desc =
        FramebufferDesc::new("a").attach(Attachment::new(AttachmentPoint::Color(0), unbuilt));
    assert_eq!(
        status_of(&store, &desc),
        Some(FramebufferStatus::UnbuiltTexture {
            point: AttachmentPoint::Color(0)
        })
    );

    let gone = texture(&mut device, &mut store, "gone", TextureFormat::Rgba8Unorm, (4, 4));
    store.destroy_resource(&mut device, gone);
    let desc = FramebufferDesc::new("b").attach(Attachment::new(AttachmentPoint::Color(0), gone));
    assert_eq!(
        status_of(&store, &desc),
        Some(FramebufferStatus::MissingTexture {
            point: AttachmentPoint::Color(0)
        })
    );
}

#[test]
fn level_out_of_range_is_reported() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let color = texture(&mut device, &mut store, "c", TextureFormat::Rgba8Unorm, (8, 8));
    let desc = FramebufferDesc::new("lvl")
        .attach(Attachment::new(AttachmentPoint::Color(0), color).with_level(1));

    assert_eq!(
        status_of(&store, &desc),
        Some(FramebufferStatus::LevelOutOfRange {
            point: AttachmentPoint::Color(0),
            level: 1,
            levels: 1,
        })
    );
}

#[test]
#[should_panic(expected = "incomplete")]
fn constructing_incomplete_framebuffer_panics() {
    let mut device = HeadlessDevice::default();
    let store = ResourceStore::new();
    let _ = Framebuffer::new(&mut device, &store, &FramebufferDesc::new("nothing"));
}

// ============================================================================
// Draw Buffer Tests
// ============================================================================

#[test]
fn draw_buffers_are_sorted_color_points() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let c2 = texture(&mut device, &mut store, "c2", TextureFormat::Rgba8Unorm, (8, 8));
    let c0 = texture(&mut device, &mut store, "c0", TextureFormat::Rgba8Unorm, (8, 8));
    let depth = texture(&mut device, &mut store, "d", TextureFormat::Depth24PlusStencil8, (8, 8));
    let desc = FramebufferDesc::new("mrt")
        .attach(Attachment::new(AttachmentPoint::DepthStencil, depth))
        .attach(Attachment::new(AttachmentPoint::Color(2), c2))
        .attach(Attachment::new(AttachmentPoint::Color(0), c0));

    let framebuffer = Framebuffer::new(&mut device, &store, &desc);

    let expected = [AttachmentPoint::Color(0), AttachmentPoint::Color(2)];
    assert_eq!(framebuffer.draw_buffers(), expected);
    assert_eq!(device.draw_buffers_of(framebuffer.raw()), expected);
}

#[test]
fn depth_only_framebuffer_disables_color_writes() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let depth = texture(&mut device, &mut store, "d", TextureFormat::Depth32Float, (8, 8));
    let desc = FramebufferDesc::new("shadow")
        .attach(Attachment::new(AttachmentPoint::Depth, depth))
        .requires_depth(true);

    let framebuffer = Framebuffer::new(&mut device, &store, &desc);

    assert!(!framebuffer.color_writes_enabled());
    assert!(device.draw_buffers_of(framebuffer.raw()).is_empty());
}

#[test]
fn update_attachments_replaces_one_point() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let a = texture(&mut device, &mut store, "a", TextureFormat::Rgba8Unorm, (8, 8));
    let b = texture(&mut device, &mut store, "b", TextureFormat::Rgba8Unorm, (8, 8));
    let desc = FramebufferDesc::new("swap").attach(Attachment::new(AttachmentPoint::Color(0), a));
    let mut framebuffer = Framebuffer::new(&mut device, &store, &desc);

    framebuffer.update_attachments(
        &mut device,
        &store,
        &[Attachment::new(AttachmentPoint::Color(0), b)],
    );

    let raw_b = store.get_resource(b).raw().unwrap();
    assert_eq!(
        framebuffer.attachment(AttachmentPoint::Color(0)).map(|a| a.texture),
        Some(b)
    );
    assert_eq!(
        device.attachment_of(framebuffer.raw(), AttachmentPoint::Color(0)),
        Some((raw_b, 0))
    );
}

// ============================================================================
// Re-attachment Tests
// ============================================================================

#[test]
fn resized_attachments_are_rewired_on_bind() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let color = texture(&mut device, &mut store, "c", TextureFormat::Rgba16Float, (64, 64));
    let depth = texture(&mut device, &mut store, "d", TextureFormat::Depth24PlusStencil8, (64, 64));
    let desc = FramebufferDesc::new("scene")
        .attach(Attachment::new(AttachmentPoint::Color(0), color))
        .attach(Attachment::new(AttachmentPoint::DepthStencil, depth))
        .requires_depth(true);
    let mut framebuffer = Framebuffer::new(&mut device, &store, &desc);

    store.get_resource_mut(color).resize(&mut device, 32, 16);
    store.get_resource_mut(depth).resize(&mut device, 32, 16);
    framebuffer.bind(&mut device, &store);

    let new_color = store.get_resource(color).raw().unwrap();
    let new_depth = store.get_resource(depth).raw().unwrap();
    assert_eq!(framebuffer.size(), (32, 16));
    assert_eq!(
        device.attachment_of(framebuffer.raw(), AttachmentPoint::Color(0)),
        Some((new_color, 0))
    );
    assert_eq!(
        device.attachment_of(framebuffer.raw(), AttachmentPoint::DepthStencil),
        Some((new_depth, 0))
    );
}

#[test]
fn attachments_resized_twice_are_wired_to_the_latest_texture() {
    let mut device = HeadlessDevice::default();
    let mut store = ResourceStore::new();
    let color = texture(&mut device, &mut store, "c", TextureFormat::Rgba16Float, (64, 64));
    let desc =
        FramebufferDesc::new("bloom").attach(Attachment::new(AttachmentPoint::Color(0), color));
    let mut framebuffer = Framebuffer::new(&mut device, &store, &desc);

    store.get_resource_mut(color).resize(&mut device, 32, 32);
    let stale = store.get_resource(color).raw().unwrap();
    store.get_resource_mut(color).resize(&mut device, 16, 8);
    framebuffer.bind(&mut device, &store);

    let latest = store.get_resource(color).raw().unwrap();
    assert_ne!(latest, stale);
    assert_eq!(framebuffer.size(), (16, 8));
    assert_eq!(
        device.attachment_of(framebuffer.raw(), AttachmentPoint::Color(0)),
        Some((latest, 0))
    );
    assert_eq!(device.framebuffer_label(framebuffer.raw()), "bloom");
}
