//! Framebuffers
//!
//! A [`Framebuffer`] wires textures from the [`ResourceStore`] to attachment
//! points and is guaranteed complete from the moment it exists.
//!
//! # Completeness
//!
//! A target is complete when:
//! - it has at least one attachment,
//! - every attached texture exists, has storage, and the mip level is in range,
//! - every attachment has the same extent at its mip level,
//! - color points hold color formats, `Depth` holds a depth format and
//!   `Stencil`/`DepthStencil` hold a format with stencil,
//! - when the target requires depth, a `Depth` or `DepthStencil` attachment is
//!   present.
//!
//! [`Framebuffer::new`] and [`Framebuffer::update_attachments`] treat an
//! incomplete set as fatal. [`Framebuffer::check`] reports the same result as
//! a value for code that wants to probe first.
//!
//! # Draw buffers
//!
//! After every attachment change, the color points are written to the device
//! sorted ascending. A target with no color attachment disables color writes.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{EmberError, Result};
use crate::renderer::core::handle::{GpuResource, Handle, IdResource, generate_resource_id};
use crate::renderer::core::signal::Connection;
use crate::renderer::core::store::ResourceStore;
use crate::renderer::core::texture::Texture;
use crate::renderer::device::{AttachmentPoint, RawFramebuffer, RawTexture, RenderDevice};

/// One texture attached at one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub point: AttachmentPoint,
    pub texture: Handle<Texture>,
    pub level: u32,
}

impl Attachment {
    #[must_use]
    pub const fn new(point: AttachmentPoint, texture: Handle<Texture>) -> Self {
        Self {
            point,
            texture,
            level: 0,
        }
    }

    #[must_use]
    pub const fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    pub label: String,
    pub attachments: Vec<Attachment>,
    /// The pipelines drawing into this target use depth testing.
    pub requires_depth: bool,
}

impl FramebufferDesc {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            attachments: Vec::new(),
            requires_depth: false,
        }
    }

    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn requires_depth(mut self, required: bool) -> Self {
        self.requires_depth = required;
        self
    }
}

/// The first completeness rule an attachment set violates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramebufferStatus {
    NoAttachments,
    MissingTexture {
        point: AttachmentPoint,
    },
    UnbuiltTexture {
        point: AttachmentPoint,
    },
    LevelOutOfRange {
        point: AttachmentPoint,
        level: u32,
        levels: u32,
    },
    IncompatibleFormat {
        point: AttachmentPoint,
    },
    SizeMismatch {
        point: AttachmentPoint,
        expected: (u32, u32),
        found: (u32, u32),
    },
    MissingDepthStencil,
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAttachments => f.write_str("no attachments"),
            Self::MissingTexture { point } => write!(f, "{point} texture does not exist"),
            Self::UnbuiltTexture { point } => write!(f, "{point} texture has no storage"),
            Self::LevelOutOfRange {
                point,
                level,
                levels,
            } => write!(f, "{point} mip level {level} out of range ({levels} levels)"),
            Self::IncompatibleFormat { point } => {
                write!(f, "{point} texture format is not renderable there")
            }
            Self::SizeMismatch {
                point,
                expected,
                found,
            } => write!(
                f,
                "{point} extent {}x{} differs from {}x{}",
                found.0, found.1, expected.0, expected.1
            ),
            Self::MissingDepthStencil => f.write_str("depth testing requires a depth attachment"),
        }
    }
}

/// Validates an attachment set, returning the common extent.
fn completeness<'a>(
    textures: &ResourceStore,
    attachments: impl IntoIterator<Item = &'a Attachment>,
    requires_depth: bool,
) -> std::result::Result<(u32, u32), FramebufferStatus> {
    let mut extent: Option<(u32, u32)> = None;
    let mut has_depth = false;

    for attachment in attachments {
        let point = attachment.point;
        let texture = textures
            .try_get_resource(attachment.texture)
            .ok_or(FramebufferStatus::MissingTexture { point })?;
        let format = texture
            .format()
            .ok_or(FramebufferStatus::UnbuiltTexture { point })?;
        if attachment.level >= texture.levels() {
            return Err(FramebufferStatus::LevelOutOfRange {
                point,
                level: attachment.level,
                levels: texture.levels(),
            });
        }

        let compatible = match point {
            AttachmentPoint::Color(_) => format.is_color(),
            AttachmentPoint::Depth => format.is_depth(),
            AttachmentPoint::Stencil | AttachmentPoint::DepthStencil => format.has_stencil(),
        };
        if !compatible {
            return Err(FramebufferStatus::IncompatibleFormat { point });
        }
        has_depth |= matches!(point, AttachmentPoint::Depth | AttachmentPoint::DepthStencil);

        let found = texture.level_size(attachment.level);
        match extent {
            None => extent = Some(found),
            Some(expected) if expected != found => {
                return Err(FramebufferStatus::SizeMismatch {
                    point,
                    expected,
                    found,
                });
            }
            Some(_) => {}
        }
    }

    let extent = extent.ok_or(FramebufferStatus::NoAttachments)?;
    if requires_depth && !has_depth {
        return Err(FramebufferStatus::MissingDepthStencil);
    }
    Ok(extent)
}

pub struct Framebuffer {
    id: u32,
    label: String,
    raw: RawFramebuffer,
    requires_depth: bool,
    attachments: BTreeMap<AttachmentPoint, Attachment>,
    draw_buffers: SmallVec<[AttachmentPoint; 4]>,
    size: (u32, u32),
    connections: FxHashMap<AttachmentPoint, Connection>,
    rewire_tx: flume::Sender<(AttachmentPoint, RawTexture)>,
    rewire_rx: flume::Receiver<(AttachmentPoint, RawTexture)>,
}

impl Framebuffer {
    /// Reports whether `desc` would produce a complete target.
    pub fn check(textures: &ResourceStore, desc: &FramebufferDesc) -> Result<()> {
        completeness(textures, &desc.attachments, desc.requires_depth)
            .map(|_| ())
            .map_err(|status| EmberError::IncompleteFramebuffer {
                label: desc.label.clone(),
                status,
            })
    }

    /// Creates the framebuffer and attaches every texture in `desc`.
    ///
    /// # Panics
    ///
    /// Panics if the attachment set is incomplete.
    pub fn new(
        device: &mut dyn RenderDevice,
        textures: &ResourceStore,
        desc: &FramebufferDesc,
    ) -> Self {
        let size = assert_complete(&desc.label, textures, &desc.attachments, desc.requires_depth);
        let (rewire_tx, rewire_rx) = flume::unbounded();
        let mut framebuffer = Self {
            id: generate_resource_id(),
            label: desc.label.clone(),
            raw: device.create_framebuffer(&desc.label),
            requires_depth: desc.requires_depth,
            attachments: BTreeMap::new(),
            draw_buffers: SmallVec::new(),
            size,
            connections: FxHashMap::default(),
            rewire_tx,
            rewire_rx,
        };
        for attachment in &desc.attachments {
            framebuffer.apply(device, textures, *attachment);
        }
        framebuffer.update_draw_buffers(device);
        log::debug!(
            "Created framebuffer '{}' {}x{} with {} attachments",
            framebuffer.label,
            size.0,
            size.1,
            framebuffer.attachments.len()
        );
        framebuffer
    }

    /// Rewrites a subset of attachments in place.
    ///
    /// # Panics
    ///
    /// Panics if the resulting attachment set is incomplete.
    pub fn update_attachments(
        &mut self,
        device: &mut dyn RenderDevice,
        textures: &ResourceStore,
        updates: &[Attachment],
    ) {
        let mut merged = self.attachments.clone();
        for attachment in updates {
            merged.insert(attachment.point, *attachment);
        }
        self.size = assert_complete(&self.label, textures, merged.values(), self.requires_depth);

        for attachment in updates {
            self.apply(device, textures, *attachment);
        }
        self.update_draw_buffers(device);
    }

    fn apply(&mut self, device: &mut dyn RenderDevice, textures: &ResourceStore, attachment: Attachment) {
        let texture = textures.get_resource(attachment.texture);
        device.framebuffer_texture(self.raw, attachment.point, texture.raw(), attachment.level);

        if let Some(mut old) = self.connections.remove(&attachment.point) {
            old.disconnect();
        }
        let tx = self.rewire_tx.clone();
        let point = attachment.point;
        let connection = texture.handle_changed().connect(move |raw| {
            let _ = tx.send((point, *raw));
        });
        self.connections.insert(point, connection);
        self.attachments.insert(point, attachment);
    }

    fn update_draw_buffers(&mut self, device: &mut dyn RenderDevice) {
        // BTreeMap keys are already sorted; color points order first.
        self.draw_buffers = self
            .attachments
            .keys()
            .copied()
            .filter(|point| point.is_color())
            .collect();
        device.framebuffer_draw_buffers(self.raw, &self.draw_buffers);
    }

    /// Re-attaches textures that were reallocated since the last call.
    pub fn sync(&mut self, device: &mut dyn RenderDevice, textures: &ResourceStore) {
        let latest: FxHashMap<AttachmentPoint, RawTexture> = self.rewire_rx.try_iter().collect();
        let mut changed = false;
        for (point, raw) in latest {
            if let Some(attachment) = self.attachments.get(&point) {
                device.framebuffer_texture(self.raw, point, Some(raw), attachment.level);
                changed = true;
            }
        }
        if changed {
            self.size = assert_complete(
                &self.label,
                textures,
                self.attachments.values(),
                self.requires_depth,
            );
            log::debug!(
                "Framebuffer '{}' re-attached at {}x{}",
                self.label,
                self.size.0,
                self.size.1
            );
        }
    }

    /// Syncs pending re-attachments and binds as the current target.
    pub fn bind(&mut self, device: &mut dyn RenderDevice, textures: &ResourceStore) {
        self.sync(device, textures);
        device.bind_framebuffer(Some(self.raw));
        device.set_viewport(self.size.0, self.size.1);
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> Handle<Framebuffer> {
        self.res_handle()
    }

    #[must_use]
    pub fn raw(&self) -> RawFramebuffer {
        self.raw
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    #[must_use]
    pub fn attachment(&self, point: AttachmentPoint) -> Option<&Attachment> {
        self.attachments.get(&point)
    }

    /// Color attachments written by draws, ascending.
    #[must_use]
    pub fn draw_buffers(&self) -> &[AttachmentPoint] {
        &self.draw_buffers
    }

    #[must_use]
    pub fn color_writes_enabled(&self) -> bool {
        !self.draw_buffers.is_empty()
    }
}

fn assert_complete<'a>(
    label: &str,
    textures: &ResourceStore,
    attachments: impl IntoIterator<Item = &'a Attachment>,
    requires_depth: bool,
) -> (u32, u32) {
    match completeness(textures, attachments, requires_depth) {
        Ok(extent) => extent,
        Err(status) => {
            log::error!("Framebuffer '{label}' is incomplete: {status}");
            panic!("framebuffer '{label}' is incomplete: {status}");
        }
    }
}

impl IdResource for Framebuffer {
    fn res_id(&self) -> u32 {
        self.id
    }
}

impl GpuResource for Framebuffer {
    fn release(mut self, device: &mut dyn RenderDevice) {
        for connection in self.connections.values_mut() {
            connection.disconnect();
        }
        device.destroy_framebuffer(self.raw);
    }
}

impl fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Framebuffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("size", &self.size)
            .field("attachments", &self.attachments)
            .field("draw_buffers", &self.draw_buffers)
            .finish_non_exhaustive()
    }
}
