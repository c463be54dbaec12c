//! Textures
//!
//! [`Texture`] is created unallocated from sampling parameters; storage is
//! allocated exactly once by [`build2d`](Texture::build2d). Residency turns
//! the texture into a 64-bit bindless handle that shaders index directly.
//!
//! Resizing reallocates the device texture, drops residency (the old handle
//! is no longer valid) and emits [`handle_changed`](Texture::handle_changed)
//! so framebuffers that attach it can re-wire themselves.

use crate::renderer::core::handle::{GpuResource, Handle, IdResource, generate_resource_id};
use crate::renderer::core::signal::Signal;
use crate::renderer::device::{
    FilterMode, RawTexture, RenderDevice, TextureDesc, TextureFormat, WrapMode,
};

/// Sampling parameters fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextureParams {
    pub label: String,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl TextureParams {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterMode) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = wrap;
        self
    }
}

/// Allocated storage of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Storage {
    raw: RawTexture,
    format: TextureFormat,
    width: u32,
    height: u32,
    levels: u32,
}

pub struct Texture {
    id: u32,
    params: TextureParams,
    storage: Option<Storage>,
    resident: Option<u64>,
    handle_changed: Signal<RawTexture>,
}

impl Texture {
    #[must_use]
    pub fn new(params: TextureParams) -> Self {
        Self {
            id: generate_resource_id(),
            params,
            storage: None,
            resident: None,
            handle_changed: Signal::new(),
        }
    }

    /// Creates and allocates in one step.
    pub fn new_2d(
        device: &mut dyn RenderDevice,
        params: TextureParams,
        levels: u32,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let mut texture = Self::new(params);
        texture.build2d(device, levels, format, width, height);
        texture
    }

    /// Allocates immutable 2D storage.
    ///
    /// # Panics
    ///
    /// Panics if storage was already allocated, or on zero extents/levels.
    pub fn build2d(
        &mut self,
        device: &mut dyn RenderDevice,
        levels: u32,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) {
        assert!(
            self.storage.is_none(),
            "texture '{}' storage is already allocated",
            self.params.label
        );
        assert!(levels > 0 && width > 0 && height > 0, "empty texture storage");
        let raw = self.allocate(device, levels, format, width, height);
        self.storage = Some(Storage {
            raw,
            format,
            width,
            height,
            levels,
        });
    }

    fn allocate(
        &self,
        device: &mut dyn RenderDevice,
        levels: u32,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> RawTexture {
        let desc = TextureDesc {
            label: self.params.label.clone(),
            format,
            width,
            height,
            levels,
            filter: self.params.filter,
            wrap: self.params.wrap,
        };
        match device.create_texture(&desc) {
            Ok(raw) => raw,
            Err(err) => {
                log::error!("Texture allocation failed: {err}");
                panic!("unrecoverable texture allocation failure: {err}");
            }
        }
    }

    fn storage(&self) -> Storage {
        self.storage
            .unwrap_or_else(|| panic!("texture '{}' has no storage", self.params.label))
    }

    /// Uploads texel data for one mip level.
    pub fn upload(&self, device: &mut dyn RenderDevice, level: u32, data: &[u8]) {
        let storage = self.storage();
        assert!(level < storage.levels, "mip level {level} out of range");
        device.write_texture(storage.raw, level, data);
    }

    /// Returns the bindless handle, making the texture resident on first call.
    pub fn make_resident(&mut self, device: &mut dyn RenderDevice) -> u64 {
        if let Some(handle) = self.resident {
            return handle;
        }
        let handle = device.make_texture_resident(self.storage().raw);
        log::debug!("Texture '{}' resident as {handle}", self.params.label);
        self.resident = Some(handle);
        handle
    }

    /// Reallocates at a new extent, keeping format and level count.
    ///
    /// Residency is dropped; call [`make_resident`](Self::make_resident) again.
    pub fn resize(&mut self, device: &mut dyn RenderDevice, width: u32, height: u32) {
        let old = self.storage();
        if old.width == width && old.height == height {
            return;
        }
        let raw = self.allocate(device, old.levels, old.format, width, height);
        device.destroy_texture(old.raw);
        self.storage = Some(Storage {
            raw,
            width,
            height,
            ..old
        });
        self.resident = None;
        self.handle_changed.emit(&raw);
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> Handle<Texture> {
        self.res_handle()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.params.label
    }

    #[must_use]
    pub fn params(&self) -> &TextureParams {
        &self.params
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.storage.is_some()
    }

    #[must_use]
    pub fn raw(&self) -> Option<RawTexture> {
        self.storage.map(|s| s.raw)
    }

    #[must_use]
    pub fn format(&self) -> Option<TextureFormat> {
        self.storage.map(|s| s.format)
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        self.storage.map_or((0, 0), |s| (s.width, s.height))
    }

    #[must_use]
    pub fn levels(&self) -> u32 {
        self.storage.map_or(0, |s| s.levels)
    }

    /// Extent of one mip level.
    #[must_use]
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        let (w, h) = self.size();
        ((w >> level).max(1), (h >> level).max(1))
    }

    #[must_use]
    pub fn resident_handle(&self) -> Option<u64> {
        self.resident
    }

    #[must_use]
    pub fn handle_changed(&self) -> &Signal<RawTexture> {
        &self.handle_changed
    }
}

impl IdResource for Texture {
    fn res_id(&self) -> u32 {
        self.id
    }
}

impl GpuResource for Texture {
    fn release(self, device: &mut dyn RenderDevice) {
        if let Some(storage) = self.storage {
            device.destroy_texture(storage.raw);
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("label", &self.params.label)
            .field("format", &self.format())
            .field("size", &self.size())
            .field("resident", &self.resident)
            .finish_non_exhaustive()
    }
}
