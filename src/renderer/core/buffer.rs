//! GPU Buffer
//!
//! A growable device memory region with append semantics.
//!
//! # Overview
//!
//! [`GpuBuffer`] tracks a logical `size` inside an allocated `capacity`.
//! [`push_data`](GpuBuffer::push_data) appends at `size`; when the data no
//! longer fits, a new device buffer of `max(required, size * GROWTH_FACTOR)`
//! bytes is allocated, the live bytes are copied over, the old buffer is
//! destroyed and [`handle_changed`](GpuBuffer::handle_changed) fires with the
//! new raw id. The buffer's own [`Handle`] never changes.
//!
//! [`clear_invalidate`](GpuBuffer::clear_invalidate) drops the logical
//! content without touching the allocation, for streams rebuilt every frame.
//!
//! Allocation failure is unrecoverable: it is logged and the process panics.

use bytemuck::Pod;

use crate::renderer::core::handle::{GpuResource, Handle, IdResource, generate_resource_id};
use crate::renderer::core::signal::Signal;
use crate::renderer::device::{BufferFlags, BufferTarget, RawBuffer, RenderDevice};

/// Capacity multiplier applied to the live size on growth.
pub const GROWTH_FACTOR: u64 = 2;

pub struct GpuBuffer {
    id: u32,
    label: String,
    raw: RawBuffer,
    flags: BufferFlags,
    size: u64,
    capacity: u64,
    handle_changed: Signal<RawBuffer>,
}

impl GpuBuffer {
    /// Allocates an empty buffer with room for `capacity` bytes.
    pub fn new(
        device: &mut dyn RenderDevice,
        label: impl Into<String>,
        flags: BufferFlags,
        capacity: u64,
    ) -> Self {
        let label = label.into();
        let raw = allocate(device, &label, capacity, flags);
        log::debug!("Created buffer '{label}' ({capacity} bytes, {flags:?})");
        Self {
            id: generate_resource_id(),
            label,
            raw,
            flags,
            size: 0,
            capacity,
            handle_changed: Signal::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> Handle<GpuBuffer> {
        self.res_handle()
    }

    #[inline]
    #[must_use]
    pub fn raw(&self) -> RawBuffer {
        self.raw
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Fires with the new raw id after every reallocation.
    #[must_use]
    pub fn handle_changed(&self) -> &Signal<RawBuffer> {
        &self.handle_changed
    }

    /// Appends `data` and returns the byte offset it was written at.
    pub fn push_data(&mut self, device: &mut dyn RenderDevice, data: &[u8]) -> u64 {
        let offset = self.size;
        let required = offset + data.len() as u64;
        if required > self.capacity {
            self.grow(device, required);
        }
        if !data.is_empty() {
            device.write_buffer(self.raw, offset, data);
        }
        self.size = required;
        offset
    }

    /// Appends a slice of plain-old-data values. Returns the byte offset.
    pub fn push<T: Pod>(&mut self, device: &mut dyn RenderDevice, items: &[T]) -> u64 {
        self.push_data(device, bytemuck::cast_slice(items))
    }

    /// Ensures `additional` more bytes fit without a reallocation.
    pub fn reserve(&mut self, device: &mut dyn RenderDevice, additional: u64) {
        let required = self.size + additional;
        if required > self.capacity {
            self.grow(device, required);
        }
    }

    /// Discards the logical content. The allocation is kept.
    #[inline]
    pub fn clear_invalidate(&mut self) {
        self.size = 0;
    }

    pub fn bind(&self, device: &mut dyn RenderDevice, target: BufferTarget) {
        device.bind_buffer(target, self.raw);
    }

    pub fn bind_base(&self, device: &mut dyn RenderDevice, target: BufferTarget, index: u32) {
        device.bind_buffer_base(target, index, self.raw);
    }

    /// Reads the logical content back from the device.
    #[must_use]
    pub fn read_back(&self, device: &mut dyn RenderDevice) -> Vec<u8> {
        if self.size == 0 {
            return Vec::new();
        }
        device.read_buffer(self.raw, 0, self.size)
    }

    fn grow(&mut self, device: &mut dyn RenderDevice, required: u64) {
        let new_capacity = required.max(self.size * GROWTH_FACTOR);
        let new_raw = allocate(device, &self.label, new_capacity, self.flags);
        if self.size > 0 {
            device.copy_buffer(self.raw, new_raw, self.size);
        }
        device.destroy_buffer(self.raw);

        log::info!(
            "Buffer '{}' grown: {} -> {} bytes",
            self.label,
            self.capacity,
            new_capacity
        );

        self.raw = new_raw;
        self.capacity = new_capacity;
        self.handle_changed.emit(&new_raw);
    }
}

fn allocate(
    device: &mut dyn RenderDevice,
    label: &str,
    capacity: u64,
    flags: BufferFlags,
) -> RawBuffer {
    match device.create_buffer(label, capacity, flags) {
        Ok(raw) => raw,
        Err(err) => {
            log::error!("Device allocation failed: {err}");
            panic!("unrecoverable device allocation failure: {err}");
        }
    }
}

impl IdResource for GpuBuffer {
    fn res_id(&self) -> u32 {
        self.id
    }
}

impl GpuResource for GpuBuffer {
    fn release(self, device: &mut dyn RenderDevice) {
        device.destroy_buffer(self.raw);
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
