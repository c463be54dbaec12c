//! Vertex Layout Objects
//!
//! A [`VertexArray`] maps buffer bindings to shader inputs:
//! - [`configure_binding`](VertexArray::configure_binding) registers a
//!   `(buffer, stride, offset)` binding for a slot,
//! - [`configure_ebo`](VertexArray::configure_ebo) selects the index buffer,
//! - [`configure_attributes`](VertexArray::configure_attributes) describes the
//!   inputs read from those bindings.
//!
//! # Auto offsets
//!
//! When every attribute in a `configure_attributes` call has `offset == 0`,
//! offsets are computed by packing attributes per binding slot in list order,
//! 4 bytes per component. That path only accepts float attributes.
//!
//! # Reallocation
//!
//! Each configured buffer is subscribed to; when it reallocates, the new raw
//! id is queued and applied on the next [`bind`](VertexArray::bind). Only the
//! device buffer changes, the configured stride and offset are kept.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::renderer::core::buffer::GpuBuffer;
use crate::renderer::core::handle::{GpuResource, Handle, IdResource, generate_resource_id};
use crate::renderer::core::signal::Connection;
use crate::renderer::device::{
    AttributeKind, RawBuffer, RawVertexArray, RenderDevice, VertexAttribute,
};

/// A buffer attached to a binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    pub buffer: Handle<GpuBuffer>,
    pub raw: RawBuffer,
    pub stride: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Source {
    Binding(u32),
    Index,
}

pub struct VertexArray {
    id: u32,
    label: String,
    raw: RawVertexArray,
    bindings: BTreeMap<u32, VertexBinding>,
    attributes: Vec<VertexAttribute>,
    index_buffer: Option<(Handle<GpuBuffer>, RawBuffer)>,
    connections: FxHashMap<Source, Connection>,
    rebind_tx: flume::Sender<(Source, RawBuffer)>,
    rebind_rx: flume::Receiver<(Source, RawBuffer)>,
}

impl VertexArray {
    pub fn new(device: &mut dyn RenderDevice, label: impl Into<String>) -> Self {
        let label = label.into();
        let (rebind_tx, rebind_rx) = flume::unbounded();
        Self {
            id: generate_resource_id(),
            raw: device.create_vertex_array(&label),
            label,
            bindings: BTreeMap::new(),
            attributes: Vec::new(),
            index_buffer: None,
            connections: FxHashMap::default(),
            rebind_tx,
            rebind_rx,
        }
    }

    fn subscribe(&mut self, source: Source, buffer: &GpuBuffer) {
        if let Some(mut old) = self.connections.remove(&source) {
            old.disconnect();
        }
        let tx = self.rebind_tx.clone();
        let connection = buffer.handle_changed().connect(move |raw| {
            let _ = tx.send((source, *raw));
        });
        self.connections.insert(source, connection);
    }

    /// Attaches `buffer` to binding `slot`.
    pub fn configure_binding(
        &mut self,
        device: &mut dyn RenderDevice,
        slot: u32,
        buffer: &GpuBuffer,
        stride: u32,
        offset: u64,
    ) {
        let binding = VertexBinding {
            buffer: buffer.handle(),
            raw: buffer.raw(),
            stride,
            offset,
        };
        device.vertex_array_binding(self.raw, slot, binding.raw, offset, stride);
        self.bindings.insert(slot, binding);
        self.subscribe(Source::Binding(slot), buffer);
    }

    /// Selects the index buffer.
    pub fn configure_ebo(&mut self, device: &mut dyn RenderDevice, buffer: &GpuBuffer) {
        device.vertex_array_index_buffer(self.raw, buffer.raw());
        self.index_buffer = Some((buffer.handle(), buffer.raw()));
        self.subscribe(Source::Index, buffer);
    }

    /// Registers attribute descriptors, computing offsets if none were given.
    ///
    /// # Panics
    ///
    /// Panics if an attribute names an unconfigured binding, has an
    /// unsupported component count, or is non-float on the auto-offset path.
    pub fn configure_attributes(
        &mut self,
        device: &mut dyn RenderDevice,
        attributes: &[VertexAttribute],
    ) {
        let auto_offsets = attributes.iter().all(|a| a.offset == 0);
        let mut cursors: BTreeMap<u32, u32> = BTreeMap::new();

        for attribute in attributes {
            assert!(
                self.bindings.contains_key(&attribute.binding),
                "vertex array '{}': attribute {} uses unconfigured binding {}",
                self.label,
                attribute.location,
                attribute.binding
            );
            if !(1..=4).contains(&attribute.components) {
                log::error!(
                    "Unsupported vertex attribute format: {} x {:?}",
                    attribute.components,
                    attribute.kind
                );
                panic!(
                    "unsupported vertex attribute format at location {}",
                    attribute.location
                );
            }

            let mut resolved = *attribute;
            if auto_offsets {
                assert!(
                    attribute.kind == AttributeKind::Float32,
                    "automatic offsets require float attributes (location {})",
                    attribute.location
                );
                let cursor = cursors.entry(attribute.binding).or_insert(0);
                resolved.offset = *cursor;
                *cursor += attribute.byte_size();
            }

            device.vertex_array_attribute(self.raw, &resolved);
            match self
                .attributes
                .iter_mut()
                .find(|a| a.location == resolved.location)
            {
                Some(existing) => *existing = resolved,
                None => self.attributes.push(resolved),
            }
        }
    }

    /// Applies pending buffer reallocations.
    ///
    /// A buffer may grow several times between binds; only its latest raw id
    /// is still alive, so notifications are coalesced per source first.
    pub fn sync(&mut self, device: &mut dyn RenderDevice) {
        let latest: FxHashMap<Source, RawBuffer> = self.rebind_rx.try_iter().collect();
        for (source, raw) in latest {
            match source {
                Source::Binding(slot) => {
                    if let Some(binding) = self.bindings.get_mut(&slot) {
                        binding.raw = raw;
                        device.vertex_array_binding(
                            self.raw,
                            slot,
                            raw,
                            binding.offset,
                            binding.stride,
                        );
                    }
                }
                Source::Index => {
                    if let Some((_, current)) = self.index_buffer.as_mut() {
                        *current = raw;
                        device.vertex_array_index_buffer(self.raw, raw);
                    }
                }
            }
        }
    }

    pub fn bind(&mut self, device: &mut dyn RenderDevice) {
        self.sync(device);
        device.bind_vertex_array(self.raw);
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> Handle<VertexArray> {
        self.res_handle()
    }

    #[must_use]
    pub fn raw(&self) -> RawVertexArray {
        self.raw
    }

    #[must_use]
    pub fn binding(&self, slot: u32) -> Option<&VertexBinding> {
        self.bindings.get(&slot)
    }

    #[must_use]
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    #[must_use]
    pub fn index_buffer(&self) -> Option<Handle<GpuBuffer>> {
        self.index_buffer.map(|(handle, _)| handle)
    }
}

impl IdResource for VertexArray {
    fn res_id(&self) -> u32 {
        self.id
    }
}

impl GpuResource for VertexArray {
    fn release(mut self, device: &mut dyn RenderDevice) {
        for connection in self.connections.values_mut() {
            connection.disconnect();
        }
        device.destroy_vertex_array(self.raw);
    }
}

impl std::fmt::Debug for VertexArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexArray")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("bindings", &self.bindings)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}
