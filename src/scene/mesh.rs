//! Meshes
//!
//! A [`Mesh`] is immutable geometry handed to the core by an importer:
//! interleaved [`Vertex`] data, a `u32` index list and the material it is
//! drawn with. Its [`MeshId`] is its identity; clones share it, so
//! registering a clone of an already-known mesh is a no-op.

use bytemuck::{Pod, Zeroable};

use crate::renderer::core::handle::{Handle, generate_resource_id};
use crate::renderer::device::VertexAttribute;
use crate::scene::material::Material;

/// Interleaved vertex: position, normal, texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    /// Floats per vertex.
    pub const FLOATS: usize = 8;
    /// Bytes per vertex.
    pub const STRIDE: u32 = (Self::FLOATS * 4) as u32;

    #[must_use]
    pub const fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    /// Shader inputs for binding `slot`, with offsets left to auto-packing.
    #[must_use]
    pub const fn attributes(slot: u32) -> [VertexAttribute; 3] {
        [
            VertexAttribute::float(0, slot, 3),
            VertexAttribute::float(1, slot, 3),
            VertexAttribute::float(2, slot, 2),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u32);

impl MeshId {
    /// Rebuilds an id from [`raw`](Self::raw), for driving a
    /// [`MeshPass`](crate::renderer::pass::MeshPass) without `Mesh` values.
    /// Meshes themselves only get ids from [`Mesh::new`].
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    id: MeshId,
    label: String,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    material: Handle<Material>,
}

impl Mesh {
    /// # Panics
    ///
    /// Panics if an index does not address a vertex.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        vertices: Vec<Vertex>,
        indices: Vec<u32>,
        material: Handle<Material>,
    ) -> Self {
        let label = label.into();
        assert!(
            indices.iter().all(|&i| (i as usize) < vertices.len()),
            "mesh '{label}' has out-of-range indices"
        );
        Self {
            id: MeshId(generate_resource_id()),
            label,
            vertices,
            indices,
            material,
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> MeshId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    #[must_use]
    pub fn material(&self) -> Handle<Material> {
        self.material
    }

    #[must_use]
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    #[must_use]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Number of floats the vertex data occupies.
    #[must_use]
    pub fn vertex_floats(&self) -> usize {
        self.vertices.len() * Vertex::FLOATS
    }
}
