use std::sync::Arc;

use glam::Mat4;

use crate::renderer::core::handle::generate_resource_id;
use crate::scene::mesh::Mesh;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// A scene entity: meshes drawn with one model transform.
///
/// Created by the caller and registered once; the renderer keeps its own
/// per-mesh records and never mutates the object.
#[derive(Debug, Clone)]
pub struct Object {
    id: ObjectId,
    label: String,
    meshes: Vec<Arc<Mesh>>,
    transform: Mat4,
}

impl Object {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: ObjectId(generate_resource_id()),
            label: label.into(),
            meshes: Vec::new(),
            transform: Mat4::IDENTITY,
        }
    }

    #[must_use]
    pub fn with_mesh(mut self, mesh: Arc<Mesh>) -> Self {
        self.meshes.push(mesh);
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn meshes(&self) -> &[Arc<Mesh>] {
        &self.meshes
    }

    #[must_use]
    pub fn transform(&self) -> Mat4 {
        self.transform
    }
}
