//! Scene Data
//!
//! Values the core consumes from its callers: [`Mesh`] geometry, [`Material`]
//! bindings and [`Object`]s grouping meshes under one transform.

pub mod material;
pub mod mesh;
pub mod object;

pub use material::{Material, RenderPass, TextureSlot};
pub use mesh::{Mesh, MeshId, Vertex};
pub use object::{Object, ObjectId};
