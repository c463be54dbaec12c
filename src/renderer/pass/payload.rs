//! Instance Payload
//!
//! Per-instance data read by the forward shader through
//! `instances[instance_index]`. The slot of each pass object is
//! `base_instance` of its batch plus its rank among that batch's objects, so
//! the payload lines up with the commands from
//! [`build_indirect_commands`](super::indirect::build_indirect_commands)
//! without depending on the sorted flat batches.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::renderer::pass::mesh_pass::{MeshPass, PassObject};
use crate::scene::TextureSlot;

/// One instance as the forward shader sees it.
///
/// WGSL mirror:
///
/// ```wgsl
/// struct Instance {
///     model: mat4x4<f32>,
///     textures: array<vec2<u32>, 5>,
///     _pad: vec2<u32>,
/// };
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub model: [f32; 16],
    /// Bindless handles per [`TextureSlot`]; `0` means unbound.
    pub textures: [u64; TextureSlot::COUNT],
    pub _pad: [u32; 2],
}

impl InstanceData {
    #[must_use]
    pub fn new(model: Mat4, textures: [u64; TextureSlot::COUNT]) -> Self {
        Self {
            model: model.to_cols_array(),
            textures,
            _pad: [0; 2],
        }
    }
}

impl Default for InstanceData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, [0; TextureSlot::COUNT])
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstancePayload {
    /// Instances in slot order.
    pub instances: Vec<InstanceData>,
    /// Slot of each pass object, parallel to [`MeshPass::pass_objects`].
    pub slots: Vec<u32>,
}

impl InstancePayload {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.instances)
    }
}

/// Lays out one [`InstanceData`] per pass object.
///
/// Batch offsets are prefix sums of per-batch object counts in batch-id
/// order. Objects of the same batch keep their pass order.
pub fn build_instance_payload(
    pass: &MeshPass,
    mut instance: impl FnMut(&PassObject) -> InstanceData,
) -> InstancePayload {
    let objects = pass.pass_objects();

    let batch_of: Vec<Option<u32>> = objects
        .iter()
        .map(|object| pass.find_batch_id(object.key))
        .collect();

    let mut offsets = vec![0u32; pass.batch_count()];
    for batch_id in batch_of.iter().flatten() {
        offsets[*batch_id as usize] += 1;
    }
    let mut running = 0u32;
    for offset in &mut offsets {
        let count = *offset;
        *offset = running;
        running += count;
    }

    let mut payload = InstancePayload {
        instances: vec![InstanceData::default(); running as usize],
        slots: Vec::with_capacity(objects.len()),
    };
    for (object, batch_id) in objects.iter().zip(&batch_of) {
        let Some(batch_id) = batch_id else {
            log::warn!("pass object {:?} has no batch id; skipped", object.object);
            payload.slots.push(u32::MAX);
            continue;
        };
        let cursor = &mut offsets[*batch_id as usize];
        payload.instances[*cursor as usize] = instance(object);
        payload.slots.push(*cursor);
        *cursor += 1;
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_is_112_bytes() {
        assert_eq!(std::mem::size_of::<InstanceData>(), 112);
    }

    #[test]
    fn default_is_identity_without_textures() {
        let data = InstanceData::default();
        assert_eq!(data.model, Mat4::IDENTITY.to_cols_array());
        assert_eq!(data.textures, [0; TextureSlot::COUNT]);
    }
}
