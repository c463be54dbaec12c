//! Indirect Draw Commands
//!
//! One [`DrawElementsIndirect`] per [`IndirectBatch`], with `first_index`,
//! `base_vertex` and `base_instance` taken from running totals over the
//! batches in order. Geometry and instance data must be laid out in the same
//! order for the offsets to line up.

use bytemuck::{Pod, Zeroable};

use crate::renderer::pass::mesh_pass::IndirectBatch;
use crate::scene::MeshId;

/// GPU-side indexed indirect draw record.
///
/// Matches the 20-byte layout consumed by `multi_draw_indexed_indirect`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawElementsIndirect {
    pub count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub base_instance: u32,
}

/// Byte stride between consecutive commands.
pub const COMMAND_STRIDE: u64 = std::mem::size_of::<DrawElementsIndirect>() as u64;

/// Index and vertex counts of one mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeometryCounts {
    pub index_count: u32,
    pub vertex_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndirectCommands {
    pub commands: Vec<DrawElementsIndirect>,
    /// Vertex count of each command's mesh, parallel to `commands`.
    pub vertex_counts: Vec<u32>,
}

impl IndirectCommands {
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.commands)
    }

    /// Total indices drawn across every command and instance.
    #[must_use]
    pub fn total_indices(&self) -> u64 {
        self.commands
            .iter()
            .map(|c| u64::from(c.count) * u64::from(c.instance_count))
            .sum()
    }
}

/// Builds one command per batch.
///
/// `geometry` reports the counts of each batch's mesh.
pub fn build_indirect_commands(
    batches: &[IndirectBatch],
    mut geometry: impl FnMut(MeshId) -> GeometryCounts,
) -> IndirectCommands {
    let mut out = IndirectCommands {
        commands: Vec::with_capacity(batches.len()),
        vertex_counts: Vec::with_capacity(batches.len()),
    };

    let mut index_total = 0u32;
    let mut vertex_total = 0u32;
    let mut instance_total = 0u32;

    for batch in batches {
        let counts = geometry(batch.key.mesh);
        out.commands.push(DrawElementsIndirect {
            count: counts.index_count,
            instance_count: batch.count,
            first_index: index_total,
            base_vertex: vertex_total as i32,
            base_instance: instance_total,
        });
        out.vertex_counts.push(counts.vertex_count);

        index_total += counts.index_count;
        vertex_total += counts.vertex_count;
        instance_total += batch.count;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::core::handle::Handle;
    use crate::renderer::pass::BatchKey;

    fn batch(mesh: u32, batch_id: u32, first: u32, count: u32) -> IndirectBatch {
        IndirectBatch {
            key: BatchKey {
                mesh: MeshId::from_raw(mesh),
                material: Handle::from_raw(1),
            },
            batch_id,
            program: Handle::from_raw(1),
            first,
            count,
        }
    }

    #[test]
    fn command_is_twenty_bytes() {
        assert_eq!(COMMAND_STRIDE, 20);
    }

    #[test]
    fn offsets_are_running_totals() {
        let batches = [batch(1, 0, 0, 2), batch(2, 1, 2, 3), batch(3, 2, 5, 1)];
        let cmds = build_indirect_commands(&batches, |mesh| match mesh.raw() {
            1 => GeometryCounts {
                index_count: 3,
                vertex_count: 3,
            },
            2 => GeometryCounts {
                index_count: 6,
                vertex_count: 4,
            },
            _ => GeometryCounts {
                index_count: 36,
                vertex_count: 24,
            },
        });

        let firsts: Vec<_> = cmds.commands.iter().map(|c| c.first_index).collect();
        let bases: Vec<_> = cmds.commands.iter().map(|c| c.base_vertex).collect();
        let instances: Vec<_> = cmds.commands.iter().map(|c| c.base_instance).collect();
        assert_eq!(firsts, [0, 3, 9]);
        assert_eq!(bases, [0, 3, 7]);
        assert_eq!(instances, [0, 2, 5]);
        assert_eq!(cmds.vertex_counts, [3, 4, 24]);
        assert_eq!(cmds.total_indices(), 3 * 2 + 6 * 3 + 36);
    }

    #[test]
    fn no_batches_no_commands() {
        let cmds = build_indirect_commands(&[], |_| GeometryCounts::default());
        assert!(cmds.is_empty());
        assert!(cmds.as_bytes().is_empty());
    }
}
