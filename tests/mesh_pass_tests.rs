//! Mesh Pass Batching Tests
//!
//! Tests for:
//! - Batch ids: discovery-order assignment, stability across refreshes
//! - Refresh: append-only pass objects, stable sort, contiguous batches
//! - Multi batches: split on program change, coverage of every batch
//! - Indirect commands: running first_index / base_vertex / base_instance
//! - Instance payload: slots line up with base_instance ranges

use glam::Mat4;
use slotmap::SlotMap;

use ember::prelude::*;
use ember::renderer::pass::{
    BatchKey, GeometryCounts, InstanceData, MeshPass, RenderObjectId, build_indirect_commands,
    build_instance_payload,
};

fn key(mesh: u32, material: u32) -> BatchKey {
    BatchKey {
        mesh: MeshId::from_raw(mesh),
        material: Handle::from_raw(material),
    }
}

fn program(id: u32) -> Handle<ShaderProgram> {
    Handle::from_raw(id)
}

/// Pass with one fresh object id per `(key, program)` entry.
fn pass_with(entries: &[(BatchKey, Handle<ShaderProgram>)]) -> (MeshPass, Vec<RenderObjectId>) {
    let mut ids: SlotMap<RenderObjectId, ()> = SlotMap::with_key();
    let mut pass = MeshPass::new(RenderPass::Forward);
    let mut objects = Vec::new();
    for (key, program) in entries {
        let id = ids.insert(());
        pass.push(id, *key, *program);
        objects.push(id);
    }
    (pass, objects)
}

/// Counts for mesh `n`: `n + 2` vertices and `3 * n` indices.
fn counts(mesh: MeshId) -> GeometryCounts {
    GeometryCounts {
        index_count: 3 * mesh.raw(),
        vertex_count: mesh.raw() + 2,
    }
}

// ============================================================================
// Batch Id Tests
// ============================================================================

#[test]
fn batch_ids_follow_discovery_order() {
    let mut pass = MeshPass::new(RenderPass::Forward);
    let m = Handle::from_raw(1);

    assert_eq!(pass.get_batch_id(MeshId::from_raw(9), m), 0);
    assert_eq!(pass.get_batch_id(MeshId::from_raw(3), m), 1);
    assert_eq!(pass.get_batch_id(MeshId::from_raw(9), m), 0);
    assert_eq!(pass.batch_count(), 2);
    assert_eq!(pass.batch_key(1), Some(key(3, 1)));
    assert_eq!(pass.find_batch_id(key(7, 1)), None);
}

#[test]
fn same_mesh_with_different_material_is_a_new_batch() {
    let mut pass = MeshPass::new(RenderPass::Forward);
    let a = pass.get_batch_id(MeshId::from_raw(1), Handle::from_raw(1));
    let b = pass.get_batch_id(MeshId::from_raw(1), Handle::from_raw(2));
    assert_ne!(a, b);
}

#[test]
fn batch_ids_survive_later_refreshes() {
    let (mut pass, _) = pass_with(&[(key(5, 1), program(1)), (key(6, 1), program(1))]);
    pass.refresh();
    let before = pass.find_batch_id(key(6, 1));

    let mut ids: SlotMap<RenderObjectId, ()> = SlotMap::with_key();
    pass.push(ids.insert(()), key(4, 1), program(1));
    pass.push(ids.insert(()), key(5, 1), program(1));
    pass.refresh();

    assert_eq!(pass.find_batch_id(key(6, 1)), before);
    assert_eq!(pass.find_batch_id(key(4, 1)), Some(2));
}

// ============================================================================
// Refresh Tests
// ============================================================================

#[test]
fn empty_pass_refreshes_to_nothing() {
    let mut pass = MeshPass::new(RenderPass::Forward);

    assert!(!pass.refresh());
    assert!(pass.pass_objects().is_empty());
    assert!(pass.indirect_batches().is_empty());
    assert!(pass.multi_batches().is_empty());
}

#[test]
fn refresh_is_a_no_op_without_new_objects() {
    let (mut pass, _) = pass_with(&[(key(1, 1), program(1))]);
    assert!(pass.has_unbatched());
    assert!(pass.refresh());
    assert!(!pass.has_unbatched());
    assert!(!pass.refresh());
    assert_eq!(pass.pass_objects().len(), 1);
}

#[test]
fn equal_keys_coalesce_into_one_batch() {
    let (mut pass, objects) = pass_with(&[
        (key(1, 1), program(1)),
        (key(2, 1), program(1)),
        (key(1, 1), program(1)),
        (key(1, 1), program(1)),
    ]);
    pass.refresh();

    let batches = pass.indirect_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!((batches[0].key, batches[0].first, batches[0].count), (key(1, 1), 0, 3));
    assert_eq!((batches[1].key, batches[1].first, batches[1].count), (key(2, 1), 3, 1));

    // The sort is stable: objects of one batch keep their push order.
    let order: Vec<RenderObjectId> = pass
        .flat_batches()
        .iter()
        .map(|f| pass.pass_objects()[f.object_index as usize].object)
        .collect();
    assert_eq!(order, [objects[0], objects[2], objects[3], objects[1]]);
}

#[test]
fn flat_batches_are_sorted_and_contiguous() {
    let (mut pass, _) = pass_with(&[
        (key(3, 1), program(1)),
        (key(1, 1), program(1)),
        (key(2, 1), program(1)),
        (key(1, 1), program(1)),
        (key(3, 1), program(1)),
    ]);
    pass.refresh();

    let ids: Vec<u32> = pass.flat_batches().iter().map(|f| f.batch_id).collect();
    assert_eq!(ids, [0, 0, 1, 1, 2]);
    let mut covered = 0;
    for batch in pass.indirect_batches() {
        assert_eq!(batch.first, covered);
        covered += batch.count;
    }
    assert_eq!(covered as usize, pass.pass_objects().len());
}

// ============================================================================
// Multi Batch Tests
// ============================================================================

#[test]
fn one_program_gives_one_multi_batch() {
    let (mut pass, _) = pass_with(&[(key(1, 1), program(7)), (key(2, 1), program(7))]);
    pass.refresh();

    let multi = pass.multi_batches();
    assert_eq!(multi.len(), 1);
    assert_eq!(pass.batches_of(&multi[0]).len(), 2);
}

#[test]
fn program_change_splits_multi_batches() {
    let (mut pass, _) = pass_with(&[
        (key(1, 1), program(1)),
        (key(2, 2), program(2)),
        (key(3, 2), program(2)),
        (key(4, 1), program(1)),
    ]);
    pass.refresh();

    let multi = pass.multi_batches();
    let spans: Vec<(u32, u32, u32)> = multi
        .iter()
        .map(|m| (m.program.id(), m.first, m.count))
        .collect();
    assert_eq!(spans, [(1, 0, 1), (2, 1, 2), (1, 3, 1)]);
    for m in multi {
        assert!(pass.batches_of(m).iter().all(|b| b.program == m.program));
    }
}

// ============================================================================
// Indirect Command Tests
// ============================================================================

#[test]
fn commands_use_running_totals() {
    let (mut pass, _) = pass_with(&[
        (key(1, 1), program(1)),
        (key(2, 1), program(1)),
        (key(1, 1), program(1)),
        (key(4, 1), program(1)),
    ]);
    pass.refresh();

    let commands = build_indirect_commands(pass.indirect_batches(), counts);

    let rows: Vec<(u32, u32, u32, i32, u32)> = commands
        .commands
        .iter()
        .map(|c| (c.count, c.instance_count, c.first_index, c.base_vertex, c.base_instance))
        .collect();
    assert_eq!(
        rows,
        [(3, 2, 0, 0, 0), (6, 1, 3, 3, 2), (12, 1, 9, 7, 3)]
    );
    assert_eq!(commands.vertex_counts, [3, 4, 6]);
    assert_eq!(commands.total_indices(), 3 * 2 + 6 + 12);
    assert_eq!(commands.as_bytes().len(), 3 * 20);
}

#[test]
fn no_batches_give_no_commands() {
    let commands = build_indirect_commands(&[], counts);
    assert!(commands.is_empty());
    assert_eq!(commands.total_indices(), 0);
}

// ============================================================================
// Instance Payload Tests
// ============================================================================

#[test]
fn payload_slots_fall_inside_their_batch_range() {
    let (mut pass, _) = pass_with(&[
        (key(2, 1), program(1)),
        (key(1, 1), program(1)),
        (key(2, 1), program(1)),
        (key(1, 1), program(1)),
        (key(3, 1), program(1)),
    ]);
    pass.refresh();
    let commands = build_indirect_commands(pass.indirect_batches(), counts);

    let payload = build_instance_payload(&pass, |object| {
        InstanceData::new(
            Mat4::from_translation(glam::Vec3::splat(object.key.mesh.raw() as f32)),
            [0; TextureSlot::COUNT],
        )
    });

    assert_eq!(payload.instances.len(), 5);
    assert_eq!(payload.slots, [0, 2, 1, 3, 4]);
    for (object, slot) in pass.pass_objects().iter().zip(&payload.slots) {
        let batch = pass.find_batch_id(object.key).unwrap() as usize;
        let command = commands.commands[batch];
        assert!(*slot >= command.base_instance);
        assert!(*slot < command.base_instance + command.instance_count);
        let model = Mat4::from_cols_array(&payload.instances[*slot as usize].model);
        assert_eq!(model.w_axis.x, object.key.mesh.raw() as f32);
    }
}

#[test]
fn instance_data_is_gpu_sized() {
    assert_eq!(std::mem::size_of::<InstanceData>(), 112);
    let data = InstanceData::default();
    assert_eq!(data.textures, [0; TextureSlot::COUNT]);
    assert_eq!(data.model, Mat4::IDENTITY.to_cols_array());
}
