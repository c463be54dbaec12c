//! Mesh pass batching throughput.
//!
//! Measures a full refresh (drain, flat batches, sort, coalesce) followed by
//! indirect command and instance payload construction, for scenes with many
//! objects spread over a smaller set of `(mesh, material)` pairs.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use slotmap::SlotMap;

use ember::renderer::core::{Handle, ShaderProgram};
use ember::renderer::pass::{
    BatchKey, GeometryCounts, InstanceData, MeshPass, RenderObjectId, build_indirect_commands,
    build_instance_payload,
};
use ember::scene::{MeshId, RenderPass};

const PROGRAMS: u32 = 4;

fn populated_pass(objects: u32, meshes: u32) -> MeshPass {
    let mut ids: SlotMap<RenderObjectId, ()> = SlotMap::with_key();
    let mut pass = MeshPass::new(RenderPass::Forward);
    for i in 0..objects {
        // Scatter keys so the sort has work to do.
        let mesh = i.wrapping_mul(2_654_435_761) % meshes;
        let key = BatchKey {
            mesh: MeshId::from_raw(mesh),
            material: Handle::from_raw(mesh % 16),
        };
        let program: Handle<ShaderProgram> = Handle::from_raw(mesh % PROGRAMS);
        pass.push(ids.insert(()), key, program);
    }
    pass
}

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("MeshPass Refresh");

    for objects in [1_000u32, 10_000, 50_000] {
        group.throughput(Throughput::Elements(u64::from(objects)));
        group.bench_with_input(BenchmarkId::from_parameter(objects), &objects, |b, &n| {
            b.iter_batched(
                || populated_pass(n, 256),
                |mut pass| {
                    pass.refresh();
                    black_box(pass.multi_batches().len())
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_commands(c: &mut Criterion) {
    let mut pass = populated_pass(10_000, 256);
    pass.refresh();

    let mut group = c.benchmark_group("Frame Data");

    group.bench_function("Indirect commands (256 batches)", |b| {
        b.iter(|| {
            let commands = build_indirect_commands(pass.indirect_batches(), |mesh| GeometryCounts {
                index_count: 36 + mesh.raw(),
                vertex_count: 24 + mesh.raw(),
            });
            black_box(commands.total_indices())
        });
    });

    group.bench_function("Instance payload (10k objects)", |b| {
        b.iter(|| {
            let payload = build_instance_payload(&pass, |_| InstanceData::default());
            black_box(payload.instances.len())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_refresh, bench_commands);
criterion_main!(benches);
