//! Renderer
//!
//! Owns the device, every GPU object and the forward [`MeshPass`], and drives
//! one frame at a time.
//!
//! # Frame
//!
//! ```text
//! Idle ─▶ FlushDirtyGeometry ─▶ RefreshBatches ─▶ BuildIndirectCommands
//!      ─▶ BindAndDraw (per multi batch) ─▶ Bloom ─▶ Composite ─▶ Present
//! ```
//!
//! Stages run in this order on the calling thread. The first two only do
//! work when objects were registered since the last frame.
//!
//! # Buffers
//!
//! | Buffer   | Content                                      | Refill           |
//! |----------|----------------------------------------------|------------------|
//! | vertices | [`Vertex`] data per batch, in batch-id order | append on flush  |
//! | indices  | `u32` mesh-local indices, same order         | append on flush  |
//! | indirect | one [`DrawElementsIndirect`] per batch       | every frame      |
//! | payload  | one [`InstanceData`] per pass object         | when dirty       |
//!
//! Framebuffers live in their own [`ResourceStore`] so a framebuffer can be
//! bound while the texture store is borrowed.

pub mod core;
pub mod device;
pub mod pass;
pub mod post;
pub mod settings;

pub use settings::{BloomSettings, PowerPreference, RendererSettings};

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Mat4;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::errors::Result;
use crate::renderer::core::{
    GpuBuffer, GpuResource, Handle, ResourceStore, ShaderProgram, Texture, TextureParams,
    VertexArray,
};
use crate::renderer::device::{
    BlendMode, BufferFlags, BufferTarget, MemoryBarrier, RenderDevice, TextureFormat,
};
use crate::renderer::pass::{
    BatchKey, COMMAND_STRIDE, DrawElementsIndirect, GeometryCounts, IndirectCommands,
    InstanceData, MeshPass, RenderObject, RenderObjectId, build_indirect_commands,
    build_instance_payload,
};
use crate::renderer::post::{BloomPass, CompositePass, SceneTarget};
use crate::scene::{Material, Mesh, MeshId, Object, ObjectId, RenderPass, TextureSlot, Vertex};

/// Geometry binding slot of the forward vertex array.
const GEOMETRY_SLOT: u32 = 0;
/// Storage binding index of the instance payload.
pub const PAYLOAD_BINDING: u32 = 0;

/// What one [`Renderer::render`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frame: u64,
    pub objects: usize,
    pub indirect_batches: usize,
    pub multi_batches: usize,
    pub draw_calls: u32,
    pub indices: u64,
    pub cpu_time: Duration,
}

impl FrameStats {
    #[must_use]
    pub fn triangles(&self) -> u64 {
        self.indices / 3
    }
}

pub struct Renderer<D: RenderDevice> {
    device: D,
    settings: RendererSettings,

    resources: ResourceStore,
    targets: ResourceStore,

    // === Scene geometry ===
    vertices: GpuBuffer,
    indices: GpuBuffer,
    indirect: GpuBuffer,
    payload: GpuBuffer,
    geometry_vao: VertexArray,

    meshes: FxHashMap<MeshId, Arc<Mesh>>,
    objects: FxHashMap<ObjectId, SmallVec<[RenderObjectId; 4]>>,
    render_objects: SlotMap<RenderObjectId, RenderObject>,
    forward: MeshPass,

    /// Batch ids below this have their geometry uploaded.
    flushed_batches: u32,
    geometry_dirty: bool,
    payload_dirty: bool,
    payload_slots: Vec<u32>,
    last_commands: IndirectCommands,

    // === Frame ===
    view_projection: Mat4,
    scene: SceneTarget,
    bloom: BloomPass,
    composite: CompositePass,
    frame: u64,
}

impl<D: RenderDevice> Renderer<D> {
    /// Creates the scene buffers, render targets and post-process programs.
    ///
    /// Fails if a post-process program cannot be found or compiled.
    pub fn new(mut device: D, settings: RendererSettings) -> Result<Self> {
        log::info!(
            "Initializing renderer on {} backend ({}x{})",
            device.backend_name(),
            device.default_target_size().0,
            device.default_target_size().1
        );
        let mut resources = ResourceStore::new();
        let mut targets = ResourceStore::new();
        let dev: &mut dyn RenderDevice = &mut device;

        let vertices = GpuBuffer::new(
            dev,
            "Geometry Vertices",
            BufferFlags::VERTEX,
            settings.geometry_capacity,
        );
        let indices = GpuBuffer::new(
            dev,
            "Geometry Indices",
            BufferFlags::INDEX,
            settings.index_capacity,
        );
        let indirect = GpuBuffer::new(
            dev,
            "Indirect Commands",
            BufferFlags::INDIRECT,
            settings.indirect_capacity,
        );
        let payload = GpuBuffer::new(
            dev,
            "Instance Payload",
            BufferFlags::STORAGE,
            settings.payload_capacity,
        );

        let mut geometry_vao = VertexArray::new(dev, "Geometry");
        geometry_vao.configure_binding(dev, GEOMETRY_SLOT, &vertices, Vertex::STRIDE, 0);
        geometry_vao.configure_ebo(dev, &indices);
        geometry_vao.configure_attributes(dev, &Vertex::attributes(GEOMETRY_SLOT));

        let load = |dev: &mut dyn RenderDevice, resources: &mut ResourceStore, name: &str| {
            ShaderProgram::from_name(dev, &settings.shader_dir, name)
                .map(|program| resources.create_resource(program).handle())
        };
        let downsample = load(dev, &mut resources, "bloom_downsample")?;
        let upsample = load(dev, &mut resources, "bloom_upsample")?;
        let composite = load(dev, &mut resources, "composite")?;

        let size = dev.default_target_size();
        let scene = SceneTarget::new(dev, &mut resources, &mut targets, size);
        let bloom = BloomPass::new(
            dev,
            &mut resources,
            &mut targets,
            downsample,
            upsample,
            &settings.bloom,
            size,
        );

        Ok(Self {
            device,
            settings,
            resources,
            targets,
            vertices,
            indices,
            indirect,
            payload,
            geometry_vao,
            meshes: FxHashMap::default(),
            objects: FxHashMap::default(),
            render_objects: SlotMap::with_key(),
            forward: MeshPass::new(RenderPass::Forward),
            flushed_batches: 0,
            geometry_dirty: false,
            payload_dirty: false,
            payload_slots: Vec::new(),
            last_commands: IndirectCommands::default(),
            view_projection: Mat4::IDENTITY,
            scene,
            bloom,
            composite: CompositePass::new(composite),
            frame: 0,
        })
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Loads `<shader_dir>/<name>.*.wgsl` as a program.
    pub fn load_program(&mut self, name: &str) -> Result<Handle<ShaderProgram>> {
        let program = ShaderProgram::from_name(&mut self.device, &self.settings.shader_dir, name)?;
        Ok(self.resources.create_resource(program).handle())
    }

    /// Creates a single-level 2D texture, optionally uploading `pixels`.
    pub fn add_texture(
        &mut self,
        params: TextureParams,
        format: TextureFormat,
        width: u32,
        height: u32,
        pixels: Option<&[u8]>,
    ) -> Handle<Texture> {
        let texture = Texture::new_2d(&mut self.device, params, 1, format, width, height);
        if let Some(pixels) = pixels {
            texture.upload(&mut self.device, 0, pixels);
        }
        self.resources.create_resource(texture).handle()
    }

    pub fn add_material(&mut self, material: Material) -> Handle<Material> {
        self.resources.create_resource(material).handle()
    }

    // ========================================================================
    // Scene
    // ========================================================================

    /// Registers every mesh of `object` for drawing.
    ///
    /// Registering the same object twice returns the ids from the first call.
    /// Meshes whose material is unknown or has no forward program are skipped.
    /// An object with no drawable mesh is not remembered, so it can be
    /// registered again once its material gains a forward program.
    pub fn register_object(&mut self, object: &Object) -> SmallVec<[RenderObjectId; 4]> {
        if let Some(ids) = self.objects.get(&object.id()) {
            return ids.clone();
        }

        let mut ids = SmallVec::new();
        for mesh in object.meshes() {
            let material_handle = mesh.material();
            let Some(material) = self.resources.try_get_resource(material_handle) else {
                log::warn!(
                    "Mesh '{}' of '{}' references an unknown material; skipped",
                    mesh.label(),
                    object.label()
                );
                continue;
            };
            let Some(program) = material.program(RenderPass::Forward) else {
                log::warn!(
                    "Material '{}' has no forward program; mesh '{}' skipped",
                    material.label(),
                    mesh.label()
                );
                continue;
            };

            self.meshes
                .entry(mesh.id())
                .or_insert_with(|| Arc::clone(mesh));

            let id = self.render_objects.insert(RenderObject {
                object: object.id(),
                mesh: mesh.id(),
                material: material_handle,
                transform: object.transform(),
            });
            self.forward.push(
                id,
                BatchKey {
                    mesh: mesh.id(),
                    material: material_handle,
                },
                program,
            );
            ids.push(id);
        }

        if ids.is_empty() {
            log::warn!("Object '{}' has no drawable meshes", object.label());
            return ids;
        }
        self.geometry_dirty = true;
        self.payload_dirty = true;
        log::debug!(
            "Registered '{}' as {} render objects",
            object.label(),
            ids.len()
        );
        self.objects.insert(object.id(), ids.clone());
        ids
    }

    /// Replaces the model transform of every render object of `object`.
    ///
    /// Returns `false` if the object was never registered.
    pub fn update_transform(&mut self, object: ObjectId, transform: Mat4) -> bool {
        let Some(ids) = self.objects.get(&object) else {
            return false;
        };
        for id in ids {
            if let Some(render_object) = self.render_objects.get_mut(*id) {
                render_object.transform = transform;
            }
        }
        self.payload_dirty = true;
        true
    }

    pub fn set_view_projection(&mut self, view_projection: Mat4) {
        self.view_projection = view_projection;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        let size = (width.max(1), height.max(1));
        self.device.resize_default_target(size.0, size.1);
        self.scene.resize(&mut self.device, &mut self.resources, size);
        self.bloom.resize(
            &mut self.device,
            &mut self.resources,
            &mut self.targets,
            &self.settings.bloom,
            size,
        );
        log::debug!("Renderer resized to {}x{}", size.0, size.1);
    }

    /// Recompiles every program from disk. Returns how many succeeded.
    pub fn reload_shaders(&mut self) -> usize {
        let handles: Vec<Handle<ShaderProgram>> = self
            .resources
            .iter::<ShaderProgram>()
            .map(ShaderProgram::handle)
            .collect();
        let reloaded = handles
            .into_iter()
            .filter(|handle| {
                self.resources
                    .get_resource_mut(*handle)
                    .recompile(&mut self.device)
            })
            .count();
        log::info!("Reloaded {reloaded} shader programs");
        reloaded
    }

    // ========================================================================
    // Frame
    // ========================================================================

    pub fn render(&mut self) -> FrameStats {
        let start = Instant::now();

        if self.geometry_dirty {
            self.flush_dirty_geometry();
        }
        if self.forward.refresh() {
            self.payload_dirty = true;
        }
        if self.payload_dirty {
            self.upload_payload();
        }
        self.build_indirect_commands();
        let draw_calls = self.draw_scene();

        let scene_color = self.scene.color;
        let bloom = self.bloom.run(
            &mut self.device,
            &mut self.resources,
            &mut self.targets,
            scene_color,
            &self.settings.bloom,
        );
        self.composite.run(
            &mut self.device,
            &mut self.resources,
            scene_color,
            bloom,
            self.settings.exposure,
            self.settings.bloom.strength,
        );
        self.device.present();

        self.frame += 1;
        FrameStats {
            frame: self.frame,
            objects: self.forward.pass_objects().len(),
            indirect_batches: self.forward.indirect_batches().len(),
            multi_batches: self.forward.multi_batches().len(),
            draw_calls,
            indices: self.last_commands.total_indices(),
            cpu_time: start.elapsed(),
        }
    }

    /// Appends geometry for every batch id discovered since the last flush.
    fn flush_dirty_geometry(&mut self) {
        let keys: Vec<BatchKey> = self.forward.unbatched_keys().collect();
        for key in keys {
            self.forward.get_batch_id(key.mesh, key.material);
        }

        let end = self.forward.batch_count() as u32;
        for batch_id in self.flushed_batches..end {
            let Some(key) = self.forward.batch_key(batch_id) else {
                continue;
            };
            let Some(mesh) = self.meshes.get(&key.mesh) else {
                continue;
            };
            self.vertices.push(&mut self.device, mesh.vertices());
            self.indices.push(&mut self.device, mesh.indices());
        }
        log::debug!(
            "Flushed geometry for batches {}..{end}: {} vertex bytes, {} index bytes",
            self.flushed_batches,
            self.vertices.size(),
            self.indices.size()
        );
        self.flushed_batches = end;
        self.geometry_dirty = false;
    }

    fn upload_payload(&mut self) {
        let render_objects = &self.render_objects;
        let resources = &mut self.resources;
        let device = &mut self.device;
        let payload = build_instance_payload(&self.forward, |pass_object| {
            let Some(render_object) = render_objects.get(pass_object.object) else {
                return InstanceData::default();
            };
            let slots = *resources.get_resource(render_object.material).textures();
            let mut handles = [0u64; TextureSlot::COUNT];
            for (handle, slot) in handles.iter_mut().zip(slots) {
                if let Some(texture) = slot {
                    *handle = resources.get_resource_mut(texture).make_resident(device);
                }
            }
            InstanceData::new(render_object.transform, handles)
        });

        self.payload.clear_invalidate();
        self.payload.push(&mut self.device, &payload.instances);
        self.payload_slots = payload.slots;
        self.payload_dirty = false;
    }

    fn build_indirect_commands(&mut self) {
        let meshes = &self.meshes;
        self.last_commands = build_indirect_commands(self.forward.indirect_batches(), |mesh| {
            meshes
                .get(&mesh)
                .map_or_else(GeometryCounts::default, |mesh| GeometryCounts {
                    index_count: mesh.index_count(),
                    vertex_count: mesh.vertex_count(),
                })
        });

        self.indirect.clear_invalidate();
        self.indirect
            .push::<DrawElementsIndirect>(&mut self.device, &self.last_commands.commands);
    }

    /// Returns the number of multi-draw calls issued.
    fn draw_scene(&mut self) -> u32 {
        self.scene
            .bind(&mut self.device, &self.resources, &mut self.targets);
        self.device.set_depth_test(true);
        self.device.set_blend(BlendMode::Replace);
        self.device
            .clear(Some(self.settings.clear_color), Some(1.0));

        if self.last_commands.is_empty() {
            return 0;
        }

        self.geometry_vao.bind(&mut self.device);
        self.indirect.bind(&mut self.device, BufferTarget::DrawIndirect);
        self.payload
            .bind_base(&mut self.device, BufferTarget::ShaderStorage, PAYLOAD_BINDING);
        self.device
            .memory_barrier(MemoryBarrier::COMMAND | MemoryBarrier::SHADER_STORAGE);

        let mut draw_calls = 0;
        for multi in self.forward.multi_batches() {
            let program = self.resources.get_resource_mut(multi.program);
            program.set(&mut self.device, "view_proj", self.view_projection);
            program.use_program(&mut self.device);
            self.device.multi_draw_elements_indirect(
                u64::from(multi.first) * COMMAND_STRIDE,
                multi.count,
            );
            draw_calls += 1;
        }
        draw_calls
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[must_use]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceStore {
        &mut self.resources
    }

    #[must_use]
    pub fn targets(&self) -> &ResourceStore {
        &self.targets
    }

    #[must_use]
    pub fn mesh_pass(&self) -> &MeshPass {
        &self.forward
    }

    #[must_use]
    pub fn render_object(&self, id: RenderObjectId) -> Option<&RenderObject> {
        self.render_objects.get(id)
    }

    /// Commands written to the indirect buffer by the last frame.
    #[must_use]
    pub fn last_commands(&self) -> &IndirectCommands {
        &self.last_commands
    }

    /// Payload slot of each pass object, parallel to
    /// [`MeshPass::pass_objects`].
    #[must_use]
    pub fn payload_slots(&self) -> &[u32] {
        &self.payload_slots
    }

    #[must_use]
    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertices
    }

    #[must_use]
    pub fn index_buffer(&self) -> &GpuBuffer {
        &self.indices
    }

    #[must_use]
    pub fn indirect_buffer(&self) -> &GpuBuffer {
        &self.indirect
    }

    #[must_use]
    pub fn payload_buffer(&self) -> &GpuBuffer {
        &self.payload
    }

    #[must_use]
    pub fn geometry_vao(&self) -> &VertexArray {
        &self.geometry_vao
    }

    #[must_use]
    pub fn scene_target(&self) -> &SceneTarget {
        &self.scene
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Releases every GPU object and hands the device back.
    pub fn shutdown(self) -> D {
        let Self {
            mut device,
            mut resources,
            mut targets,
            vertices,
            indices,
            indirect,
            payload,
            geometry_vao,
            ..
        } = self;

        targets.release_all(&mut device);
        resources.release_all(&mut device);
        geometry_vao.release(&mut device);
        for buffer in [vertices, indices, indirect, payload] {
            buffer.release(&mut device);
        }
        log::info!("Renderer shut down");
        device
    }
}
