//! Headless Device
//!
//! A CPU implementation of [`RenderDevice`]. Buffers are byte vectors,
//! programs are validated for their entry points, and every draw is recorded
//! together with the state it was issued under, including the decoded indirect
//! commands. The test suite and tooling use it to inspect exactly what the
//! renderer submits without a GPU.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use super::{
    AttachmentPoint, BlendMode, BufferFlags, BufferTarget, MAX_STORAGE_BINDINGS,
    MAX_UNIFORM_BLOCK_SIZE, MemoryBarrier, RawBuffer, RawFramebuffer, RawProgram, RawTexture,
    RawVertexArray, RenderDevice, ShaderStage, StageSource, TextureDesc, VertexAttribute,
};
use crate::errors::{EmberError, Result};
use crate::renderer::pass::indirect::DrawElementsIndirect;

const DEFAULT_BINDLESS_CAPACITY: u32 = 256;

struct BufferObject {
    label: String,
    flags: BufferFlags,
    data: Vec<u8>,
    /// End of the furthest write since allocation.
    written: usize,
}

struct TextureObject {
    desc: TextureDesc,
    levels: Vec<Vec<u8>>,
    resident: Option<u64>,
}

#[derive(Default)]
struct FramebufferObject {
    label: String,
    attachments: BTreeMap<AttachmentPoint, (RawTexture, u32)>,
    draw_buffers: SmallVec<[AttachmentPoint; 4]>,
}

#[derive(Default)]
struct VertexArrayObject {
    bindings: BTreeMap<u32, (RawBuffer, u64, u32)>,
    attributes: BTreeMap<u32, VertexAttribute>,
    index_buffer: Option<RawBuffer>,
}

struct ProgramObject {
    label: String,
    stages: SmallVec<[ShaderStage; 2]>,
    uniforms: Vec<u8>,
}

#[derive(Default)]
struct BoundState {
    framebuffer: Option<RawFramebuffer>,
    program: Option<RawProgram>,
    vertex_array: Option<RawVertexArray>,
    targets: FxHashMap<BufferTarget, RawBuffer>,
    storage: [Option<RawBuffer>; MAX_STORAGE_BINDINGS as usize],
    viewport: (u32, u32),
    blend: BlendMode,
    depth_test: bool,
}

/// What kind of draw was recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawKind {
    /// A multi-draw; holds the commands read from the indirect buffer.
    MultiIndirect(Vec<DrawElementsIndirect>),
    FullscreenTriangle,
}

/// One recorded draw and the state it was issued under.
#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub kind: DrawKind,
    pub program: RawProgram,
    pub program_label: String,
    pub framebuffer: Option<RawFramebuffer>,
    /// Color attachments written; empty means color writes were disabled.
    pub draw_buffers: Vec<AttachmentPoint>,
    pub vertex_array: Option<RawVertexArray>,
    pub storage: [Option<RawBuffer>; MAX_STORAGE_BINDINGS as usize],
    pub uniforms: Vec<u8>,
    pub blend: BlendMode,
    pub depth_test: bool,
    pub viewport: (u32, u32),
    /// Whether a command barrier separated the last indirect-buffer write
    /// from this draw.
    pub indirect_synchronized: bool,
}

/// CPU-side [`RenderDevice`].
pub struct HeadlessDevice {
    buffers: SlotMap<RawBuffer, BufferObject>,
    textures: SlotMap<RawTexture, TextureObject>,
    framebuffers: SlotMap<RawFramebuffer, FramebufferObject>,
    vertex_arrays: SlotMap<RawVertexArray, VertexArrayObject>,
    programs: SlotMap<RawProgram, ProgramObject>,

    memory_budget: u64,
    allocated: u64,
    bindless_capacity: u32,
    resident: Vec<Option<RawTexture>>,

    state: BoundState,
    unsynchronized_writes: bool,
    draws: Vec<DrawRecord>,
    clears: u32,
    frames_presented: u64,
    size: (u32, u32),
}

impl HeadlessDevice {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            vertex_arrays: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            memory_budget: u64::MAX,
            allocated: 0,
            bindless_capacity: DEFAULT_BINDLESS_CAPACITY,
            // Slot 0 is the reserved "no texture" handle.
            resident: vec![None],
            state: BoundState {
                viewport: (width, height),
                ..BoundState::default()
            },
            unsynchronized_writes: false,
            draws: Vec::new(),
            clears: 0,
            frames_presented: 0,
            size: (width, height),
        }
    }

    /// Limits total buffer memory; allocations past it fail.
    #[must_use]
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    #[must_use]
    pub fn with_bindless_capacity(mut self, slots: u32) -> Self {
        self.bindless_capacity = slots;
        self
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    #[must_use]
    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    #[must_use]
    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated
    }

    #[must_use]
    pub fn buffer_capacity(&self, buffer: RawBuffer) -> u64 {
        self.buffer(buffer).data.len() as u64
    }

    #[must_use]
    pub fn buffer_label(&self, buffer: RawBuffer) -> &str {
        &self.buffer(buffer).label
    }

    #[must_use]
    pub fn framebuffer_label(&self, framebuffer: RawFramebuffer) -> &str {
        &self.framebuffer(framebuffer).label
    }

    #[must_use]
    pub fn bound_buffer(&self, target: BufferTarget) -> Option<RawBuffer> {
        self.state.targets.get(&target).copied()
    }

    #[must_use]
    pub fn bound_storage(&self, index: u32) -> Option<RawBuffer> {
        self.state.storage.get(index as usize).copied().flatten()
    }

    #[must_use]
    pub fn attachment_of(
        &self,
        framebuffer: RawFramebuffer,
        point: AttachmentPoint,
    ) -> Option<(RawTexture, u32)> {
        self.framebuffer(framebuffer).attachments.get(&point).copied()
    }

    #[must_use]
    pub fn draw_buffers_of(&self, framebuffer: RawFramebuffer) -> &[AttachmentPoint] {
        &self.framebuffer(framebuffer).draw_buffers
    }

    #[must_use]
    pub fn binding_of(&self, vao: RawVertexArray, slot: u32) -> Option<(RawBuffer, u64, u32)> {
        self.vertex_array(vao).bindings.get(&slot).copied()
    }

    #[must_use]
    pub fn attributes_of(&self, vao: RawVertexArray) -> Vec<VertexAttribute> {
        self.vertex_array(vao).attributes.values().copied().collect()
    }

    #[must_use]
    pub fn index_buffer_of(&self, vao: RawVertexArray) -> Option<RawBuffer> {
        self.vertex_array(vao).index_buffer
    }

    #[must_use]
    pub fn uniforms_of(&self, program: RawProgram) -> &[u8] {
        &self.program(program).uniforms
    }

    #[must_use]
    pub fn program_stages(&self, program: RawProgram) -> &[ShaderStage] {
        &self.program(program).stages
    }

    #[must_use]
    pub fn texture_desc(&self, texture: RawTexture) -> &TextureDesc {
        &self.texture(texture).desc
    }

    #[must_use]
    pub fn texture_level(&self, texture: RawTexture, level: u32) -> &[u8] {
        &self.texture(texture).levels[level as usize]
    }

    /// Number of textures currently occupying a bindless slot.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.resident.iter().flatten().count()
    }

    #[must_use]
    pub fn clear_count(&self) -> u32 {
        self.clears
    }

    #[must_use]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    // ========================================================================
    // Lookup helpers
    // ========================================================================

    fn buffer(&self, raw: RawBuffer) -> &BufferObject {
        self.buffers
            .get(raw)
            .unwrap_or_else(|| panic!("unknown buffer {raw:?}"))
    }

    fn buffer_mut(&mut self, raw: RawBuffer) -> &mut BufferObject {
        self.buffers
            .get_mut(raw)
            .unwrap_or_else(|| panic!("unknown buffer {raw:?}"))
    }

    fn texture(&self, raw: RawTexture) -> &TextureObject {
        self.textures
            .get(raw)
            .unwrap_or_else(|| panic!("unknown texture {raw:?}"))
    }

    fn framebuffer(&self, raw: RawFramebuffer) -> &FramebufferObject {
        self.framebuffers
            .get(raw)
            .unwrap_or_else(|| panic!("unknown framebuffer {raw:?}"))
    }

    fn vertex_array(&self, raw: RawVertexArray) -> &VertexArrayObject {
        self.vertex_arrays
            .get(raw)
            .unwrap_or_else(|| panic!("unknown vertex array {raw:?}"))
    }

    fn vertex_array_mut(&mut self, raw: RawVertexArray) -> &mut VertexArrayObject {
        self.vertex_arrays
            .get_mut(raw)
            .unwrap_or_else(|| panic!("unknown vertex array {raw:?}"))
    }

    fn program(&self, raw: RawProgram) -> &ProgramObject {
        self.programs
            .get(raw)
            .unwrap_or_else(|| panic!("unknown program {raw:?}"))
    }

    fn record(&mut self, kind: DrawKind) {
        let Some(program) = self.state.program else {
            panic!("draw issued with no program in use");
        };
        let draw_buffers = self
            .state
            .framebuffer
            .map(|fb| self.framebuffer(fb).draw_buffers.to_vec())
            .unwrap_or_else(|| vec![AttachmentPoint::Color(0)]);
        let program_obj = self.program(program);
        let program_label = program_obj.label.clone();
        let uniforms = program_obj.uniforms.clone();
        self.draws.push(DrawRecord {
            kind,
            program,
            program_label,
            framebuffer: self.state.framebuffer,
            draw_buffers,
            vertex_array: self.state.vertex_array,
            storage: self.state.storage,
            uniforms,
            blend: self.state.blend,
            depth_test: self.state.depth_test,
            viewport: self.state.viewport,
            indirect_synchronized: !self.unsynchronized_writes,
        });
    }
}

fn validate_stage(label: &str, stage: &StageSource) -> std::result::Result<(), String> {
    let name = format!("{label}.{}", stage.stage.suffix());
    if matches!(
        stage.stage,
        ShaderStage::TessControl | ShaderStage::TessEvaluation
    ) {
        return Err(format!("{name}: tessellation stages are not supported"));
    }

    let opens = stage.source.matches('{').count();
    let closes = stage.source.matches('}').count();
    if opens != closes {
        return Err(format!(
            "{name}: unbalanced braces ({opens} opening, {closes} closing)"
        ));
    }

    let entry = format!("fn {}", stage.stage.entry_point());
    if !stage.source.contains(stage.stage.attribute()) || !stage.source.contains(&entry) {
        return Err(format!(
            "{name}: missing `{} {entry}` entry point",
            stage.stage.attribute()
        ));
    }
    Ok(())
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl RenderDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "headless"
    }

    fn max_bindless_textures(&self) -> u32 {
        self.bindless_capacity
    }

    // ---- Buffers -----------------------------------------------------------

    fn create_buffer(
        &mut self,
        label: &str,
        capacity: u64,
        flags: BufferFlags,
    ) -> Result<RawBuffer> {
        if self.allocated.saturating_add(capacity) > self.memory_budget {
            return Err(EmberError::OutOfDeviceMemory {
                label: label.to_string(),
                requested: capacity,
            });
        }
        self.allocated += capacity;
        Ok(self.buffers.insert(BufferObject {
            label: label.to_string(),
            flags,
            data: vec![0; capacity as usize],
            written: 0,
        }))
    }

    fn write_buffer(&mut self, buffer: RawBuffer, offset: u64, data: &[u8]) {
        let obj = self.buffer_mut(buffer);
        let start = offset as usize;
        let end = start + data.len();
        assert!(
            end <= obj.data.len(),
            "write of {}..{end} past the end of '{}' ({} bytes)",
            start,
            obj.label,
            obj.data.len()
        );
        obj.data[start..end].copy_from_slice(data);
        obj.written = obj.written.max(end);
        self.unsynchronized_writes = true;
    }

    fn copy_buffer(&mut self, src: RawBuffer, dst: RawBuffer, size: u64) {
        let bytes = self.buffer(src).data[..size as usize].to_vec();
        let obj = self.buffer_mut(dst);
        obj.data[..bytes.len()].copy_from_slice(&bytes);
        obj.written = obj.written.max(bytes.len());
    }

    fn read_buffer(&mut self, buffer: RawBuffer, offset: u64, size: u64) -> Vec<u8> {
        let obj = self.buffer(buffer);
        obj.data[offset as usize..(offset + size) as usize].to_vec()
    }

    fn destroy_buffer(&mut self, buffer: RawBuffer) {
        let obj = self
            .buffers
            .remove(buffer)
            .unwrap_or_else(|| panic!("double destroy of buffer {buffer:?}"));
        self.allocated -= obj.data.len() as u64;
        self.state.targets.retain(|_, bound| *bound != buffer);
        for slot in &mut self.state.storage {
            if *slot == Some(buffer) {
                *slot = None;
            }
        }
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: RawBuffer) {
        let flags = self.buffer(buffer).flags;
        assert!(
            flags.contains(target.required_flag()),
            "buffer '{}' lacks {:?} for {target:?}",
            self.buffer(buffer).label,
            target.required_flag()
        );
        self.state.targets.insert(target, buffer);
    }

    fn bind_buffer_base(&mut self, target: BufferTarget, index: u32, buffer: RawBuffer) {
        assert!(target.is_indexed(), "{target:?} has no indexed binding points");
        self.bind_buffer(target, buffer);
        if target == BufferTarget::ShaderStorage {
            assert!(index < MAX_STORAGE_BINDINGS, "storage binding {index} out of range");
            self.state.storage[index as usize] = Some(buffer);
        }
    }

    // ---- Textures ----------------------------------------------------------

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<RawTexture> {
        let texel = u64::from(desc.format.texel_size().unwrap_or(4));
        let levels = (0..desc.levels)
            .map(|level| {
                let w = u64::from((desc.width >> level).max(1));
                let h = u64::from((desc.height >> level).max(1));
                vec![0; (w * h * texel) as usize]
            })
            .collect();
        Ok(self.textures.insert(TextureObject {
            desc: desc.clone(),
            levels,
            resident: None,
        }))
    }

    fn write_texture(&mut self, texture: RawTexture, level: u32, data: &[u8]) {
        let obj = self
            .textures
            .get_mut(texture)
            .unwrap_or_else(|| panic!("unknown texture {texture:?}"));
        let dst = &mut obj.levels[level as usize];
        assert_eq!(dst.len(), data.len(), "texture upload size mismatch");
        dst.copy_from_slice(data);
    }

    fn make_texture_resident(&mut self, texture: RawTexture) -> u64 {
        if let Some(handle) = self.texture(texture).resident {
            return handle;
        }
        let free = self.resident.iter().skip(1).position(Option::is_none);
        let handle = match free {
            Some(index) => index + 1,
            None if self.resident.len() < self.bindless_capacity as usize => {
                self.resident.push(None);
                self.resident.len() - 1
            }
            None => {
                log::error!(
                    "Bindless texture table exhausted ({} slots)",
                    self.bindless_capacity
                );
                panic!("bindless texture table exhausted");
            }
        };
        self.resident[handle] = Some(texture);
        let handle = handle as u64;
        if let Some(obj) = self.textures.get_mut(texture) {
            obj.resident = Some(handle);
        }
        handle
    }

    fn destroy_texture(&mut self, texture: RawTexture) {
        let obj = self
            .textures
            .remove(texture)
            .unwrap_or_else(|| panic!("double destroy of texture {texture:?}"));
        if let Some(handle) = obj.resident {
            self.resident[handle as usize] = None;
        }
    }

    // ---- Framebuffers ------------------------------------------------------

    fn create_framebuffer(&mut self, label: &str) -> RawFramebuffer {
        self.framebuffers.insert(FramebufferObject {
            label: label.to_string(),
            ..FramebufferObject::default()
        })
    }

    fn framebuffer_texture(
        &mut self,
        framebuffer: RawFramebuffer,
        point: AttachmentPoint,
        texture: Option<RawTexture>,
        level: u32,
    ) {
        let obj = self
            .framebuffers
            .get_mut(framebuffer)
            .unwrap_or_else(|| panic!("unknown framebuffer {framebuffer:?}"));
        match texture {
            Some(texture) => {
                obj.attachments.insert(point, (texture, level));
            }
            None => {
                obj.attachments.remove(&point);
            }
        }
    }

    fn framebuffer_draw_buffers(&mut self, framebuffer: RawFramebuffer, points: &[AttachmentPoint]) {
        let obj = self
            .framebuffers
            .get_mut(framebuffer)
            .unwrap_or_else(|| panic!("unknown framebuffer {framebuffer:?}"));
        obj.draw_buffers = points.iter().copied().collect();
    }

    fn destroy_framebuffer(&mut self, framebuffer: RawFramebuffer) {
        self.framebuffers
            .remove(framebuffer)
            .unwrap_or_else(|| panic!("double destroy of framebuffer {framebuffer:?}"));
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
    }

    // ---- Vertex arrays -----------------------------------------------------

    fn create_vertex_array(&mut self, _label: &str) -> RawVertexArray {
        self.vertex_arrays.insert(VertexArrayObject::default())
    }

    fn vertex_array_binding(
        &mut self,
        vao: RawVertexArray,
        slot: u32,
        buffer: RawBuffer,
        offset: u64,
        stride: u32,
    ) {
        self.buffer(buffer);
        self.vertex_array_mut(vao)
            .bindings
            .insert(slot, (buffer, offset, stride));
    }

    fn vertex_array_attribute(&mut self, vao: RawVertexArray, attribute: &VertexAttribute) {
        self.vertex_array_mut(vao)
            .attributes
            .insert(attribute.location, *attribute);
    }

    fn vertex_array_index_buffer(&mut self, vao: RawVertexArray, buffer: RawBuffer) {
        self.buffer(buffer);
        self.vertex_array_mut(vao).index_buffer = Some(buffer);
    }

    fn destroy_vertex_array(&mut self, vao: RawVertexArray) {
        self.vertex_arrays
            .remove(vao)
            .unwrap_or_else(|| panic!("double destroy of vertex array {vao:?}"));
        if self.state.vertex_array == Some(vao) {
            self.state.vertex_array = None;
        }
    }

    // ---- Programs ----------------------------------------------------------

    fn create_program(
        &mut self,
        label: &str,
        stages: &[StageSource],
    ) -> std::result::Result<RawProgram, String> {
        let errors: Vec<String> = stages
            .iter()
            .filter_map(|stage| validate_stage(label, stage).err())
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("\n"));
        }
        Ok(self.programs.insert(ProgramObject {
            label: label.to_string(),
            stages: stages.iter().map(|s| s.stage).collect(),
            uniforms: Vec::new(),
        }))
    }

    fn program_uniforms(&mut self, program: RawProgram, data: &[u8]) {
        assert!(data.len() <= MAX_UNIFORM_BLOCK_SIZE, "uniform block too large");
        let obj = self
            .programs
            .get_mut(program)
            .unwrap_or_else(|| panic!("unknown program {program:?}"));
        obj.uniforms.clear();
        obj.uniforms.extend_from_slice(data);
    }

    fn destroy_program(&mut self, program: RawProgram) {
        self.programs
            .remove(program)
            .unwrap_or_else(|| panic!("double destroy of program {program:?}"));
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    // ---- State & draws -----------------------------------------------------

    fn bind_framebuffer(&mut self, framebuffer: Option<RawFramebuffer>) {
        if let Some(fb) = framebuffer {
            self.framebuffer(fb);
        }
        self.state.framebuffer = framebuffer;
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.state.viewport = (width, height);
    }

    fn clear(&mut self, _color: Option<[f32; 4]>, _depth: Option<f32>) {
        self.clears += 1;
    }

    fn set_blend(&mut self, blend: BlendMode) {
        self.state.blend = blend;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
    }

    fn use_program(&mut self, program: RawProgram) {
        self.program(program);
        self.state.program = Some(program);
    }

    fn bind_vertex_array(&mut self, vao: RawVertexArray) {
        self.vertex_array(vao);
        self.state.vertex_array = Some(vao);
    }

    fn memory_barrier(&mut self, barriers: MemoryBarrier) {
        if barriers.contains(MemoryBarrier::COMMAND) {
            self.unsynchronized_writes = false;
        }
    }

    fn multi_draw_elements_indirect(&mut self, offset: u64, count: u32) {
        let Some(indirect) = self.bound_buffer(BufferTarget::DrawIndirect) else {
            panic!("multi-draw with no indirect buffer bound");
        };
        let Some(vao) = self.state.vertex_array else {
            panic!("multi-draw with no vertex array bound");
        };
        let Some(index_buffer) = self.vertex_array(vao).index_buffer else {
            panic!("multi-draw with no index buffer on the bound vertex array");
        };

        let stride = std::mem::size_of::<DrawElementsIndirect>();
        let indirect = self.buffer(indirect);
        let start = offset as usize;
        let end = start + stride * count as usize;
        assert!(
            end <= indirect.written,
            "indirect read past the written commands"
        );
        let commands: Vec<DrawElementsIndirect> = indirect.data[start..end]
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned)
            .collect();

        // Checked against written indices, not capacity: a grown buffer's
        // tail holds no geometry.
        let written_indices = self.buffer(index_buffer).written / 4;
        for cmd in &commands {
            assert!(
                (cmd.first_index + cmd.count) as usize <= written_indices,
                "indirect command reads indices past the written index data"
            );
        }

        self.record(DrawKind::MultiIndirect(commands));
    }

    fn draw_fullscreen_triangle(&mut self) {
        self.record(DrawKind::FullscreenTriangle);
    }

    // ---- Frame -------------------------------------------------------------

    fn default_target_size(&self) -> (u32, u32) {
        self.size
    }

    fn resize_default_target(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
    }

    fn present(&mut self) {
        self.frames_presented += 1;
        self.state.framebuffer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{FilterMode, TextureFormat, WrapMode};

    fn stage(stage: ShaderStage, source: &str) -> StageSource {
        StageSource {
            stage,
            source: source.to_string(),
        }
    }

    #[test]
    fn program_requires_entry_points() {
        let mut device = HeadlessDevice::default();
        let ok = device.create_program(
            "ok",
            &[
                stage(ShaderStage::Vertex, "@vertex fn vs_main() {}"),
                stage(ShaderStage::Fragment, "@fragment fn fs_main() {}"),
            ],
        );
        assert!(ok.is_ok());

        let err = device
            .create_program("bad", &[stage(ShaderStage::Vertex, "fn main() {}")])
            .unwrap_err();
        assert!(err.contains("bad.vert"));
        assert!(err.contains("vs_main"));
    }

    #[test]
    fn budget_rejects_oversized_allocation() {
        let mut device = HeadlessDevice::default().with_memory_budget(64);
        assert!(device.create_buffer("a", 48, BufferFlags::VERTEX).is_ok());
        assert!(device.create_buffer("b", 32, BufferFlags::VERTEX).is_err());
    }

    fn indexed_draw_setup(device: &mut HeadlessDevice, index_bytes: &[u8]) -> RawBuffer {
        let indices = device.create_buffer("i", 64, BufferFlags::INDEX).unwrap();
        device.write_buffer(indices, 0, index_bytes);
        let indirect = device.create_buffer("c", 64, BufferFlags::INDIRECT).unwrap();
        let vao = device.create_vertex_array("v");
        device.vertex_array_index_buffer(vao, indices);
        device.bind_vertex_array(vao);
        device.bind_buffer(BufferTarget::DrawIndirect, indirect);
        indirect
    }

    #[test]
    #[should_panic(expected = "past the written index data")]
    fn command_past_written_indices_panics_inside_capacity() {
        let mut device = HeadlessDevice::default();
        let indirect = indexed_draw_setup(&mut device, bytemuck::cast_slice(&[0u32, 1, 2]));
        let command = DrawElementsIndirect {
            count: 6,
            instance_count: 1,
            first_index: 0,
            base_vertex: 0,
            base_instance: 0,
        };
        device.write_buffer(indirect, 0, bytemuck::bytes_of(&command));

        device.multi_draw_elements_indirect(0, 1);
    }

    #[test]
    #[should_panic(expected = "past the written commands")]
    fn unwritten_indirect_commands_panic() {
        let mut device = HeadlessDevice::default();
        indexed_draw_setup(&mut device, bytemuck::cast_slice(&[0u32, 1, 2]));

        device.multi_draw_elements_indirect(0, 1);
    }

    #[test]
    fn copied_bytes_count_as_written() {
        let mut device = HeadlessDevice::default();
        let src = device.create_buffer("a", 16, BufferFlags::VERTEX).unwrap();
        let dst = device.create_buffer("b", 32, BufferFlags::VERTEX).unwrap();
        device.write_buffer(src, 0, &[7; 12]);

        device.copy_buffer(src, dst, 12);

        assert_eq!(device.buffer(dst).written, 12);
        assert_eq!(device.read_buffer(dst, 0, 12), [7; 12]);
    }

    #[test]
    fn framebuffers_keep_their_label() {
        let mut device = HeadlessDevice::default();
        let fb = device.create_framebuffer("HDR Scene");
        assert_eq!(device.framebuffer_label(fb), "HDR Scene");
    }

    #[test]
    fn resident_handles_skip_the_reserved_slot() {
        let mut device = HeadlessDevice::default();
        let tex = device
            .create_texture(&TextureDesc {
                label: "t".into(),
                format: TextureFormat::Rgba8Unorm,
                width: 2,
                height: 2,
                levels: 1,
                filter: FilterMode::Linear,
                wrap: WrapMode::Repeat,
            })
            .unwrap();
        let handle = device.make_texture_resident(tex);
        assert_eq!(handle, 1);
        assert_eq!(device.make_texture_resident(tex), 1);
        assert_eq!(device.resident_count(), 1);
    }
}
