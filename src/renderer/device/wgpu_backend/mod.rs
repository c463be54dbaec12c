//! wgpu Device
//!
//! [`WgpuDevice`] implements the [`RenderDevice`] state machine on top of
//! `wgpu`. Draws are recorded into a pending render pass together with the
//! pipeline, bind groups and buffers they resolve to; the pass is encoded and
//! submitted when the target changes, when a transfer needs ordering against
//! it, or at present.
//!
//! Bind groups:
//! - group 0: the program uniform block (dynamic offset into a per-frame
//!   arena) and three read-only storage buffers from `bind_buffer_base`.
//! - group 1: the bindless texture and sampler arrays.

mod arena;
mod bindless;
mod convert;
mod pipeline;

use std::borrow::Cow;
use std::collections::BTreeMap;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use self::arena::UniformArena;
use self::bindless::BindlessTable;
use self::convert::{buffer_usages, texture_format};
use self::pipeline::{ColorTargetKey, PipelineCache, PipelineKey, ProgramModules, VertexSlotLayout};
use super::{
    AttachmentPoint, BlendMode, BufferFlags, BufferTarget, MAX_STORAGE_BINDINGS,
    MAX_UNIFORM_BLOCK_SIZE, MemoryBarrier, RawBuffer, RawFramebuffer, RawProgram, RawTexture,
    RawVertexArray, RenderDevice, ShaderStage, StageSource, TextureDesc, TextureFormat,
    VertexAttribute,
};
use crate::errors::{EmberError, Result};
use crate::renderer::settings::RendererSettings;

const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
const INITIAL_UNIFORM_SLOTS: u32 = 256;
/// Large enough for one element of any storage array the engine declares.
const DUMMY_STORAGE_SIZE: u64 = 256;

const REQUIRED_FEATURES: wgpu::Features = wgpu::Features::TEXTURE_BINDING_ARRAY
    .union(wgpu::Features::SAMPLED_TEXTURE_AND_STORAGE_BUFFER_ARRAY_NON_UNIFORM_INDEXING)
    .union(wgpu::Features::INDIRECT_FIRST_INSTANCE);

// ============================================================================
// Object tables
// ============================================================================

struct BufferEntry {
    buffer: wgpu::Buffer,
    flags: BufferFlags,
    capacity: u64,
    label: String,
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
    resident: Option<u64>,
}

#[derive(Default)]
struct FramebufferEntry {
    label: String,
    attachments: BTreeMap<AttachmentPoint, (RawTexture, u32)>,
    draw_buffers: SmallVec<[AttachmentPoint; 4]>,
}

#[derive(Default)]
struct VertexArrayEntry {
    bindings: BTreeMap<u32, (RawBuffer, u64, u32)>,
    attributes: BTreeMap<u32, VertexAttribute>,
    index_buffer: Option<RawBuffer>,
}

struct ProgramEntry {
    label: String,
    vertex: Option<wgpu::ShaderModule>,
    fragment: Option<wgpu::ShaderModule>,
    compute: Option<wgpu::ShaderModule>,
    uniforms: Vec<u8>,
}

enum DefaultTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        frame: Option<wgpu::SurfaceTexture>,
    },
    Offscreen {
        texture: wgpu::Texture,
        size: (u32, u32),
    },
}

impl DefaultTarget {
    fn format(&self) -> wgpu::TextureFormat {
        match self {
            Self::Surface { config, .. } => config.format,
            Self::Offscreen { .. } => OFFSCREEN_FORMAT,
        }
    }

    fn size(&self) -> (u32, u32) {
        match self {
            Self::Surface { config, .. } => (config.width, config.height),
            Self::Offscreen { size, .. } => *size,
        }
    }
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

// ============================================================================
// Recording
// ============================================================================

enum DrawKind {
    MultiIndirect {
        vertex_buffers: SmallVec<[(u32, wgpu::Buffer, u64); 2]>,
        index_buffer: wgpu::Buffer,
        indirect: wgpu::Buffer,
        offset: u64,
        count: u32,
    },
    FullscreenTriangle,
}

struct DrawOp {
    pipeline: wgpu::RenderPipeline,
    group0: wgpu::BindGroup,
    uniform_offset: u32,
    viewport: (u32, u32),
    kind: DrawKind,
}

struct PendingPass {
    target: Option<RawFramebuffer>,
    clear_color: Option<[f32; 4]>,
    clear_depth: Option<f32>,
    draws: Vec<DrawOp>,
}

impl PendingPass {
    fn new(target: Option<RawFramebuffer>) -> Self {
        Self {
            target,
            clear_color: None,
            clear_depth: None,
            draws: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.draws.is_empty() && self.clear_color.is_none() && self.clear_depth.is_none()
    }
}

/// Views and formats a pass renders into, resolved at flush.
struct ResolvedTarget {
    colors: SmallVec<[Option<wgpu::TextureView>; 4]>,
    depth: Option<(wgpu::TextureView, bool)>,
    size: (u32, u32),
    attached: SmallVec<[RawTexture; 4]>,
}

// ============================================================================
// WgpuDevice
// ============================================================================

/// [`RenderDevice`] backed by `wgpu`.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    default_target: DefaultTarget,
    float32_filterable: bool,
    max_buffer_size: u64,

    buffers: SlotMap<RawBuffer, BufferEntry>,
    textures: SlotMap<RawTexture, TextureEntry>,
    framebuffers: SlotMap<RawFramebuffer, FramebufferEntry>,
    vertex_arrays: SlotMap<RawVertexArray, VertexArrayEntry>,
    programs: SlotMap<RawProgram, ProgramEntry>,

    group0_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    dummy_storage: wgpu::Buffer,
    group0_cache: FxHashMap<[Option<RawBuffer>; MAX_STORAGE_BINDINGS as usize], wgpu::BindGroup>,
    group0_generation: u64,
    bindless: BindlessTable,
    uniforms: UniformArena,
    pipelines: PipelineCache,

    state: BoundState,
    pending: Option<PendingPass>,
    frames_presented: u64,
}

impl WgpuDevice {
    /// Renders into an offscreen `Rgba8UnormSrgb` default target.
    pub fn headless(width: u32, height: u32, settings: &RendererSettings) -> Result<Self> {
        pollster::block_on(Self::new_headless(width, height, settings))
    }

    pub async fn new_headless(width: u32, height: u32, settings: &RendererSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let (adapter, device, queue) = Self::open(&instance, None, settings).await?;
        let size = (width.max(1), height.max(1));
        let texture = create_offscreen(&device, size);
        Ok(Self::assemble(
            &adapter,
            device,
            queue,
            DefaultTarget::Offscreen { texture, size },
            settings,
        ))
    }

    /// Presents to `window`.
    pub fn with_surface<W>(
        window: W,
        width: u32,
        height: u32,
        settings: &RendererSettings,
    ) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        pollster::block_on(Self::new_with_surface(window, width, height, settings))
    }

    pub async fn new_with_surface<W>(
        window: W,
        width: u32,
        height: u32,
        settings: &RendererSettings,
    ) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window)
            .map_err(|e| EmberError::SurfaceError(e.to_string()))?;
        let (adapter, device, queue) = Self::open(&instance, Some(&surface), settings).await?;

        let mut config = surface
            .get_default_config(&adapter, width.max(1), height.max(1))
            .ok_or_else(|| {
                EmberError::SurfaceError("Surface not supported by adapter".to_string())
            })?;
        config.present_mode = if settings.vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        surface.configure(&device, &config);

        Ok(Self::assemble(
            &adapter,
            device,
            queue,
            DefaultTarget::Surface {
                surface,
                config,
                frame: None,
            },
            settings,
        ))
    }

    async fn open(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'static>>,
        settings: &RendererSettings,
    ) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference.into(),
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| EmberError::AdapterRequestFailed(e.to_string()))?;

        let supported = adapter.features();
        if !supported.contains(REQUIRED_FEATURES) {
            return Err(EmberError::AdapterRequestFailed(format!(
                "adapter '{}' lacks {:?}",
                adapter.get_info().name,
                REQUIRED_FEATURES - supported
            )));
        }
        let optional = supported & wgpu::Features::FLOAT32_FILTERABLE;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Ember Device"),
                required_features: REQUIRED_FEATURES | optional,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        log::info!(
            "wgpu device on '{}' ({:?})",
            adapter.get_info().name,
            adapter.get_info().backend
        );
        Ok((adapter, device, queue))
    }

    fn assemble(
        adapter: &wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        default_target: DefaultTarget,
        settings: &RendererSettings,
    ) -> Self {
        let limits = device.limits();
        let capacity = settings
            .max_bindless_textures
            .min(limits.max_binding_array_elements_per_shader_stage)
            .min(limits.max_binding_array_sampler_elements_per_shader_stage)
            .max(1);
        if capacity < settings.max_bindless_textures {
            log::warn!(
                "Bindless table clamped to {capacity} slots by '{}'",
                adapter.get_info().name
            );
        }

        let group0_layout = create_group0_layout(&device);
        let bindless = BindlessTable::new(&device, &queue, capacity);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Ember Pipeline Layout"),
            bind_group_layouts: &[Some(&group0_layout), Some(bindless.layout())],
            immediate_size: 0,
        });
        let dummy_storage = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Unbound Storage"),
            size: DUMMY_STORAGE_SIZE,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let uniforms = UniformArena::new(
            &device,
            limits.min_uniform_buffer_offset_alignment,
            INITIAL_UNIFORM_SLOTS,
        );

        let size = default_target.size();
        Self {
            float32_filterable: device.features().contains(wgpu::Features::FLOAT32_FILTERABLE),
            max_buffer_size: limits.max_buffer_size,
            device,
            queue,
            default_target,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            vertex_arrays: SlotMap::with_key(),
            programs: SlotMap::with_key(),
            group0_layout,
            pipeline_layout,
            dummy_storage,
            group0_cache: FxHashMap::default(),
            group0_generation: 0,
            bindless,
            uniforms,
            pipelines: PipelineCache::default(),
            state: BoundState {
                viewport: size,
                ..BoundState::default()
            },
            pending: None,
            frames_presented: 0,
        }
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    #[must_use]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Reads back the offscreen default target as tightly packed RGBA8 rows.
    /// `None` for surface backends.
    pub fn capture_default_target(&mut self) -> Option<Vec<u8>> {
        self.flush_pass();
        let DefaultTarget::Offscreen { texture, size } = &self.default_target else {
            return None;
        };
        let (width, height) = *size;
        let row = width * 4;
        let padded_row = row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Capture Staging"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Capture"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let bytes = self.map_read(&staging)?;
        let mut pixels = Vec::with_capacity((row * height) as usize);
        for line in bytes.chunks_exact(padded_row as usize) {
            pixels.extend_from_slice(&line[..row as usize]);
        }
        Some(pixels)
    }

    // ========================================================================
    // Lookup helpers
    // ========================================================================

    fn buffer(&self, raw: RawBuffer) -> &BufferEntry {
        self.buffers
            .get(raw)
            .unwrap_or_else(|| panic!("unknown buffer {raw:?}"))
    }

    fn texture(&self, raw: RawTexture) -> &TextureEntry {
        self.textures
            .get(raw)
            .unwrap_or_else(|| panic!("unknown texture {raw:?}"))
    }

    fn framebuffer_mut(&mut self, raw: RawFramebuffer) -> &mut FramebufferEntry {
        self.framebuffers
            .get_mut(raw)
            .unwrap_or_else(|| panic!("unknown framebuffer {raw:?}"))
    }

    fn vertex_array_mut(&mut self, raw: RawVertexArray) -> &mut VertexArrayEntry {
        self.vertex_arrays
            .get_mut(raw)
            .unwrap_or_else(|| panic!("unknown vertex array {raw:?}"))
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Blocks until `staging` is mapped and returns its contents.
    fn map_read(&self, staging: &wgpu::Buffer) -> Option<Vec<u8>> {
        let (tx, rx) = flume::bounded(1);
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                // The receiver outlives the poll below.
                let _ = tx.send(result);
            });
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            log::error!("Device poll failed during readback: {e}");
            return None;
        }
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("Readback mapping failed: {e}");
                return None;
            }
            Err(e) => {
                log::error!("Readback callback dropped: {e}");
                return None;
            }
        }
        let bytes = staging.slice(..).get_mapped_range().to_vec();
        staging.unmap();
        Some(bytes)
    }

    /// Copies the 4-byte aligned window around `offset..offset + size` into
    /// a mappable buffer and returns it with the window start.
    fn read_aligned(&mut self, buffer: RawBuffer, offset: u64, size: u64) -> (u64, Vec<u8>) {
        self.flush_pass();
        let entry = self.buffer(buffer);
        let start = offset & !(wgpu::COPY_BUFFER_ALIGNMENT - 1);
        let end = (offset + size)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
            .min(entry.capacity);
        if end <= start {
            return (start, Vec::new());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: end - start,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback"),
            });
        encoder.copy_buffer_to_buffer(&entry.buffer, start, &staging, 0, end - start);
        self.queue.submit(Some(encoder.finish()));

        let bytes = self.map_read(&staging).unwrap_or_else(|| {
            log::error!("Readback of '{}' failed; returning zeros", entry.label);
            vec![0; (end - start) as usize]
        });
        (start, bytes)
    }

    // ========================================================================
    // Draw recording
    // ========================================================================

    fn pass_mut(&mut self) -> &mut PendingPass {
        let target = self.state.framebuffer;
        self.pending.get_or_insert_with(|| PendingPass::new(target))
    }

    /// Color target formats and write flags plus the depth format of the
    /// bound target.
    fn target_layout(&self) -> (SmallVec<[ColorTargetKey; 4]>, Option<wgpu::TextureFormat>) {
        let Some(raw) = self.state.framebuffer else {
            let mut colors = SmallVec::new();
            colors.push(Some((self.default_target.format(), true)));
            return (colors, None);
        };
        let fb = &self.framebuffers[raw];
        let mut colors: SmallVec<[ColorTargetKey; 4]> = SmallVec::new();
        let mut depth = None;
        for (point, (texture, _)) in &fb.attachments {
            let format = texture_format(self.texture(*texture).desc.format);
            match *point {
                AttachmentPoint::Color(index) => {
                    let index = index as usize;
                    if colors.len() <= index {
                        colors.resize(index + 1, None);
                    }
                    colors[index] = Some((format, fb.draw_buffers.contains(point)));
                }
                AttachmentPoint::Depth | AttachmentPoint::Stencil | AttachmentPoint::DepthStencil => {
                    depth = Some(format);
                }
            }
        }
        (colors, depth)
    }

    fn vertex_layout(&self) -> SmallVec<[VertexSlotLayout; 2]> {
        let Some(vao) = self.state.vertex_array else {
            return SmallVec::new();
        };
        let vao = &self.vertex_arrays[vao];
        vao.bindings
            .iter()
            .map(|(&slot, &(_, _, stride))| VertexSlotLayout {
                slot,
                stride,
                attributes: vao
                    .attributes
                    .values()
                    .filter(|attr| attr.binding == slot)
                    .copied()
                    .collect(),
            })
            .collect()
    }

    fn group0(&mut self) -> wgpu::BindGroup {
        if self.group0_generation != self.uniforms.generation() {
            self.group0_cache.clear();
            self.group0_generation = self.uniforms.generation();
        }
        let key = self.state.storage;
        if let Some(group) = self.group0_cache.get(&key) {
            return group.clone();
        }

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: self.uniforms.buffer(),
                offset: 0,
                size: wgpu::BufferSize::new(MAX_UNIFORM_BLOCK_SIZE as u64),
            }),
        }];
        for (index, bound) in key.iter().enumerate() {
            let buffer = bound.map_or(&self.dummy_storage, |raw| &self.buffer(raw).buffer);
            entries.push(wgpu::BindGroupEntry {
                binding: 1 + index as u32,
                resource: buffer.as_entire_binding(),
            });
        }
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Uniforms & Storage"),
            layout: &self.group0_layout,
            entries: &entries,
        });
        self.group0_cache.insert(key, group.clone());
        group
    }

    fn record(&mut self, kind: DrawKind) {
        let Some(program) = self.state.program else {
            panic!("draw issued with no program in use");
        };
        let (colors, depth) = self.target_layout();
        let vertex = match kind {
            DrawKind::MultiIndirect { .. } => self.vertex_layout(),
            DrawKind::FullscreenTriangle => SmallVec::new(),
        };
        let key = PipelineKey {
            program,
            vertex,
            colors,
            depth,
            blend: self.state.blend,
            depth_test: self.state.depth_test,
        };

        let entry = &self.programs[program];
        let Some(vertex_module) = entry.vertex.as_ref() else {
            panic!("program '{}' has no vertex stage and cannot draw", entry.label);
        };
        let modules = ProgramModules {
            label: &entry.label,
            vertex: vertex_module,
            fragment: entry.fragment.as_ref(),
        };
        let Some(pipeline) =
            self.pipelines
                .get_or_create(&self.device, &self.pipeline_layout, &modules, &key)
        else {
            log::error!("Skipping draw with '{}': no valid pipeline", entry.label);
            return;
        };

        let uniform_offset = self.uniforms.push(&self.device, &self.queue, &entry.uniforms);
        let group0 = self.group0();
        let viewport = self.state.viewport;
        self.pass_mut().draws.push(DrawOp {
            pipeline,
            group0,
            uniform_offset,
            viewport,
            kind,
        });
    }

    // ========================================================================
    // Pass submission
    // ========================================================================

    fn resolve_target(&mut self, target: Option<RawFramebuffer>) -> Option<ResolvedTarget> {
        let Some(raw) = target else {
            let size = self.default_target.size();
            let view = self.default_view()?;
            let mut colors = SmallVec::new();
            colors.push(Some(view));
            return Some(ResolvedTarget {
                colors,
                depth: None,
                size,
                attached: SmallVec::new(),
            });
        };

        let fb = self.framebuffers.get(raw)?;
        let mut resolved = ResolvedTarget {
            colors: SmallVec::new(),
            depth: None,
            size: (u32::MAX, u32::MAX),
            attached: SmallVec::new(),
        };
        for (point, &(texture, level)) in &fb.attachments {
            let entry = self.texture(texture);
            let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&fb.label),
                base_mip_level: level,
                mip_level_count: Some(1),
                ..Default::default()
            });
            let w = (entry.desc.width >> level).max(1);
            let h = (entry.desc.height >> level).max(1);
            resolved.size = (resolved.size.0.min(w), resolved.size.1.min(h));
            resolved.attached.push(texture);
            match *point {
                AttachmentPoint::Color(index) => {
                    let index = index as usize;
                    if resolved.colors.len() <= index {
                        resolved.colors.resize(index + 1, None);
                    }
                    resolved.colors[index] = Some(view);
                }
                AttachmentPoint::Depth | AttachmentPoint::Stencil | AttachmentPoint::DepthStencil => {
                    resolved.depth = Some((view, entry.desc.format.has_stencil()));
                }
            }
        }
        if resolved.attached.is_empty() {
            log::error!("Framebuffer '{}' has no attachments; pass dropped", fb.label);
            return None;
        }
        Some(resolved)
    }

    fn default_view(&mut self) -> Option<wgpu::TextureView> {
        match &mut self.default_target {
            DefaultTarget::Offscreen { texture, .. } => {
                Some(texture.create_view(&wgpu::TextureViewDescriptor::default()))
            }
            DefaultTarget::Surface {
                surface,
                config,
                frame,
            } => {
                if frame.is_none() {
                    *frame = acquire_frame(surface, &self.device, config);
                }
                frame
                    .as_ref()
                    .map(|f| f.texture.create_view(&wgpu::TextureViewDescriptor::default()))
            }
        }
    }

    /// Encodes and submits the pending pass.
    fn flush_pass(&mut self) {
        let Some(pass) = self.pending.take() else {
            return;
        };
        if pass.is_empty() {
            return;
        }
        let Some(target) = self.resolve_target(pass.target) else {
            log::warn!("Dropping {} draws: target unavailable", pass.draws.len());
            return;
        };
        let bindless = self
            .bindless
            .bind_group(&self.device, &self.textures, &target.attached);

        let color_ops = |clear: Option<[f32; 4]>| wgpu::Operations {
            load: clear.map_or(wgpu::LoadOp::Load, |[r, g, b, a]| {
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: f64::from(r),
                    g: f64::from(g),
                    b: f64::from(b),
                    a: f64::from(a),
                })
            }),
            store: wgpu::StoreOp::Store,
        };
        let color_attachments: SmallVec<[Option<wgpu::RenderPassColorAttachment<'_>>; 4]> = target
            .colors
            .iter()
            .map(|view| {
                view.as_ref().map(|view| wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: color_ops(pass.clear_color),
                })
            })
            .collect();
        let depth_stencil_attachment =
            target
                .depth
                .as_ref()
                .map(|(view, stencil)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: pass.clear_depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: stencil.then_some(wgpu::Operations {
                        load: if pass.clear_depth.is_some() {
                            wgpu::LoadOp::Clear(0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Ember Pass"),
            });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Ember Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                ..Default::default()
            });
            rpass.set_bind_group(1, &bindless, &[]);
            for draw in &pass.draws {
                let w = draw.viewport.0.clamp(1, target.size.0);
                let h = draw.viewport.1.clamp(1, target.size.1);
                rpass.set_viewport(0.0, 0.0, w as f32, h as f32, 0.0, 1.0);
                rpass.set_pipeline(&draw.pipeline);
                rpass.set_bind_group(0, &draw.group0, &[draw.uniform_offset]);
                match &draw.kind {
                    DrawKind::MultiIndirect {
                        vertex_buffers,
                        index_buffer,
                        indirect,
                        offset,
                        count,
                    } => {
                        for (slot, buffer, base) in vertex_buffers {
                            rpass.set_vertex_buffer(*slot, buffer.slice(*base..));
                        }
                        rpass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        rpass.multi_draw_indexed_indirect(indirect, *offset, *count);
                    }
                    DrawKind::FullscreenTriangle => rpass.draw(0..3, 0..1),
                }
            }
        }
        self.queue.submit(Some(encoder.finish()));
    }
}

fn create_group0_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: None,
        },
        count: None,
    }];
    for index in 0..MAX_STORAGE_BINDINGS {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 1 + index,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Uniforms & Storage"),
        entries: &entries,
    })
}

fn create_offscreen(device: &wgpu::Device, (width, height): (u32, u32)) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Offscreen Target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn acquire_frame(
    surface: &wgpu::Surface<'static>,
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
) -> Option<wgpu::SurfaceTexture> {
    match surface.get_current_texture() {
        wgpu::CurrentSurfaceTexture::Success(frame)
        | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => Some(frame),
        wgpu::CurrentSurfaceTexture::Timeout | wgpu::CurrentSurfaceTexture::Occluded => {
            log::debug!("Surface not ready; skipping frame");
            None
        }
        wgpu::CurrentSurfaceTexture::Outdated | wgpu::CurrentSurfaceTexture::Lost => {
            surface.configure(device, config);
            match surface.get_current_texture() {
                wgpu::CurrentSurfaceTexture::Success(frame)
                | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => Some(frame),
                _ => {
                    log::warn!("Surface unavailable after reconfigure");
                    None
                }
            }
        }
        wgpu::CurrentSurfaceTexture::Validation => {
            log::error!("Surface texture acquisition failed validation");
            None
        }
    }
}

/// Checks the entry point and collects compiler diagnostics for one stage.
fn compile_stage(
    device: &wgpu::Device,
    label: &str,
    stage: &StageSource,
) -> std::result::Result<wgpu::ShaderModule, String> {
    let name = format!("{label}.{}", stage.stage.suffix());
    if matches!(
        stage.stage,
        ShaderStage::TessControl | ShaderStage::TessEvaluation
    ) {
        return Err(format!("{name}: tessellation stages are not supported"));
    }
    let entry = format!("fn {}", stage.stage.entry_point());
    if !stage.source.contains(&entry) {
        return Err(format!(
            "{name}: missing `{} {entry}` entry point",
            stage.stage.attribute()
        ));
    }

    let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&name),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&stage.source)),
    });
    let info = pollster::block_on(module.get_compilation_info());
    let scope_error = pollster::block_on(scope.pop());

    let messages: Vec<String> = info
        .messages
        .iter()
        .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
        .map(|m| match &m.location {
            Some(loc) => format!(
                "{name}:{}:{}: {}",
                loc.line_number, loc.line_position, m.message
            ),
            None => format!("{name}: {}", m.message),
        })
        .collect();
    if !messages.is_empty() {
        return Err(messages.join("\n"));
    }
    if let Some(error) = scope_error {
        return Err(format!("{name}: {error}"));
    }
    Ok(module)
}

impl RenderDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn max_bindless_textures(&self) -> u32 {
        self.bindless.capacity()
    }

    // ---- Buffers -----------------------------------------------------------

    fn create_buffer(
        &mut self,
        label: &str,
        capacity: u64,
        flags: BufferFlags,
    ) -> Result<RawBuffer> {
        let size = capacity
            .max(wgpu::COPY_BUFFER_ALIGNMENT)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let out_of_memory = || EmberError::OutOfDeviceMemory {
            label: label.to_string(),
            requested: capacity,
        };
        if size > self.max_buffer_size {
            return Err(out_of_memory());
        }

        let scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: buffer_usages(flags),
            mapped_at_creation: false,
        });
        if let Some(error) = pollster::block_on(scope.pop()) {
            log::error!("Allocation of '{label}' ({size} bytes) failed: {error}");
            return Err(out_of_memory());
        }
        Ok(self.buffers.insert(BufferEntry {
            buffer,
            flags,
            capacity: size,
            label: label.to_string(),
        }))
    }

    fn write_buffer(&mut self, buffer: RawBuffer, offset: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let end = offset + data.len() as u64;
        {
            let entry = self.buffer(buffer);
            assert!(
                end <= entry.capacity,
                "write of {offset}..{end} past the end of '{}' ({} bytes)",
                entry.label,
                entry.capacity
            );
        }

        let align = wgpu::COPY_BUFFER_ALIGNMENT;
        if offset % align == 0 && data.len() as u64 % align == 0 {
            self.queue.write_buffer(&self.buffer(buffer).buffer, offset, data);
            return;
        }

        // Patch the surrounding aligned window so neighbouring bytes survive.
        let (start, mut window) = self.read_aligned(buffer, offset, data.len() as u64);
        let at = (offset - start) as usize;
        window[at..at + data.len()].copy_from_slice(data);
        self.queue.write_buffer(&self.buffer(buffer).buffer, start, &window);
    }

    fn copy_buffer(&mut self, src: RawBuffer, dst: RawBuffer, size: u64) {
        self.flush_pass();
        let (src, dst) = (self.buffer(src), self.buffer(dst));
        let size = size
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
            .min(src.capacity)
            .min(dst.capacity);
        if size == 0 {
            return;
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Buffer Copy"),
            });
        encoder.copy_buffer_to_buffer(&src.buffer, 0, &dst.buffer, 0, size);
        self.queue.submit(Some(encoder.finish()));
    }

    fn read_buffer(&mut self, buffer: RawBuffer, offset: u64, size: u64) -> Vec<u8> {
        let (start, window) = self.read_aligned(buffer, offset, size);
        let at = (offset - start) as usize;
        window
            .get(at..at + size as usize)
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| vec![0; size as usize])
    }

    fn destroy_buffer(&mut self, buffer: RawBuffer) {
        self.flush_pass();
        let entry = self
            .buffers
            .remove(buffer)
            .unwrap_or_else(|| panic!("double destroy of buffer {buffer:?}"));
        entry.buffer.destroy();
        self.state.targets.retain(|_, bound| *bound != buffer);
        for slot in &mut self.state.storage {
            if *slot == Some(buffer) {
                *slot = None;
            }
        }
        self.group0_cache
            .retain(|key, _| !key.contains(&Some(buffer)));
    }

    fn bind_buffer(&mut self, target: BufferTarget, buffer: RawBuffer) {
        let entry = self.buffer(buffer);
        assert!(
            entry.flags.contains(target.required_flag()),
            "buffer '{}' lacks {:?} for {target:?}",
            entry.label,
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
        let scope = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.levels.max(1),
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(scope.pop()) {
            log::error!("Allocation of texture '{}' failed: {error}", desc.label);
            let texel = u64::from(desc.format.texel_size().unwrap_or(4));
            return Err(EmberError::OutOfDeviceMemory {
                label: desc.label.clone(),
                requested: u64::from(desc.width) * u64::from(desc.height) * texel,
            });
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.textures.insert(TextureEntry {
            texture,
            view,
            desc: desc.clone(),
            resident: None,
        }))
    }

    fn write_texture(&mut self, texture: RawTexture, level: u32, data: &[u8]) {
        let entry = self.texture(texture);
        let Some(texel) = entry.desc.format.texel_size() else {
            log::error!("Texture '{}' has a depth format and cannot be uploaded", entry.desc.label);
            return;
        };
        let width = (entry.desc.width >> level).max(1);
        let height = (entry.desc.height >> level).max(1);
        assert_eq!(
            data.len() as u64,
            u64::from(width) * u64::from(height) * u64::from(texel),
            "texture upload size mismatch"
        );
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * texel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn make_texture_resident(&mut self, texture: RawTexture) -> u64 {
        let entry = self.texture(texture);
        if let Some(handle) = entry.resident {
            return handle;
        }
        if entry.desc.format.is_depth() {
            log::error!("Depth texture '{}' cannot be made resident", entry.desc.label);
            return 0;
        }
        if entry.desc.format == TextureFormat::R32Float && !self.float32_filterable {
            log::error!(
                "Texture '{}' is R32Float and this adapter cannot filter it",
                entry.desc.label
            );
            return 0;
        }
        let Some(handle) = self.bindless.allocate(texture) else {
            log::error!(
                "Bindless texture table exhausted ({} slots)",
                self.bindless.capacity()
            );
            panic!("bindless texture table exhausted");
        };
        if let Some(entry) = self.textures.get_mut(texture) {
            entry.resident = Some(handle);
        }
        handle
    }

    fn destroy_texture(&mut self, texture: RawTexture) {
        self.flush_pass();
        let entry = self
            .textures
            .remove(texture)
            .unwrap_or_else(|| panic!("double destroy of texture {texture:?}"));
        if let Some(handle) = entry.resident {
            self.bindless.release(handle);
        }
        entry.texture.destroy();
    }

    // ---- Framebuffers ------------------------------------------------------

    fn create_framebuffer(&mut self, label: &str) -> RawFramebuffer {
        self.framebuffers.insert(FramebufferEntry {
            label: label.to_string(),
            ..FramebufferEntry::default()
        })
    }

    fn framebuffer_texture(
        &mut self,
        framebuffer: RawFramebuffer,
        point: AttachmentPoint,
        texture: Option<RawTexture>,
        level: u32,
    ) {
        if self.pending.as_ref().is_some_and(|p| p.target == Some(framebuffer)) {
            self.flush_pass();
        }
        let entry = self.framebuffer_mut(framebuffer);
        match texture {
            Some(texture) => {
                entry.attachments.insert(point, (texture, level));
            }
            None => {
                entry.attachments.remove(&point);
            }
        }
    }

    fn framebuffer_draw_buffers(&mut self, framebuffer: RawFramebuffer, points: &[AttachmentPoint]) {
        self.framebuffer_mut(framebuffer).draw_buffers = points.iter().copied().collect();
    }

    fn destroy_framebuffer(&mut self, framebuffer: RawFramebuffer) {
        self.flush_pass();
        self.framebuffers
            .remove(framebuffer)
            .unwrap_or_else(|| panic!("double destroy of framebuffer {framebuffer:?}"));
        if self.state.framebuffer == Some(framebuffer) {
            self.state.framebuffer = None;
        }
    }

    // ---- Vertex arrays -----------------------------------------------------

    fn create_vertex_array(&mut self, _label: &str) -> RawVertexArray {
        self.vertex_arrays.insert(VertexArrayEntry::default())
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
        let mut entry = ProgramEntry {
            label: label.to_string(),
            vertex: None,
            fragment: None,
            compute: None,
            uniforms: Vec::new(),
        };
        let mut errors = Vec::new();
        for stage in stages {
            match compile_stage(&self.device, label, stage) {
                Ok(module) => match stage.stage {
                    ShaderStage::Vertex => entry.vertex = Some(module),
                    ShaderStage::Fragment => entry.fragment = Some(module),
                    ShaderStage::Compute => entry.compute = Some(module),
                    ShaderStage::TessControl | ShaderStage::TessEvaluation => {}
                },
                Err(log) => errors.push(log),
            }
        }
        if !errors.is_empty() {
            return Err(errors.join("\n"));
        }
        if entry.compute.is_some() {
            log::debug!("Program '{label}' is a compute program");
        }
        Ok(self.programs.insert(entry))
    }

    fn program_uniforms(&mut self, program: RawProgram, data: &[u8]) {
        assert!(data.len() <= MAX_UNIFORM_BLOCK_SIZE, "uniform block too large");
        let entry = self
            .programs
            .get_mut(program)
            .unwrap_or_else(|| panic!("unknown program {program:?}"));
        entry.uniforms.clear();
        entry.uniforms.extend_from_slice(data);
    }

    fn destroy_program(&mut self, program: RawProgram) {
        self.programs
            .remove(program)
            .unwrap_or_else(|| panic!("double destroy of program {program:?}"));
        self.pipelines.evict_program(program);
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    // ---- State & draws -----------------------------------------------------

    fn bind_framebuffer(&mut self, framebuffer: Option<RawFramebuffer>) {
        if let Some(fb) = framebuffer {
            self.framebuffer_mut(fb);
        }
        if self.pending.as_ref().is_some_and(|p| p.target != framebuffer) {
            self.flush_pass();
        }
        self.state.framebuffer = framebuffer;
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.state.viewport = (width, height);
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: Option<f32>) {
        if self.pending.as_ref().is_some_and(|p| !p.draws.is_empty()) {
            self.flush_pass();
        }
        let pass = self.pass_mut();
        if color.is_some() {
            pass.clear_color = color;
        }
        if depth.is_some() {
            pass.clear_depth = depth;
        }
    }

    fn set_blend(&mut self, blend: BlendMode) {
        self.state.blend = blend;
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
    }

    fn use_program(&mut self, program: RawProgram) {
        assert!(
            self.programs.contains_key(program),
            "unknown program {program:?}"
        );
        self.state.program = Some(program);
    }

    fn bind_vertex_array(&mut self, vao: RawVertexArray) {
        self.vertex_array_mut(vao);
        self.state.vertex_array = Some(vao);
    }

    fn memory_barrier(&mut self, barriers: MemoryBarrier) {
        // Queue writes land before the next submission; nothing to insert.
        log::trace!("memory barrier {barriers:?}");
    }

    fn multi_draw_elements_indirect(&mut self, offset: u64, count: u32) {
        if count == 0 {
            return;
        }
        let Some(indirect) = self.state.targets.get(&BufferTarget::DrawIndirect).copied() else {
            panic!("multi-draw with no indirect buffer bound");
        };
        let Some(vao) = self.state.vertex_array else {
            panic!("multi-draw with no vertex array bound");
        };
        let vao = &self.vertex_arrays[vao];
        let Some(index_buffer) = vao.index_buffer else {
            panic!("multi-draw with no index buffer on the bound vertex array");
        };
        let vertex_buffers = vao
            .bindings
            .iter()
            .map(|(&slot, &(buffer, base, _))| (slot, self.buffer(buffer).buffer.clone(), base))
            .collect();

        self.record(DrawKind::MultiIndirect {
            vertex_buffers,
            index_buffer: self.buffer(index_buffer).buffer.clone(),
            indirect: self.buffer(indirect).buffer.clone(),
            offset,
            count,
        });
    }

    fn draw_fullscreen_triangle(&mut self) {
        self.record(DrawKind::FullscreenTriangle);
    }

    // ---- Frame -------------------------------------------------------------

    fn default_target_size(&self) -> (u32, u32) {
        self.default_target.size()
    }

    fn resize_default_target(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.flush_pass();
        match &mut self.default_target {
            DefaultTarget::Surface {
                surface,
                config,
                frame,
            } => {
                *frame = None;
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            DefaultTarget::Offscreen { texture, size } => {
                *size = (width, height);
                *texture = create_offscreen(&self.device, *size);
            }
        }
    }

    fn present(&mut self) {
        self.flush_pass();
        if let DefaultTarget::Surface { frame, .. } = &mut self.default_target
            && let Some(frame) = frame.take()
        {
            frame.present();
        }
        self.uniforms.reset();
        self.state.framebuffer = None;
        self.frames_presented += 1;
    }
}
