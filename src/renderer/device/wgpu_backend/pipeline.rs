//! Render pipeline cache.
//!
//! A pipeline is the product of the bound program and the fixed-function
//! state at draw time. Draws look their pipeline up by [`PipelineKey`] and
//! compile on first use.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::convert::{blend_state, vertex_format};
use crate::renderer::device::{BlendMode, RawProgram, VertexAttribute};

/// One vertex buffer slot: stride and the attributes read from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct VertexSlotLayout {
    pub slot: u32,
    pub stride: u32,
    pub attributes: SmallVec<[VertexAttribute; 4]>,
}

/// A color target: format and whether draws write to it.
pub(super) type ColorTargetKey = Option<(wgpu::TextureFormat, bool)>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub program: RawProgram,
    /// Empty for draws that take no vertex input.
    pub vertex: SmallVec<[VertexSlotLayout; 2]>,
    pub colors: SmallVec<[ColorTargetKey; 4]>,
    pub depth: Option<wgpu::TextureFormat>,
    pub blend: BlendMode,
    pub depth_test: bool,
}

/// Shader modules of a render program.
pub(super) struct ProgramModules<'a> {
    pub label: &'a str,
    pub vertex: &'a wgpu::ShaderModule,
    pub fragment: Option<&'a wgpu::ShaderModule>,
}

#[derive(Default)]
pub(super) struct PipelineCache {
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    /// Returns the cached pipeline or compiles it. `None` when the device
    /// rejects the combination; the error is logged.
    pub(super) fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::PipelineLayout,
        modules: &ProgramModules<'_>,
        key: &PipelineKey,
    ) -> Option<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Some(pipeline.clone());
        }

        let scope = device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = create_pipeline(device, layout, modules, key);
        if let Some(error) = pollster::block_on(scope.pop()) {
            log::error!("Pipeline for '{}' rejected: {error}", modules.label);
            return None;
        }
        log::debug!(
            "Compiled pipeline '{}' ({} cached)",
            modules.label,
            self.pipelines.len() + 1
        );
        self.pipelines.insert(key.clone(), pipeline.clone());
        Some(pipeline)
    }

    /// Drops every pipeline built from `program`.
    pub(super) fn evict_program(&mut self, program: RawProgram) {
        self.pipelines.retain(|key, _| key.program != program);
    }
}

fn create_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    modules: &ProgramModules<'_>,
    key: &PipelineKey,
) -> wgpu::RenderPipeline {
    // Slots are positional; gaps get an empty layout.
    let slot_count = key.vertex.iter().map(|s| s.slot + 1).max().unwrap_or(0) as usize;
    let mut attributes: Vec<Vec<wgpu::VertexAttribute>> = vec![Vec::new(); slot_count];
    let mut strides = vec![0u64; slot_count];
    for slot in &key.vertex {
        strides[slot.slot as usize] = u64::from(slot.stride);
        attributes[slot.slot as usize] = slot
            .attributes
            .iter()
            .map(|attr| wgpu::VertexAttribute {
                format: vertex_format(attr),
                offset: u64::from(attr.offset),
                shader_location: attr.location,
            })
            .collect();
    }
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = attributes
        .iter()
        .zip(&strides)
        .map(|(attributes, &array_stride)| wgpu::VertexBufferLayout {
            array_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        })
        .collect();

    let targets: SmallVec<[Option<wgpu::ColorTargetState>; 4]> = key
        .colors
        .iter()
        .map(|target| {
            target.map(|(format, write)| wgpu::ColorTargetState {
                format,
                blend: blend_state(key.blend, format),
                write_mask: if write {
                    wgpu::ColorWrites::ALL
                } else {
                    wgpu::ColorWrites::empty()
                },
            })
        })
        .collect();

    let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
        format,
        depth_write_enabled: Some(key.depth_test),
        depth_compare: Some(if key.depth_test {
            wgpu::CompareFunction::Less
        } else {
            wgpu::CompareFunction::Always
        }),
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(modules.label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: modules.vertex,
            entry_point: Some("vs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &buffers,
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        fragment: modules.fragment.map(|module| wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &targets,
        }),
        multiview_mask: None,
        cache: None,
    })
}
