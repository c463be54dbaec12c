//! Shader Programs
//!
//! # Discovery
//!
//! A program is named by a base name. Every file `<dir>/<name>.<suffix>.wgsl`
//! whose suffix names a stage (`vert`, `frag`, `comp`, `tesc`, `tese`) is
//! included. Vertex + fragment is the minimum raster program; a compute stage
//! cannot be combined with raster stages.
//!
//! # Errors
//!
//! Initial construction returns discovery and compile failures to the caller,
//! with the backend's diagnostic text. [`ShaderProgram::recompile`] never
//! fails outward: a broken edit is logged and the previous program, with its
//! uniform values, stays in use.
//!
//! # Uniforms
//!
//! [`ShaderProgram::set`] resolves a member of the program's `Uniforms` block
//! by name and uploads a typed value; the value's Rust type picks the
//! encoding.

use std::path::{Path, PathBuf};

use smallvec::SmallVec;

use crate::errors::{EmberError, Result};
use crate::renderer::core::handle::{GpuResource, Handle, IdResource, generate_resource_id};
use crate::renderer::core::uniforms::{UniformLayout, UniformType, UniformValue};
use crate::renderer::device::{RawProgram, RenderDevice, ShaderStage, StageSource};

/// Reads every stage file of `name` found in `dir`.
pub fn discover_stages(dir: &Path, name: &str) -> Result<Vec<StageSource>> {
    let mut sources = Vec::new();
    for stage in ShaderStage::ALL {
        let path = dir.join(format!("{name}.{}.wgsl", stage.suffix()));
        if path.is_file() {
            sources.push(StageSource {
                stage,
                source: std::fs::read_to_string(&path)?,
            });
        }
    }

    if sources.is_empty() {
        return Err(EmberError::ShaderNotFound {
            program: name.to_string(),
            dir: dir.to_path_buf(),
        });
    }

    let has = |stage: ShaderStage| sources.iter().any(|s| s.stage == stage);
    let invalid = |reason: &str| EmberError::InvalidProgramStages {
        program: name.to_string(),
        reason: reason.to_string(),
    };
    if has(ShaderStage::Compute) {
        if sources.len() > 1 {
            return Err(invalid("compute cannot be combined with raster stages"));
        }
    } else if !has(ShaderStage::Vertex) || !has(ShaderStage::Fragment) {
        return Err(invalid("vertex and fragment stages are required"));
    }

    Ok(sources)
}

/// Result of compiling one program from disk.
struct Compiled {
    raw: RawProgram,
    stages: SmallVec<[ShaderStage; 2]>,
    layout: UniformLayout,
}

fn compile(device: &mut dyn RenderDevice, dir: &Path, name: &str) -> Result<Compiled> {
    let sources = discover_stages(dir, name)?;

    let mut layout: Option<UniformLayout> = None;
    for source in &sources {
        let stage_layout =
            UniformLayout::from_wgsl(&source.source).map_err(|message| EmberError::UniformLayout {
                program: name.to_string(),
                message,
            })?;
        if stage_layout.is_empty() {
            continue;
        }
        match &layout {
            Some(existing) if *existing != stage_layout => {
                return Err(EmberError::UniformLayout {
                    program: name.to_string(),
                    message: format!(
                        "`Uniforms` differs between stages ({})",
                        source.stage.suffix()
                    ),
                });
            }
            Some(_) => {}
            None => layout = Some(stage_layout),
        }
    }

    let raw = device
        .create_program(name, &sources)
        .map_err(|log| EmberError::ShaderCompile {
            program: name.to_string(),
            log,
        })?;

    Ok(Compiled {
        raw,
        stages: sources.iter().map(|s| s.stage).collect(),
        layout: layout.unwrap_or_default(),
    })
}

pub struct ShaderProgram {
    id: u32,
    name: String,
    dir: PathBuf,
    raw: RawProgram,
    stages: SmallVec<[ShaderStage; 2]>,
    layout: UniformLayout,
    uniforms: Vec<u8>,
}

impl ShaderProgram {
    /// Discovers, compiles and links the program `name` from `dir`.
    pub fn from_name(
        device: &mut dyn RenderDevice,
        dir: impl AsRef<Path>,
        name: &str,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let compiled = compile(device, dir, name)?;
        let uniforms = vec![0; compiled.layout.size() as usize];
        if !uniforms.is_empty() {
            device.program_uniforms(compiled.raw, &uniforms);
        }
        log::debug!(
            "Compiled program '{name}' ({:?}, {} uniform bytes)",
            compiled.stages,
            uniforms.len()
        );
        Ok(Self {
            id: generate_resource_id(),
            name: name.to_string(),
            dir: dir.to_path_buf(),
            raw: compiled.raw,
            stages: compiled.stages,
            layout: compiled.layout,
            uniforms,
        })
    }

    /// Makes this the current program.
    pub fn use_program(&self, device: &mut dyn RenderDevice) {
        device.use_program(self.raw);
    }

    /// Uploads `value` to the uniform `name`.
    ///
    /// Returns `false` if the program has no such uniform or its type differs.
    pub fn set(
        &mut self,
        device: &mut dyn RenderDevice,
        name: &str,
        value: impl Into<UniformValue>,
    ) -> bool {
        let value = value.into();
        let Some(entry) = self.layout.entry(name) else {
            log::trace!("Program '{}' has no uniform '{name}'", self.name);
            return false;
        };
        if entry.ty != value.ty() {
            log::warn!(
                "Uniform '{name}' of program '{}' is {:?}, got {:?}",
                self.name,
                entry.ty,
                value.ty()
            );
            return false;
        }
        value.write_to(&mut self.uniforms[entry.offset as usize..]);
        device.program_uniforms(self.raw, &self.uniforms);
        true
    }

    /// Reads back the CPU copy of a uniform.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<UniformValue> {
        let entry = self.layout.entry(name)?;
        let bytes = &self.uniforms[entry.offset as usize..];
        let floats = |n: usize| -> Vec<f32> {
            bytes[..n * 4]
                .chunks_exact(4)
                .map(bytemuck::pod_read_unaligned::<f32>)
                .collect()
        };
        Some(match entry.ty {
            UniformType::Int => UniformValue::Int(bytemuck::pod_read_unaligned(&bytes[..4])),
            UniformType::Float => UniformValue::Float(bytemuck::pod_read_unaligned(&bytes[..4])),
            UniformType::Vec2 => UniformValue::Vec2(glam::Vec2::from_slice(&floats(2))),
            UniformType::Vec3 => UniformValue::Vec3(glam::Vec3::from_slice(&floats(3))),
            UniformType::Vec4 => UniformValue::Vec4(glam::Vec4::from_slice(&floats(4))),
            UniformType::Mat4 => UniformValue::Mat4(glam::Mat4::from_cols_slice(&floats(16))),
        })
    }

    /// Rebuilds the program from its source files.
    ///
    /// On success the new program replaces the old one and uniform values
    /// whose name and type survived are carried over. On failure the error is
    /// logged and nothing changes. Returns whether the swap happened.
    pub fn recompile(&mut self, device: &mut dyn RenderDevice) -> bool {
        let compiled = match compile(device, &self.dir, &self.name) {
            Ok(compiled) => compiled,
            Err(err) => {
                log::error!("Hot reload of '{}' failed, keeping previous program: {err}", self.name);
                return false;
            }
        };

        let mut uniforms = vec![0; compiled.layout.size() as usize];
        for entry in compiled.layout.entries() {
            if let Some(old) = self.layout.entry(&entry.name)
                && old.ty == entry.ty
            {
                let len = entry.ty.size() as usize;
                let (src, dst) = (old.offset as usize, entry.offset as usize);
                uniforms[dst..dst + len].copy_from_slice(&self.uniforms[src..src + len]);
            }
        }
        if !uniforms.is_empty() {
            device.program_uniforms(compiled.raw, &uniforms);
        }

        device.destroy_program(self.raw);
        self.raw = compiled.raw;
        self.stages = compiled.stages;
        self.layout = compiled.layout;
        self.uniforms = uniforms;
        log::info!("Reloaded program '{}'", self.name);
        true
    }

    #[inline]
    #[must_use]
    pub fn handle(&self) -> Handle<ShaderProgram> {
        self.res_handle()
    }

    #[must_use]
    pub fn raw(&self) -> RawProgram {
        self.raw
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn stages(&self) -> &[ShaderStage] {
        &self.stages
    }

    #[must_use]
    pub fn is_compute(&self) -> bool {
        self.stages.contains(&ShaderStage::Compute)
    }

    #[must_use]
    pub fn uniform_layout(&self) -> &UniformLayout {
        &self.layout
    }
}

impl IdResource for ShaderProgram {
    fn res_id(&self) -> u32 {
        self.id
    }
}

impl GpuResource for ShaderProgram {
    fn release(self, device: &mut dyn RenderDevice) {
        device.destroy_program(self.raw);
    }
}

impl std::fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stages", &self.stages)
            .field("uniform_bytes", &self.uniforms.len())
            .finish_non_exhaustive()
    }
}
