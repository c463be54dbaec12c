//! Uniform Block Layout
//!
//! Programs expose their per-draw parameters through one WGSL struct named
//! `Uniforms`. Rather than trusting any host-side struct layout, the block is
//! described by an explicit table computed from the declared `(name, type)`
//! pairs with the uniform address-space rules:
//!
//! | Type        | Align | Size |
//! |-------------|-------|------|
//! | `i32`/`f32` | 4     | 4    |
//! | `vec2<f32>` | 8     | 8    |
//! | `vec3<f32>` | 16    | 12   |
//! | `vec4<f32>` | 16    | 16   |
//! | `mat4x4<f32>`| 16   | 64   |
//!
//! The block size is rounded up to 16 bytes.

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::renderer::device::MAX_UNIFORM_BLOCK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformType {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformType {
    #[must_use]
    pub const fn align(self) -> u32 {
        match self {
            Self::Int | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat4 => 16,
        }
    }

    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            Self::Int | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
        }
    }

    /// Parses a WGSL type name.
    #[must_use]
    pub fn from_wgsl(ty: &str) -> Option<Self> {
        let ty: String = ty.chars().filter(|c| !c.is_whitespace()).collect();
        Some(match ty.as_str() {
            "i32" => Self::Int,
            "f32" => Self::Float,
            "vec2<f32>" | "vec2f" => Self::Vec2,
            "vec3<f32>" | "vec3f" => Self::Vec3,
            "vec4<f32>" | "vec4f" => Self::Vec4,
            "mat4x4<f32>" | "mat4x4f" => Self::Mat4,
            _ => return None,
        })
    }
}

/// A typed value for [`ShaderProgram::set`](super::program::ShaderProgram::set).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    #[must_use]
    pub fn ty(&self) -> UniformType {
        match self {
            Self::Int(_) => UniformType::Int,
            Self::Float(_) => UniformType::Float,
            Self::Vec2(_) => UniformType::Vec2,
            Self::Vec3(_) => UniformType::Vec3,
            Self::Vec4(_) => UniformType::Vec4,
            Self::Mat4(_) => UniformType::Mat4,
        }
    }

    /// Writes the value's bytes to the start of `dst`.
    pub fn write_to(&self, dst: &mut [u8]) {
        match self {
            Self::Int(v) => dst[..4].copy_from_slice(bytemuck::bytes_of(v)),
            Self::Float(v) => dst[..4].copy_from_slice(bytemuck::bytes_of(v)),
            Self::Vec2(v) => dst[..8].copy_from_slice(bytemuck::bytes_of(v)),
            Self::Vec3(v) => dst[..12].copy_from_slice(bytemuck::bytes_of(v)),
            Self::Vec4(v) => dst[..16].copy_from_slice(bytemuck::bytes_of(v)),
            Self::Mat4(v) => dst[..64].copy_from_slice(bytemuck::bytes_of(v)),
        }
    }
}

macro_rules! impl_from_uniform {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_uniform! {
    i32 => Int,
    f32 => Float,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat4 => Mat4,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformEntry {
    pub name: String,
    pub ty: UniformType,
    pub offset: u32,
}

/// Byte layout of a `Uniforms` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformLayout {
    entries: Vec<UniformEntry>,
    size: u32,
}

impl UniformLayout {
    /// Lays out `(name, type)` pairs in declaration order.
    pub fn build<'a>(
        members: impl IntoIterator<Item = (&'a str, UniformType)>,
    ) -> Result<Self, String> {
        let mut entries = Vec::new();
        let mut cursor = 0u32;
        for (name, ty) in members {
            if entries.iter().any(|e: &UniformEntry| e.name == name) {
                return Err(format!("duplicate member `{name}`"));
            }
            cursor = cursor.next_multiple_of(ty.align());
            entries.push(UniformEntry {
                name: name.to_string(),
                ty,
                offset: cursor,
            });
            cursor += ty.size();
        }
        let size = if entries.is_empty() {
            0
        } else {
            cursor.next_multiple_of(16)
        };
        if size as usize > MAX_UNIFORM_BLOCK_SIZE {
            return Err(format!(
                "block is {size} bytes, limit is {MAX_UNIFORM_BLOCK_SIZE}"
            ));
        }
        Ok(Self { entries, size })
    }

    /// Extracts the `struct Uniforms { .. }` declaration from WGSL source.
    ///
    /// Sources without the struct produce an empty layout.
    pub fn from_wgsl(source: &str) -> Result<Self, String> {
        let Some(start) = source.find("struct Uniforms") else {
            return Ok(Self::default());
        };
        let body = &source[start..];
        let open = body.find('{').ok_or("`struct Uniforms` has no body")?;
        let close = body.find('}').ok_or("`struct Uniforms` is not closed")?;
        let body = &body[open + 1..close];

        let mut members = Vec::new();
        for line in body.lines() {
            let line = line.split("//").next().unwrap_or_default();
            for decl in line.split(',') {
                let decl = decl.trim();
                if decl.is_empty() {
                    continue;
                }
                if decl.starts_with('@') {
                    return Err(format!("member attributes are not supported: `{decl}`"));
                }
                let (name, ty) = decl
                    .split_once(':')
                    .ok_or_else(|| format!("malformed member `{decl}`"))?;
                let ty_name = ty.trim();
                let ty = UniformType::from_wgsl(ty_name)
                    .ok_or_else(|| format!("unsupported type `{ty_name}`"))?;
                members.push((name.trim(), ty));
            }
        }
        Self::build(members)
    }

    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&UniformEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    #[must_use]
    pub fn entries(&self) -> &[UniformEntry] {
        &self.entries
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_followed_by_scalar_packs_into_tail() {
        let layout = UniformLayout::build([
            ("color", UniformType::Vec3),
            ("intensity", UniformType::Float),
        ])
        .unwrap();
        assert_eq!(layout.entry("color").unwrap().offset, 0);
        assert_eq!(layout.entry("intensity").unwrap().offset, 12);
        assert_eq!(layout.size(), 16);
    }

    #[test]
    fn matrix_is_aligned_to_16() {
        let layout = UniformLayout::build([
            ("flag", UniformType::Int),
            ("model", UniformType::Mat4),
            ("uv", UniformType::Vec2),
        ])
        .unwrap();
        assert_eq!(layout.entry("model").unwrap().offset, 16);
        assert_eq!(layout.entry("uv").unwrap().offset, 80);
        assert_eq!(layout.size(), 96);
    }

    #[test]
    fn parses_wgsl_struct() {
        let src = "
            struct Uniforms {
                view_proj: mat4x4<f32>, // camera
                exposure: f32,
                texel: vec2f,
            };
            @group(0) @binding(0) var<uniform> u: Uniforms;
        ";
        let layout = UniformLayout::from_wgsl(src).unwrap();
        assert_eq!(layout.entries().len(), 3);
        assert_eq!(layout.entry("exposure").unwrap().offset, 64);
        assert_eq!(layout.entry("texel").unwrap().offset, 72);
        assert_eq!(layout.size(), 80);
    }

    #[test]
    fn rejects_unsupported_types() {
        let err = UniformLayout::from_wgsl("struct Uniforms { m: mat3x3<f32> }").unwrap_err();
        assert!(err.contains("mat3x3"));
    }

    #[test]
    fn missing_struct_is_empty_layout() {
        assert!(UniformLayout::from_wgsl("@vertex fn vs_main() {}").unwrap().is_empty());
    }
}
