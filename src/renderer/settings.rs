//! Renderer Settings
//!
//! Configuration consumed once by [`Renderer::new`](super::Renderer::new)
//! and by the device backends.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ember::renderer::{BloomSettings, RendererSettings};
//!
//! let settings = RendererSettings {
//!     shader_dir: "assets/shaders".into(),
//!     bloom: BloomSettings { mip_count: 6, ..Default::default() },
//!     ..Default::default()
//! };
//!
//! // Or from a file; missing fields keep their defaults.
//! let settings = RendererSettings::from_json_file("ember.json")?;
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::Result;

// ---------------------------------------------------------------------------
// BloomSettings
// ---------------------------------------------------------------------------

/// Bloom post-process parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomSettings {
    pub enabled: bool,
    /// Number of downsample levels below the HDR target. Clamped so the
    /// smallest level is at least 1x1.
    pub mip_count: u32,
    /// Weight of the blurred chain when composited.
    pub strength: f32,
    /// Luminance below which pixels do not contribute.
    pub threshold: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mip_count: 5,
            strength: 0.04,
            threshold: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// PowerPreference
// ---------------------------------------------------------------------------

/// GPU adapter selection strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(value: PowerPreference) -> Self {
        match value {
            PowerPreference::HighPerformance => Self::HighPerformance,
            PowerPreference::LowPower => Self::LowPower,
        }
    }
}

// ---------------------------------------------------------------------------
// RendererSettings
// ---------------------------------------------------------------------------

/// Global configuration for renderer initialization.
///
/// | Field                   | Description                                | Default          |
/// |-------------------------|--------------------------------------------|------------------|
/// | `shader_dir`            | Directory scanned for `<name>.<stage>.wgsl`| `shaders`        |
/// | `clear_color`           | Scene clear color (linear RGBA)            | `[0, 0, 0, 1]`   |
/// | `geometry_capacity`     | Initial vertex buffer bytes                | 1 MiB            |
/// | `index_capacity`        | Initial index buffer bytes                 | 256 KiB          |
/// | `indirect_capacity`     | Initial indirect command bytes             | 4 KiB            |
/// | `payload_capacity`      | Initial instance payload bytes             | 64 KiB           |
/// | `bloom`                 | Bloom parameters                           | enabled, 5 mips  |
/// | `exposure`              | Tone-mapping exposure                      | `1.0`            |
/// | `vsync`                 | Vertical sync on surface backends          | `true`           |
/// | `power_preference`      | Adapter selection                          | `HighPerformance`|
/// | `max_bindless_textures` | Size of the bindless texture table         | `256`            |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    // === Assets ===
    pub shader_dir: PathBuf,

    // === Frame ===
    pub clear_color: [f32; 4],
    pub exposure: f32,
    pub bloom: BloomSettings,

    // === Buffers ===
    pub geometry_capacity: u64,
    pub index_capacity: u64,
    pub indirect_capacity: u64,
    pub payload_capacity: u64,

    // === Device ===
    pub vsync: bool,
    pub power_preference: PowerPreference,
    pub max_bindless_textures: u32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            exposure: 1.0,
            bloom: BloomSettings::default(),
            geometry_capacity: 1 << 20,
            index_capacity: 256 << 10,
            indirect_capacity: 4 << 10,
            payload_capacity: 64 << 10,
            vsync: true,
            power_preference: PowerPreference::default(),
            max_bindless_textures: 256,
        }
    }
}

impl RendererSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Shader directory bundled with the crate.
    #[must_use]
    pub fn builtin_shader_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings =
            RendererSettings::from_json_str(r#"{ "exposure": 2.5, "bloom": { "mip_count": 3 } }"#)
                .unwrap();
        assert_eq!(settings.exposure, 2.5);
        assert_eq!(settings.bloom.mip_count, 3);
        assert!(settings.bloom.enabled);
        assert_eq!(settings.max_bindless_textures, 256);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(RendererSettings::from_json_str("{ exposure: }").is_err());
    }
}
