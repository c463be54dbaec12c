//! Engine enum to `wgpu` enum conversions.

use crate::renderer::device::{
    AttributeKind, BlendMode, BufferFlags, FilterMode, TextureFormat, VertexAttribute, WrapMode,
};

pub(super) fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

pub(super) fn filter_mode(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub(super) fn address_mode(wrap: WrapMode) -> wgpu::AddressMode {
    match wrap {
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

/// Every buffer can be copied from and written to; the rest follows `flags`.
pub(super) fn buffer_usages(flags: BufferFlags) -> wgpu::BufferUsages {
    let mut usage = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    if flags.contains(BufferFlags::VERTEX) {
        usage |= wgpu::BufferUsages::VERTEX;
    }
    if flags.contains(BufferFlags::INDEX) {
        usage |= wgpu::BufferUsages::INDEX;
    }
    if flags.contains(BufferFlags::INDIRECT) {
        usage |= wgpu::BufferUsages::INDIRECT;
    }
    if flags.contains(BufferFlags::STORAGE) {
        usage |= wgpu::BufferUsages::STORAGE;
    }
    if flags.contains(BufferFlags::UNIFORM) {
        usage |= wgpu::BufferUsages::UNIFORM;
    }
    usage
}

pub(super) fn vertex_format(attribute: &VertexAttribute) -> wgpu::VertexFormat {
    use wgpu::VertexFormat as F;
    match (attribute.kind, attribute.components) {
        (AttributeKind::Float32, 1) => F::Float32,
        (AttributeKind::Float32, 2) => F::Float32x2,
        (AttributeKind::Float32, 3) => F::Float32x3,
        (AttributeKind::Float32, _) => F::Float32x4,
        (AttributeKind::Sint32, 1) => F::Sint32,
        (AttributeKind::Sint32, 2) => F::Sint32x2,
        (AttributeKind::Sint32, 3) => F::Sint32x3,
        (AttributeKind::Sint32, _) => F::Sint32x4,
        (AttributeKind::Uint32, 1) => F::Uint32,
        (AttributeKind::Uint32, 2) => F::Uint32x2,
        (AttributeKind::Uint32, 3) => F::Uint32x3,
        (AttributeKind::Uint32, _) => F::Uint32x4,
    }
}

const ADDITIVE: wgpu::BlendComponent = wgpu::BlendComponent {
    src_factor: wgpu::BlendFactor::One,
    dst_factor: wgpu::BlendFactor::One,
    operation: wgpu::BlendOperation::Add,
};

/// `None` for formats that cannot be blended.
pub(super) fn blend_state(
    mode: BlendMode,
    format: wgpu::TextureFormat,
) -> Option<wgpu::BlendState> {
    if format == wgpu::TextureFormat::R32Float {
        return None;
    }
    match mode {
        BlendMode::Replace => Some(wgpu::BlendState::REPLACE),
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Additive => Some(wgpu::BlendState {
            color: ADDITIVE,
            alpha: ADDITIVE,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_components_select_the_vertex_format() {
        assert_eq!(
            vertex_format(&VertexAttribute::float(0, 0, 3)),
            wgpu::VertexFormat::Float32x3
        );
        let ids = VertexAttribute {
            kind: AttributeKind::Uint32,
            ..VertexAttribute::float(1, 0, 2)
        };
        assert_eq!(vertex_format(&ids), wgpu::VertexFormat::Uint32x2);
    }

    #[test]
    fn buffers_are_always_copyable() {
        let usage = buffer_usages(BufferFlags::INDIRECT);
        assert!(usage.contains(wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_SRC));
        assert!(!usage.contains(wgpu::BufferUsages::VERTEX));
    }

    #[test]
    fn float32_targets_never_blend() {
        assert!(blend_state(BlendMode::Additive, wgpu::TextureFormat::R32Float).is_none());
        assert!(blend_state(BlendMode::Additive, wgpu::TextureFormat::Rgba16Float).is_some());
    }
}
