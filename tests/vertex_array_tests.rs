//! Vertex Array Tests
//!
//! Tests for:
//! - configure_binding / configure_ebo: device state mirrors the binding
//! - configure_attributes: automatic packed offsets, explicit offsets kept
//! - Buffer growth: bindings follow the new raw id with stride and offset kept
//! - Invalid attribute sets panic

use ember::prelude::*;
use ember::renderer::core::{GpuBuffer, VertexArray};
use ember::renderer::device::{AttributeKind, BufferFlags, VertexAttribute};

struct Fixture {
    device: HeadlessDevice,
    vertices: GpuBuffer,
    indices: GpuBuffer,
    vao: VertexArray,
}

fn fixture() -> Fixture {
    let mut device = HeadlessDevice::default();
    let vertices = GpuBuffer::new(&mut device, "v", BufferFlags::VERTEX, 64);
    let indices = GpuBuffer::new(&mut device, "i", BufferFlags::INDEX, 16);
    let vao = VertexArray::new(&mut device, "test");
    Fixture {
        device,
        vertices,
        indices,
        vao,
    }
}

// ============================================================================
// Attribute Offset Tests
// ============================================================================

#[test]
fn offsets_are_packed_in_declaration_order() {
    let Fixture {
        mut device,
        vertices,
        mut vao,
        ..
    } = fixture();
    vao.configure_binding(&mut device, 0, &vertices, Vertex::STRIDE, 0);

    vao.configure_attributes(&mut device, &Vertex::attributes(0));

    let offsets: Vec<u32> = vao.attributes().iter().map(|a| a.offset).collect();
    assert_eq!(offsets, [0, 12, 24]);
    let recorded: Vec<u32> = device
        .attributes_of(vao.raw())
        .iter()
        .map(|a| a.offset)
        .collect();
    assert_eq!(recorded, [0, 12, 24]);
}

#[test]
fn offsets_restart_per_binding() {
    let Fixture {
        mut device,
        vertices,
        mut vao,
        ..
    } = fixture();
    let colors = GpuBuffer::new(&mut device, "c", BufferFlags::VERTEX, 64);
    vao.configure_binding(&mut device, 0, &vertices, 12, 0);
    vao.configure_binding(&mut device, 1, &colors, 16, 0);

    vao.configure_attributes(
        &mut device,
        &[
            VertexAttribute::float(0, 0, 3),
            VertexAttribute::float(1, 1, 4),
            VertexAttribute::float(2, 1, 2),
        ],
    );

    let offsets: Vec<(u32, u32)> = vao
        .attributes()
        .iter()
        .map(|a| (a.location, a.offset))
        .collect();
    assert_eq!(offsets, [(0, 0), (1, 0), (2, 16)]);
}

#[test]
fn explicit_offsets_are_kept() {
    let Fixture {
        mut device,
        vertices,
        mut vao,
        ..
    } = fixture();
    vao.configure_binding(&mut device, 0, &vertices, 32, 0);

    vao.configure_attributes(
        &mut device,
        &[
            VertexAttribute::float(0, 0, 3).with_offset(16),
            VertexAttribute::float(1, 0, 2),
        ],
    );

    let offsets: Vec<u32> = vao.attributes().iter().map(|a| a.offset).collect();
    assert_eq!(offsets, [16, 0]);
}

#[test]
#[should_panic(expected = "unconfigured binding")]
fn attribute_on_unknown_binding_panics() {
    let Fixture {
        mut device,
        mut vao,
        ..
    } = fixture();
    vao.configure_attributes(&mut device, &[VertexAttribute::float(0, 3, 3)]);
}

#[test]
#[should_panic(expected = "unsupported vertex attribute format")]
fn five_component_attribute_panics() {
    let Fixture {
        mut device,
        vertices,
        mut vao,
        ..
    } = fixture();
    vao.configure_binding(&mut device, 0, &vertices, 20, 0);
    vao.configure_attributes(&mut device, &[VertexAttribute::float(0, 0, 5)]);
}

#[test]
#[should_panic(expected = "automatic offsets require float attributes")]
fn integer_attribute_on_auto_path_panics() {
    let Fixture {
        mut device,
        vertices,
        mut vao,
        ..
    } = fixture();
    vao.configure_binding(&mut device, 0, &vertices, 4, 0);
    let attribute = VertexAttribute {
        kind: AttributeKind::Uint32,
        ..VertexAttribute::float(0, 0, 1)
    };
    vao.configure_attributes(&mut device, &[attribute]);
}

// ============================================================================
// Rebinding Tests
// ============================================================================

#[test]
fn configure_mirrors_binding_and_index_buffer() {
    let Fixture {
        mut device,
        vertices,
        indices,
        mut vao,
    } = fixture();

    vao.configure_binding(&mut device, 0, &vertices, Vertex::STRIDE, 8);
    vao.configure_ebo(&mut device, &indices);

    assert_eq!(
        device.binding_of(vao.raw(), 0),
        Some((vertices.raw(), 8, Vertex::STRIDE))
    );
    assert_eq!(device.index_buffer_of(vao.raw()), Some(indices.raw()));
    let binding = vao.binding(0).unwrap();
    assert_eq!(binding.buffer, vertices.handle());
    assert_eq!(binding.stride, Vertex::STRIDE);
}

#[test]
fn grown_vertex_buffer_is_rebound_with_same_stride_and_offset() {
    let Fixture {
        mut device,
        mut vertices,
        mut vao,
        ..
    } = fixture();
    vao.configure_binding(&mut device, 0, &vertices, Vertex::STRIDE, 4);
    let before = vertices.raw();

    vertices.push_data(&mut device, &[0; 256]);
    assert_ne!(vertices.raw(), before);
    vao.bind(&mut device);

    assert_eq!(
        device.binding_of(vao.raw(), 0),
        Some((vertices.raw(), 4, Vertex::STRIDE))
    );
    assert_eq!(vao.binding(0).unwrap().raw, vertices.raw());
}

#[test]
fn grown_index_buffer_is_rebound() {
    let Fixture {
        mut device,
        mut indices,
        mut vao,
        ..
    } = fixture();
    vao.configure_ebo(&mut device, &indices);

    indices.push::<u32>(&mut device, &[0; 64]);
    vao.sync(&mut device);

    assert_eq!(device.index_buffer_of(vao.raw()), Some(indices.raw()));
}

#[test]
fn buffers_grown_twice_between_binds_rebind_to_latest() {
    let Fixture {
        mut device,
        mut vertices,
        mut indices,
        mut vao,
    } = fixture();
    vao.configure_binding(&mut device, 0, &vertices, Vertex::STRIDE, 4);
    vao.configure_ebo(&mut device, &indices);

    vertices.push_data(&mut device, &[0; 128]);
    let first = vertices.raw();
    vertices.push_data(&mut device, &[0; 512]);
    assert_ne!(vertices.raw(), first);
    indices.push::<u32>(&mut device, &[0; 8]);
    indices.push::<u32>(&mut device, &[0; 64]);

    vao.bind(&mut device);

    assert_eq!(
        device.binding_of(vao.raw(), 0),
        Some((vertices.raw(), 4, Vertex::STRIDE))
    );
    assert_eq!(device.index_buffer_of(vao.raw()), Some(indices.raw()));
    assert_eq!(vao.binding(0).unwrap().raw, vertices.raw());
    assert_eq!(device.live_buffers(), 2);
}

#[test]
fn released_vertex_array_stops_listening() {
    let Fixture {
        mut device,
        mut vertices,
        mut vao,
        ..
    } = fixture();
    vao.configure_binding(&mut device, 0, &vertices, 12, 0);
    assert_eq!(vertices.handle_changed().subscriber_count(), 1);

    let mut store = ResourceStore::new();
    let handle = store.create_resource(vao).handle();
    store.destroy_resource(&mut device, handle);

    assert_eq!(vertices.handle_changed().subscriber_count(), 0);
    assert_eq!(device.live_vertex_arrays(), 0);
    vertices.push_data(&mut device, &[0; 128]);
}
