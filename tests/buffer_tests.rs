//! GPU Buffer Tests
//!
//! Tests for:
//! - push_data: offsets, content, capacity untouched while it fits
//! - Growth: max(required, 2 * size) policy, content preserved, old buffer freed
//! - handle_changed: fires once per reallocation with the new raw id
//! - clear_invalidate: size reset without reallocation
//! - Signal/Connection: emit order, disconnect, subscriber counts
//! - Allocation failure is fatal

use std::cell::RefCell;
use std::rc::Rc;

use ember::prelude::*;
use ember::renderer::core::{Connection, GROWTH_FACTOR, GpuBuffer, Signal};
use ember::renderer::device::{BufferFlags, BufferTarget, RawBuffer};

fn vertex_buffer(device: &mut HeadlessDevice, capacity: u64) -> GpuBuffer {
    GpuBuffer::new(device, "Test Vertices", BufferFlags::VERTEX, capacity)
}

// ============================================================================
// Append Tests
// ============================================================================

#[test]
fn new_buffer_is_empty_with_requested_capacity() {
    let mut device = HeadlessDevice::default();
    let buffer = vertex_buffer(&mut device, 128);

    assert!(buffer.is_empty());
    assert_eq!(buffer.capacity(), 128);
    assert_eq!(device.buffer_capacity(buffer.raw()), 128);
    assert_eq!(device.buffer_label(buffer.raw()), "Test Vertices");
}

#[test]
fn push_returns_running_offsets() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 64);

    assert_eq!(buffer.push_data(&mut device, &[1; 12]), 0);
    assert_eq!(buffer.push_data(&mut device, &[2; 8]), 12);
    assert_eq!(buffer.push::<u32>(&mut device, &[7, 8]), 20);

    assert_eq!(buffer.size(), 28);
    assert_eq!(buffer.capacity(), 64);
}

#[test]
fn pushed_bytes_read_back_in_order() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 64);
    buffer.push::<f32>(&mut device, &[1.0, 2.0]);
    buffer.push::<f32>(&mut device, &[3.0]);

    let bytes = buffer.read_back(&mut device);
    let floats: Vec<f32> = bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    assert_eq!(floats, [1.0, 2.0, 3.0]);
}

#[test]
fn empty_push_keeps_size() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 16);
    buffer.push_data(&mut device, &[1, 2, 3, 4]);

    assert_eq!(buffer.push_data(&mut device, &[]), 4);
    assert_eq!(buffer.size(), 4);
}

// ============================================================================
// Growth Tests
// ============================================================================

#[test]
fn growth_doubles_live_size_when_that_is_larger() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 16);
    buffer.push_data(&mut device, &[0; 16]);

    buffer.push_data(&mut device, &[0; 4]);

    assert_eq!(buffer.capacity(), 16 * GROWTH_FACTOR);
    assert_eq!(buffer.size(), 20);
}

#[test]
fn growth_uses_required_size_for_large_pushes() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 16);
    buffer.push_data(&mut device, &[0; 8]);

    buffer.push_data(&mut device, &[0; 100]);

    assert_eq!(buffer.capacity(), 108);
}

#[test]
fn growth_preserves_existing_bytes() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 8);
    buffer.push::<u32>(&mut device, &[0xAABB_CCDD, 0x1122_3344]);

    buffer.push::<u32>(&mut device, &[5, 6, 7]);

    let bytes = buffer.read_back(&mut device);
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned)
        .collect();
    assert_eq!(words, [0xAABB_CCDD, 0x1122_3344, 5, 6, 7]);
}

#[test]
fn growth_replaces_raw_buffer_and_frees_the_old_one() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 4);
    let handle = buffer.handle();
    let before = buffer.raw();

    buffer.push_data(&mut device, &[0; 32]);

    assert_ne!(buffer.raw(), before);
    assert_eq!(buffer.handle(), handle);
    assert_eq!(device.live_buffers(), 1);
    assert_eq!(device.allocated_bytes(), 32);
}

#[test]
fn reserve_grows_ahead_of_pushes() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 16);
    buffer.reserve(&mut device, 64);
    let raw = buffer.raw();

    buffer.push_data(&mut device, &[0; 64]);

    assert_eq!(buffer.raw(), raw);
    assert!(buffer.capacity() >= 64);
}

#[test]
fn handle_changed_fires_with_new_raw_id() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 4);
    let seen: Rc<RefCell<Vec<RawBuffer>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let _connection = buffer
        .handle_changed()
        .connect(move |raw| sink.borrow_mut().push(*raw));

    buffer.push_data(&mut device, &[0; 2]);
    assert!(seen.borrow().is_empty());

    buffer.push_data(&mut device, &[0; 16]);
    assert_eq!(*seen.borrow(), [buffer.raw()]);
}

#[test]
#[should_panic(expected = "unrecoverable device allocation failure")]
fn allocation_failure_is_fatal() {
    let mut device = HeadlessDevice::default().with_memory_budget(64);
    let mut buffer = vertex_buffer(&mut device, 32);
    buffer.push_data(&mut device, &[0; 128]);
}

// ============================================================================
// Invalidation Tests
// ============================================================================

#[test]
fn clear_invalidate_keeps_allocation() {
    let mut device = HeadlessDevice::default();
    let mut buffer = vertex_buffer(&mut device, 64);
    buffer.push_data(&mut device, &[9; 40]);
    let raw = buffer.raw();

    buffer.clear_invalidate();

    assert!(buffer.is_empty());
    assert_eq!(buffer.capacity(), 64);
    assert_eq!(buffer.raw(), raw);
    assert_eq!(buffer.push_data(&mut device, &[1; 4]), 0);
}

#[test]
fn read_back_of_empty_buffer_is_empty() {
    let mut device = HeadlessDevice::default();
    let buffer = vertex_buffer(&mut device, 64);
    assert!(buffer.read_back(&mut device).is_empty());
}

#[test]
fn bind_records_target_and_indexed_binding() {
    let mut device = HeadlessDevice::default();
    let indirect = GpuBuffer::new(&mut device, "Indirect", BufferFlags::INDIRECT, 64);
    let storage = GpuBuffer::new(&mut device, "Storage", BufferFlags::STORAGE, 64);

    indirect.bind(&mut device, BufferTarget::DrawIndirect);
    storage.bind_base(&mut device, BufferTarget::ShaderStorage, 1);

    assert_eq!(device.bound_buffer(BufferTarget::DrawIndirect), Some(indirect.raw()));
    assert_eq!(device.bound_storage(1), Some(storage.raw()));
}

// ============================================================================
// Signal Tests
// ============================================================================

#[test]
fn signal_delivers_to_every_subscriber_in_connect_order() {
    let signal: Signal<u32> = Signal::new();
    let log: Rc<RefCell<Vec<(char, u32)>>> = Rc::default();
    let mut connections: Vec<Connection> = Vec::new();
    for tag in ['a', 'b'] {
        let log = Rc::clone(&log);
        connections.push(signal.connect(move |v| log.borrow_mut().push((tag, *v))));
    }

    signal.emit(&3);

    assert_eq!(*log.borrow(), [('a', 3), ('b', 3)]);
    assert_eq!(signal.subscriber_count(), 2);
}

#[test]
fn disconnected_slot_stops_receiving() {
    let signal: Signal<u32> = Signal::new();
    let hits = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&hits);
    let mut connection = signal.connect(move |_| *counter.borrow_mut() += 1);

    signal.emit(&1);
    connection.disconnect();
    signal.emit(&2);

    assert_eq!(*hits.borrow(), 1);
    assert!(!connection.is_connected());
    assert_eq!(signal.subscriber_count(), 0);
}
